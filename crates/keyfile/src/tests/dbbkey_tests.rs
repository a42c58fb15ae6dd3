use crate::{DBBKey, KeyFileError, RECORD_SIZE};

#[test]
fn encode_layout_is_exact() {
    let address = [0x01u8; 32];
    let key = DBBKey {
        offset: 0xDEAD_BEEF,
        length: 0x1234,
    };

    let bytes = key.to_bytes(&address);
    assert_eq!(bytes.len(), RECORD_SIZE);
    assert_eq!(&bytes[..32], &address);
    assert_eq!(
        &bytes[32..40],
        &[0x00, 0x00, 0x00, 0x00, 0xDE, 0xAD, 0xBE, 0xEF]
    );
    assert_eq!(
        &bytes[40..48],
        &[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x12, 0x34]
    );
}

#[test]
fn round_trip() {
    let address = [0x5Au8; 32];
    let key = DBBKey {
        offset: u64::MAX - 7,
        length: 1,
    };

    let (got_address, got_key) = DBBKey::parse(&key.to_bytes(&address)).unwrap();
    assert_eq!(got_address, address);
    assert_eq!(got_key, key);
}

#[test]
fn parse_ignores_trailing_bytes() {
    let address = [0x22u8; 32];
    let key = DBBKey {
        offset: 9,
        length: 42,
    };
    let mut data = key.to_bytes(&address).to_vec();
    data.extend_from_slice(&[0xFF; 100]);

    let (got_address, got_key) = DBBKey::parse(&data).unwrap();
    assert_eq!(got_address, address);
    assert_eq!(got_key, key);
}

#[test]
fn parse_rejects_short_input() {
    match DBBKey::parse(&[0u8; 47]) {
        Err(KeyFileError::Corrupt(_)) => {}
        other => panic!("expected Corrupt, got {other:?}"),
    }
}
