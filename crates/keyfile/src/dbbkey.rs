//! The 48-byte on-disk key record: a 32-byte address paired with the
//! `(offset, length)` descriptor locating its value in the values file.

use byteorder::{BigEndian, ByteOrder};

use crate::{KeyFileError, Result};

/// A 32-byte opaque identifier, typically a cryptographic hash of the value.
pub type Address = [u8; 32];

/// The reserved all-zero address. Never stored; used as a skip sentinel.
pub const NIL_ADDRESS: Address = [0u8; 32];

/// Size of an encoded address + descriptor record.
pub const RECORD_SIZE: usize = 48;

/// A value descriptor: where the value's bytes live in the values file.
///
/// Encoded with its address as a single big-endian record:
/// `address[0..32] ‖ offset[32..40] ‖ length[40..48]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DBBKey {
    /// Byte offset of the value in the values file.
    pub offset: u64,
    /// Length of the value in bytes.
    pub length: u64,
}

impl DBBKey {
    /// Encodes this descriptor with `address` into a 48-byte record.
    pub fn to_bytes(&self, address: &Address) -> [u8; RECORD_SIZE] {
        let mut b = [0u8; RECORD_SIZE];
        b[..32].copy_from_slice(address);
        BigEndian::write_u64(&mut b[32..40], self.offset);
        BigEndian::write_u64(&mut b[40..48], self.length);
        b
    }

    /// Decodes a 48-byte record into its address and descriptor.
    ///
    /// `data` may be longer than one record; only the first 48 bytes are
    /// read.
    pub fn parse(data: &[u8]) -> Result<(Address, DBBKey)> {
        if data.len() < RECORD_SIZE {
            return Err(KeyFileError::Corrupt(format!(
                "key record too short: {} bytes",
                data.len()
            )));
        }
        let mut address = [0u8; 32];
        address.copy_from_slice(&data[..32]);
        let key = DBBKey {
            offset: BigEndian::read_u64(&data[32..40]),
            length: BigEndian::read_u64(&data[40..48]),
        };
        Ok((address, key))
    }
}
