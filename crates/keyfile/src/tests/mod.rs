mod dbbkey_tests;
