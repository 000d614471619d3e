//! Fuzz target: `PersistedRecord::decode`
//!
//! Feeds arbitrary flash contents to the record decoder.  Whatever
//! decodes must re-encode to no more bytes than it was read from, and
//! decode again to the same record.
//!
//! cargo fuzz run fuzz_record_decode

#![no_main]

use blebridge::providers::decode_ble_user_data;
use blebridge::storage::PersistedRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(record) = PersistedRecord::decode(data) {
        let encoded = record.encode();
        assert!(encoded.len() <= data.len(), "re-encoding grew the record");
        assert_eq!(PersistedRecord::decode(&encoded), Ok(record.clone()));
        if !record.user_data.is_empty() {
            let _ = decode_ble_user_data(&record.user_data);
        }
    }
});
