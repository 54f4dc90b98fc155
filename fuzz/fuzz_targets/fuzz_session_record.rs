#![no_main]

use libfuzzer_sys::fuzz_target;

use pageflow::sessions::id::is_valid_session_id;
use pageflow::sessions::SessionRecord;

// Stored record files are untrusted input: parsing must never panic, and any
// record that parses must survive a write/read cycle with its identity intact.
fuzz_target!(|data: &[u8]| {
    if let Ok(record) = serde_json::from_slice::<SessionRecord>(data) {
        let encoded = serde_json::to_vec(&record).unwrap_or_default();
        let decoded: SessionRecord = match serde_json::from_slice(&encoded) {
            Ok(decoded) => decoded,
            Err(e) => panic!("re-encoded record failed to parse: {}", e),
        };
        assert_eq!(decoded.id(), record.id());
        assert_eq!(decoded.user_id, record.user_id);
        assert_eq!(decoded.data_len(), record.data_len());
    }

    if let Ok(candidate) = std::str::from_utf8(data) {
        let _ = is_valid_session_id(candidate);
    }
});
