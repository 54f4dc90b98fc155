#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::Value;

use pageflow::flash;
use pageflow::page::Page;
use pageflow::sessions::SessionRecord;

const KEYS: [&str; 5] = [
    flash::INFO_MESSAGE,
    flash::ERROR_MESSAGE,
    flash::FORM_ERRORS,
    flash::FORM_VALUES,
    flash::GROUP_VALUES,
];

// Arbitrary stored flash payloads must decode without panicking and must be
// consumed by a single hydration.
fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    let mut record = SessionRecord::with_id("fuzz");
    for (idx, key) in KEYS.iter().enumerate() {
        let payload = match &value {
            Value::Array(items) => items.get(idx).cloned().unwrap_or(Value::Null),
            other => other.clone(),
        };
        record.insert(*key, payload);
    }

    let mut page = Page::new();
    page.hydrate_from_session(&mut record);

    for key in KEYS {
        assert!(!record.contains_key(key));
    }
});
