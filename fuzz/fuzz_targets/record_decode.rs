#![no_main]

use libfuzzer_sys::fuzz_target;
use driftwatch::model::AnomalyRecord;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary store lines must never panic, and every decoded
    // record must carry a well-formed window
    if let Ok(record) = serde_json::from_slice::<AnomalyRecord>(data) {
        assert!(record.time_window.start() < record.time_window.end());
        let _ = record.validate();
        let _ = record.deviation_percentage();
    }
});
