#![no_main]

use libfuzzer_sys::fuzz_target;
use driftwatch::filter::AnomalyFilter;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Parsing must never panic; a parsed confidence floor stays in [0, 1]
        if let Ok(filter) = AnomalyFilter::from_expr(input) {
            if let Some(min) = filter.min_confidence {
                assert!((0.0..=1.0).contains(&min));
            }
        }
    }
});
