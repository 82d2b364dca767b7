#![no_main]

use libfuzzer_sys::fuzz_target;
use rpctrace::filter::RecordFilter;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // This should not panic regardless of input
        let _ = RecordFilter::from_expr(input);
    }
});
