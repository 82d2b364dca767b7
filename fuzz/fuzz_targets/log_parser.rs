#![no_main]

use libfuzzer_sys::fuzz_target;
use rpctrace::analysis::{Analyzer, Sections};
use rpctrace::config::AnalyzerConfig;
use rpctrace::LogStream;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    // Parsing and every analysis pass must not panic on any input
    if let Ok(stream) = LogStream::parse(&text) {
        let config = AnalyzerConfig {
            pid_index: Some(0),
            ..AnalyzerConfig::default()
        };
        let _ = Analyzer::new(&stream, config).run(Sections::all(), None);
    }
});
