//! JSON output format for analysis reports
//!
//! `--format json` wraps the whole [`Analysis`] in a versioned envelope.

use serde::Serialize;

use crate::analysis::Analysis;

/// Summary counts for the analysed log
#[derive(Debug, Clone, Default, Serialize)]
pub struct JsonSummary {
    /// Records loaded from the file, raw lines included
    pub total_records: usize,
    /// Distinct pids seen in structured lines
    pub pids: Vec<u32>,
    /// True when any report recorded a finding
    pub has_errors: bool,
}

/// Root JSON output structure
#[derive(Debug, Clone, Serialize)]
pub struct JsonOutput<'a> {
    /// Format version identifier
    pub version: String,
    /// Format name
    pub format: String,
    pub summary: JsonSummary,
    pub analysis: &'a Analysis,
}

impl<'a> JsonOutput<'a> {
    pub fn new(analysis: &'a Analysis) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            format: "rpctrace-json-v1".to_string(),
            summary: JsonSummary {
                has_errors: analysis.has_errors(),
                ..JsonSummary::default()
            },
            analysis,
        }
    }

    /// Record the size of the log the analysis came from
    pub fn with_records(mut self, total_records: usize, pids: &[u32]) -> Self {
        self.summary.total_records = total_records;
        self.summary.pids = pids.to_vec();
        self
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
