//! CSV output format for analysis reports
//!
//! The opcode tally is written as one row per opcode. RPC findings can be
//! written as a second table for spreadsheet analysis.

use crate::rpc_tracker::{RpcReport, RpcState};

/// Escape CSV field (handle commas, quotes, newlines)
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// CSV formatter for an [`RpcReport`]
#[derive(Debug)]
pub struct CsvTallyOutput<'a> {
    report: &'a RpcReport,
}

impl<'a> CsvTallyOutput<'a> {
    pub fn new(report: &'a RpcReport) -> Self {
        Self { report }
    }

    /// Header row: opcode, one column per state, one per result name
    fn header(&self) -> String {
        let mut headers: Vec<String> = vec!["opcode".to_string()];
        headers.extend(RpcState::ALL.iter().map(|s| s.name().to_ascii_lowercase()));
        headers.extend(self.report.result_names.iter().map(|n| escape_field(n)));
        headers.join(",")
    }

    /// Generate the tally as CSV
    pub fn to_csv(&self) -> String {
        let mut output = String::new();
        output.push_str(&self.header());
        output.push('\n');

        for (op, counts) in &self.report.tally {
            let mut fields = vec![escape_field(op)];
            fields.extend(RpcState::ALL.iter().map(|&s| counts.count(s).to_string()));
            fields.extend(
                self.report
                    .result_names
                    .iter()
                    .map(|name| counts.results.get(name).copied().unwrap_or(0).to_string()),
            );
            output.push_str(&fields.join(","));
            output.push('\n');
        }

        output
    }

    /// Generate the non-SUCCESS transitions as CSV
    pub fn findings_csv(&self) -> String {
        let mut output = String::from("status,rpc,state,opcode,function,message,line\n");
        for t in self.report.findings() {
            let fields = [
                t.status.to_string(),
                escape_field(&t.rpc),
                t.state.to_string(),
                escape_field(&t.opcode),
                escape_field(&t.function),
                escape_field(t.message.as_deref().unwrap_or("")),
                t.line.to_string(),
            ];
            output.push_str(&fields.join(","));
            output.push('\n');
        }
        output
    }
}
