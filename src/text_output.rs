//! Human-readable report output
//!
//! Tables are rendered with comfy-table in a markdown-style layout. Cells may
//! span several lines.

use std::io::{self, Write};

use comfy_table::{presets::ASCII_MARKDOWN, CellAlignment, ContentArrangement, Table};

use crate::analysis::{Analysis, DescriptorAnalysis};
use crate::consistency::ConsistencyReport;
use crate::descriptor::{DescriptorTable, ParentRef};
use crate::rpc_tracker::{RpcReport, RpcState};
use crate::selector::TargetReason;
use crate::transcript::Transcript;

/// Column alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

/// A titled table of string cells
#[derive(Debug, Clone)]
pub struct TextTable {
    title: Option<String>,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    align: Align,
}

impl TextTable {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            title: None,
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            align: Align::Left,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn aligned(mut self, align: Align) -> Self {
        self.align = align;
        self
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(ASCII_MARKDOWN)
            .set_content_arrangement(ContentArrangement::Disabled)
            .set_header(self.headers.clone());
        for row in &self.rows {
            table.add_row(row.clone());
        }
        if self.align == Align::Right {
            for column in table.column_iter_mut() {
                column.set_cell_alignment(CellAlignment::Right);
            }
        }

        let mut out = String::new();
        if let Some(title) = &self.title {
            out.push_str(title);
            out.push('\n');
        }
        out.push_str(&table.to_string());
        out.push('\n');
        out
    }
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// RPC transition table; SUCCESS rows only when `verbose`
pub fn rpc_transition_table(report: &RpcReport, verbose: bool) -> TextTable {
    let mut table = TextTable::new(["STATE", "RPC", "STATE", "Op", "Function", "Extra"])
        .with_title("RPC State Transitions:");
    for t in report
        .transitions
        .iter()
        .filter(|t| verbose || t.status.is_finding())
    {
        table.push_row(vec![
            t.status.to_string(),
            t.rpc.clone(),
            t.state.to_string(),
            t.opcode.clone(),
            t.function.clone(),
            opt(&t.message),
        ]);
    }
    table
}

/// Opcode × state counts, plus one column per completion result
pub fn opcode_tally_table(report: &RpcReport) -> TextTable {
    let mut headers: Vec<String> = vec!["OPCODE".to_string()];
    headers.extend(RpcState::ALL.iter().map(|s| s.name().to_string()));
    headers.extend(report.result_names.iter().cloned());

    let mut table = TextTable::new(headers)
        .with_title("Opcode State Transition Tally:")
        .aligned(Align::Right);
    for (op, counts) in &report.tally {
        let mut row = vec![op.clone()];
        row.extend(RpcState::ALL.iter().map(|&s| counts.count(s).to_string()));
        row.extend(
            report
                .result_names
                .iter()
                .map(|name| counts.results.get(name).map(u64::to_string).unwrap_or_default()),
        );
        table.push_row(row);
    }
    table
}

pub fn descriptor_transition_table(report: &ConsistencyReport, verbose: bool) -> TextTable {
    let mut table = TextTable::new(["Descriptor", "State", "Function", "Message", "Line"])
        .with_title("Descriptor State Transitions:");
    for t in &report.transitions {
        if t.status.is_finding() {
            table.push_row(vec![
                t.descriptor.clone(),
                format!("{} ({})", t.state, t.status),
                t.function.clone(),
                opt(&t.message),
                format!("{}: {}", t.line, t.text),
            ]);
        } else if verbose {
            table.push_row(vec![
                t.descriptor.clone(),
                t.state.to_string(),
                t.function.clone(),
                String::new(),
                String::new(),
            ]);
        }
    }
    table
}

/// Descriptor, type, attached RPCs and parent of every instance
pub fn descriptor_table(table: &DescriptorTable) -> TextTable {
    let mut out = TextTable::new(["Descriptor", "Type", "RPCs", "Parent"]);
    for node in table.nodes() {
        let rpcs: Vec<String> = table
            .attachments(&node.key)
            .iter()
            .map(|a| format!("{} {}", a.rpc, a.rpc_type))
            .collect();
        let parent = match table.parent_of(node) {
            ParentRef::Root => node.parent.clone(),
            ParentRef::Known(parent) => format!("{} {}", parent.key, parent.type_label),
            ParentRef::Missing(key) => format!("{} [None]", key),
        };
        out.push_row(vec![
            node.key.clone(),
            node.type_label.clone(),
            rpcs.join("\n"),
            parent,
        ]);
    }
    out
}

fn write_errors<W: Write>(w: &mut W, errors: &[String]) -> io::Result<()> {
    for error in errors {
        writeln!(w, "ERROR: {}", error)?;
    }
    Ok(())
}

fn write_table<W: Write>(w: &mut W, table: &TextTable) -> io::Result<()> {
    writeln!(w, "{}", table.render())
}

pub fn write_rpc_report<W: Write>(
    w: &mut W,
    logfile: &str,
    report: &RpcReport,
    verbose: bool,
) -> io::Result<()> {
    writeln!(w, "CaRT RPC Reporting:\nLogfile: {}, PID: {}\n", logfile, report.pid)?;
    let transitions = rpc_transition_table(report, verbose);
    if !transitions.is_empty() {
        write_table(w, &transitions)?;
    }
    write_table(w, &opcode_tally_table(report))?;
    write_errors(w, &report.errors)
}

pub fn write_transcript<W: Write>(w: &mut W, transcript: &Transcript) -> io::Result<()> {
    let hierarchy = &transcript.hierarchy;
    write_errors(w, &hierarchy.errors)?;
    if !hierarchy.chain.is_empty() {
        writeln!(w, "\nDescriptor Hierarchy ({}):", hierarchy.target)?;
        for entry in hierarchy.listing() {
            writeln!(w, "{}", entry)?;
        }
    }
    writeln!(w, "\nLog dump for descriptor hierarchy ({}):", hierarchy.target)?;
    for line in &transcript.lines {
        writeln!(w, "{}", line.text)?;
    }
    Ok(())
}

pub fn write_descriptor_report<W: Write>(
    w: &mut W,
    logfile: &str,
    analysis: &DescriptorAnalysis,
    verbose: bool,
) -> io::Result<()> {
    writeln!(w, "IOF Descriptor/RPC Tracing:\nLogfile: {}", logfile)?;

    let transitions = descriptor_transition_table(&analysis.consistency, verbose);
    if !transitions.is_empty() {
        write_table(w, &transitions)?;
    }
    let leaks: Vec<String> = analysis.consistency.leaks.iter().map(|l| l.message()).collect();
    write_errors(w, &leaks)?;
    write_errors(w, analysis.table.link_errors())?;

    writeln!(w)?;
    write_table(w, &descriptor_table(&analysis.table))?;
    let missing: Vec<String> = analysis
        .missing_parents
        .iter()
        .map(|p| format!("Descriptor parent {} is missing", p))
        .collect();
    write_errors(w, &missing)?;

    if let Some(target) = &analysis.target {
        if matches!(target.reason, TargetReason::Warning { .. }) {
            writeln!(w, "Tracing descriptor {} with error/warning", target.key)?;
        }
    }
    if let Some(transcript) = &analysis.transcript {
        write_transcript(w, transcript)?;
    }
    write_errors(w, &analysis.errors)
}

/// Write every section present in `analysis`
pub fn write_analysis<W: Write>(w: &mut W, analysis: &Analysis, verbose: bool) -> io::Result<()> {
    if let Some(rpc) = &analysis.rpc {
        write_rpc_report(w, &analysis.logfile, rpc, verbose)?;
    }
    if let Some(descriptors) = &analysis.descriptors {
        if analysis.rpc.is_some() {
            writeln!(w)?;
        }
        write_descriptor_report(w, &analysis.logfile, descriptors, verbose)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_stream::LogStream;
    use crate::rpc_tracker::track_pid;

    #[test]
    fn test_table_layout() {
        let mut table = TextTable::new(["A", "Long header"]).with_title("T:");
        table.push_row(vec!["value".to_string(), "x".to_string()]);
        let out = table.render();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], "T:");
        assert!(lines[1].contains("A") && lines[1].contains("Long header"));
        assert!(lines.iter().any(|l| l.contains("value") && l.contains('x')));
    }

    #[test]
    fn test_multiline_cells() {
        let mut table = TextTable::new(["K", "RPCs"]);
        table.push_row(vec!["0xA".to_string(), "0x1 R\n0x2 R".to_string()]);
        let out = table.render();
        let first = out.lines().find(|l| l.contains("0x1 R")).unwrap();
        let second = out.lines().find(|l| l.contains("0x2 R")).unwrap();
        assert!(first.contains("0xA"));
        assert!(!second.contains("0xA"));
    }

    #[test]
    fn test_right_alignment() {
        let mut table = TextTable::new(["OPCODE", "N"]).aligned(Align::Right);
        table.push_row(vec!["0x5".to_string(), "12".to_string()]);
        let out = table.render();
        assert!(out.lines().any(|l| l.contains("|    0x5 | 12 |")));
    }

    #[test]
    fn test_rpc_report_text() {
        let stream = LogStream::parse(
            "01/23-12:34:56.78 host CaRT[9] rpc DBUG src/c.c:1 b(0x2) [opc=0x5 rpcid=0x1 rank:tag=0:0] submitted.\n",
        )
        .unwrap();
        let report = track_pid(&stream, 9).unwrap();
        let mut out = Vec::new();
        write_rpc_report(&mut out, "x.log", &report, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Logfile: x.log, PID: 9"));
        assert!(text.contains("RPC State Transitions:"));
        assert!(text.contains("no alloc'd state registered"));
        assert!(text.contains("Opcode State Transition Tally:"));
        assert!(!text.contains("ERROR:"));
    }
}
