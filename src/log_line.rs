//! Parsed log records
//!
//! A CaRT log line looks like:
//!
//! ```text
//! 01/23-12:34:56.78 node01 CaRT[4242/4243] rpc DBUG src/cart/crt_rpc.c:120 crt_rpc_priv_alloc(0x1) [opc=0x5 rpcid=0x9 rank:tag=0:0] allocated.
//! ```
//!
//! Anything that does not have that shape (interleaved output from another
//! component, blank lines, truncated writes) becomes a [`RawLine`].

use crate::error::{AnalyzerError, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Width of the timestamp field that starts every structured line
pub const TIMESTAMP_WIDTH: usize = 17;

/// Minimum number of whitespace separated fields in a structured line
pub const MIN_FIELDS: usize = 6;

/// Legacy marker some writers put in front of the `func(desc)` token
pub const TRACE_MARKER: &str = "TRACE:";

/// Severity of a structured line, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Fatal = 1,
    Crit,
    Err,
    Warn,
    Note,
    Info,
    Dbug,
}

impl LogLevel {
    /// Look up a severity by the name written in the log
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "FATAL" => Some(Self::Fatal),
            "CRIT" => Some(Self::Crit),
            "ERR" => Some(Self::Err),
            "WARN" => Some(Self::Warn),
            "NOTE" => Some(Self::Note),
            "INFO" => Some(Self::Info),
            "DBUG" => Some(Self::Dbug),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Fatal => "FATAL",
            Self::Crit => "CRIT",
            Self::Err => "ERR",
            Self::Warn => "WARN",
            Self::Note => "NOTE",
            Self::Info => "INFO",
            Self::Dbug => "DBUG",
        }
    }

    /// WARN or anything more severe
    pub fn is_warning_or_worse(self) -> bool {
        self <= Self::Warn
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        Self::from_name(&s.to_ascii_uppercase())
            .ok_or_else(|| format!("Unknown severity: {}", s))
    }
}

/// A line that follows the structured CaRT layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    index: usize,
    pid: u32,
    level: LogLevel,
    facility: String,
    preamble: String,
    filename: String,
    function: String,
    descriptor: String,
    trace: bool,
    fields: Vec<String>,
    message: String,
}

impl LogLine {
    /// 1-based position of the line in its file
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn facility(&self) -> &str {
        &self.facility
    }

    /// Timestamp, host, process, facility and severity, verbatim
    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    /// Source file half of the `file:line` field
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    /// Handle identity carried by a trace line, empty when there is none
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn is_trace(&self) -> bool {
        self.trace
    }

    /// Message tokens following the function token
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Everything from the source location onwards, verbatim
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Message tokens joined back together, without location or function
    pub fn text(&self) -> String {
        self.fields.join(" ")
    }

    /// Field by position; negative positions count from the end
    pub fn get_field(&self, idx: isize) -> Option<&str> {
        let pos = if idx < 0 {
            self.fields.len().checked_sub(idx.unsigned_abs())?
        } else {
            idx as usize
        };
        self.fields.get(pos).map(String::as_str)
    }

    pub fn ends_with(&self, suffix: &str) -> bool {
        self.message.ends_with(suffix)
    }

    /// `Registered new '<type>' from <parent>` or `... as root`
    pub fn is_new(&self) -> bool {
        self.trace
            && self.fields.len() >= 2
            && self.fields[0] == "Registered"
            && self.fields[1] == "new"
    }

    /// `Link '<type>' to <descriptor>`
    pub fn is_link(&self) -> bool {
        self.trace && self.fields.first().is_some_and(|f| f == "Link")
    }

    pub fn is_dereg(&self) -> bool {
        self.trace && self.fields.first().is_some_and(|f| f == "Deregistered")
    }

    pub fn is_callback(&self) -> bool {
        self.fields
            .windows(3)
            .any(|w| w == ["Invoking", "RPC", "callback"])
    }

    /// Parent of a registration, or the descriptor a link attaches to
    pub fn parent(&self) -> Option<&str> {
        if self.is_new() || self.is_link() {
            self.get_field(-1)
        } else {
            None
        }
    }

    /// Quoted type label of a registration or link, quotes removed
    pub fn type_label(&self) -> Option<&str> {
        if !(self.is_new() || self.is_link()) || self.fields.len() < 3 {
            return None;
        }
        self.get_field(-3)
            .map(|t| t.trim_start_matches('\'').trim_end_matches('\''))
    }

    pub fn render(&self, mark: bool) -> String {
        if mark {
            format!("{} ** {}", self.preamble, self.message)
        } else {
            format!("{}    {}", self.preamble, self.message)
        }
    }
}

/// A line that did not match the structured layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub index: usize,
    pub text: String,
}

/// One line of a log file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Structured(LogLine),
    Raw(RawLine),
}

impl LogRecord {
    pub fn index(&self) -> usize {
        match self {
            Self::Structured(line) => line.index,
            Self::Raw(raw) => raw.index,
        }
    }

    pub fn as_line(&self) -> Option<&LogLine> {
        match self {
            Self::Structured(line) => Some(line),
            Self::Raw(_) => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }

    /// Descriptor of a trace line; raw and plain lines have none
    pub fn descriptor(&self) -> Option<&str> {
        self.as_line()
            .filter(|l| l.trace && !l.descriptor.is_empty())
            .map(LogLine::descriptor)
    }

    pub fn render(&self, mark: bool) -> String {
        match self {
            Self::Structured(line) => line.render(mark),
            Self::Raw(raw) => raw.text.clone(),
        }
    }
}

/// Split on whitespace, keeping the byte offset of every token
fn tokens(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                out.push((s, &text[s..i]));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        out.push((s, &text[s..]));
    }
    out
}

/// Extract the pid from a `NAME[pid]` or `NAME[pid/tid]` token
fn parse_pid(token: &str) -> Option<u32> {
    let open = token.find('[')?;
    if open == 0 {
        return None;
    }
    let inner = token[open + 1..].strip_suffix(']')?;
    inner.split('/').next()?.parse().ok()
}

/// Split a function token into (function, descriptor, is_call)
fn split_call(token: &str) -> (String, String, bool) {
    if let Some(name) = token.strip_suffix("()") {
        return (name.to_string(), String::new(), false);
    }
    match (token.find('('), token.strip_suffix(')')) {
        (Some(open), Some(body)) if open > 0 && open < body.len() => {
            let desc = &body[open + 1..];
            let desc = if desc == "(nil)" { "" } else { desc };
            (token[..open].to_string(), desc.to_string(), true)
        }
        _ => (token.to_string(), String::new(), false),
    }
}

/// Parse one line of a log file
///
/// Shape mismatches degrade to [`LogRecord::Raw`]; only an unknown severity
/// name fails, since it means the file is not a CaRT log at all.
pub fn parse_line(index: usize, text: &str) -> Result<LogRecord> {
    let text = text.trim_end();
    let toks = tokens(text);
    let raw = || {
        Ok(LogRecord::Raw(RawLine {
            index,
            text: text.to_string(),
        }))
    };

    if toks.len() < MIN_FIELDS || toks[0].1.chars().count() != TIMESTAMP_WIDTH {
        return raw();
    }
    let Some(pid) = parse_pid(toks[2].1) else {
        return raw();
    };
    let level = LogLevel::from_name(toks[4].1).ok_or_else(|| AnalyzerError::InvalidLogFile {
        token: toks[4].1.to_string(),
        line: index,
    })?;

    let location = toks[5];
    let preamble = text[..location.0].trim_end().to_string();
    let message = text[location.0..].to_string();
    let filename = location
        .1
        .rsplit_once(':')
        .map_or(location.1, |(file, _)| file)
        .to_string();

    let mut rest = &toks[6..];
    let marked = rest.first().is_some_and(|t| t.1 == TRACE_MARKER);
    if marked {
        rest = &rest[1..];
    }
    let (function, descriptor, is_call) = match rest.first() {
        Some((_, tok)) => split_call(tok),
        None => (String::new(), String::new(), false),
    };
    let fields = rest
        .iter()
        .skip(1)
        .map(|(_, t)| (*t).to_string())
        .collect();

    Ok(LogRecord::Structured(LogLine {
        index,
        pid,
        level,
        facility: toks[3].1.to_string(),
        preamble,
        filename,
        function,
        descriptor,
        trace: marked || is_call,
        fields,
        message,
    }))
}
