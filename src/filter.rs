//! Record filtering for log stream iteration and `-e` expressions
//!
//! Supports comma separated clauses:
//! - `pid=4242`: only lines written by that process
//! - `trace`: only trace lines (`func(descriptor)` convention)
//! - `level=WARN`: only lines at that severity or more severe
//! - `raw`: also yield lines that did not parse
//! - `from=120`: start at that 1-based line index
//! - `function=/regex/`: only lines whose function name matches

use anyhow::{bail, Context, Result};
use regex::Regex;

use crate::log_line::{LogLevel, LogRecord};

/// Predicate deciding which records an iteration yields
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pid: Option<u32>,
    trace_only: bool,
    max_level: Option<LogLevel>,
    include_raw: bool,
    start_line: usize,
    function: Option<Regex>,
}

impl RecordFilter {
    /// Create a filter that yields every structured record
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn pid_opt(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    pub fn trace_only(mut self) -> Self {
        self.trace_only = true;
        self
    }

    /// Keep lines at `level` or anything more severe
    pub fn max_level(mut self, level: LogLevel) -> Self {
        self.max_level = Some(level);
        self
    }

    pub fn include_raw(mut self) -> Self {
        self.include_raw = true;
        self
    }

    pub fn starting_at(mut self, line: usize) -> Self {
        self.start_line = line;
        self
    }

    pub fn function_matching(mut self, pattern: Regex) -> Self {
        self.function = Some(pattern);
        self
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// First line index to yield, 1-based
    pub fn start_line(&self) -> usize {
        self.start_line.max(1)
    }

    /// Parse a filter expression like "pid=42,trace,level=WARN"
    pub fn from_expr(expr: &str) -> Result<Self> {
        let mut filter = Self::all();

        for clause in expr.split(',') {
            let clause = clause.trim();
            if clause.is_empty() {
                continue;
            }

            match clause.split_once('=') {
                None => match clause {
                    "trace" => filter.trace_only = true,
                    "raw" => filter.include_raw = true,
                    _ => bail!("Invalid filter clause: {}", clause),
                },
                Some(("pid", value)) => {
                    let pid = value
                        .parse()
                        .with_context(|| format!("Invalid pid in filter: {}", value))?;
                    filter.pid = Some(pid);
                }
                Some(("level", value)) => {
                    let level = value.parse::<LogLevel>().map_err(anyhow::Error::msg)?;
                    filter.max_level = Some(level);
                }
                Some(("from", value)) => {
                    filter.start_line = value
                        .parse()
                        .with_context(|| format!("Invalid line index in filter: {}", value))?;
                }
                Some(("function", value)) => {
                    let Some(pattern) = value
                        .strip_prefix('/')
                        .and_then(|v| v.strip_suffix('/'))
                    else {
                        bail!(
                            "Invalid function pattern: {}. Expected format: function=/REGEX/",
                            value
                        );
                    };
                    let regex = Regex::new(pattern)
                        .with_context(|| format!("Invalid regex pattern: {}", pattern))?;
                    filter.function = Some(regex);
                }
                Some((key, _)) => bail!("Unknown filter key: {}", key),
            }
        }

        Ok(filter)
    }

    /// Check if a record should be yielded
    ///
    /// Raw records carry no pid, level or function, so they pass only when
    /// raw output was requested.
    pub fn matches(&self, record: &LogRecord) -> bool {
        let Some(line) = record.as_line() else {
            return self.include_raw;
        };
        if self.pid.is_some_and(|pid| pid != line.pid()) {
            return false;
        }
        if self.trace_only && !line.is_trace() {
            return false;
        }
        if self.max_level.is_some_and(|max| line.level() > max) {
            return false;
        }
        match &self.function {
            Some(re) => re.is_match(line.function()),
            None => true,
        }
    }
}
