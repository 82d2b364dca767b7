//! Choosing which descriptor to produce a transcript for

use serde::Serialize;
use tracing::debug;

use crate::descriptor::ReuseCounter;
use crate::error::{AnalyzerError, Result};
use crate::filter::RecordFilter;
use crate::log_line::LogLevel;
use crate::log_stream::LogStream;

/// Source file prefix of filesystem operation handlers
pub const DEFAULT_FS_OP_MARKER: &str = "src/ioc/ops";

/// Why a descriptor was picked
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetReason {
    /// First trace line at WARN or worse
    Warning { line: usize, level: LogLevel },
    /// First descriptor registered by a filesystem operation
    FilesystemOp { line: usize },
    /// Named by the caller
    Requested,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceTarget {
    /// Ordinal-disambiguated descriptor key
    pub key: String,
    pub reason: TargetReason,
}

impl TraceTarget {
    pub fn requested(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: TargetReason::Requested,
        }
    }
}

/// Pick the descriptor worth tracing
///
/// The first trace line at WARN or worse wins. Otherwise the first
/// descriptor registered from a source file containing `fs_marker` is used.
pub fn descriptor_to_trace(
    stream: &LogStream,
    pid: Option<u32>,
    fs_marker: &str,
) -> Result<TraceTarget> {
    let mut reuse = ReuseCounter::new();
    let mut fs_target = None;

    for record in stream.iter(RecordFilter::all().pid_opt(pid).trace_only())? {
        let Some(line) = record.as_line() else {
            continue;
        };
        let token = line.descriptor();

        // A registration names the instance it creates, not the previous one.
        let registered_key = if line.is_new() && !token.is_empty() {
            Some(reuse.register(token).0)
        } else {
            None
        };

        if line.level().is_warning_or_worse() && !token.is_empty() {
            let key = registered_key.unwrap_or_else(|| reuse.resolve(token));
            debug!(key = %key, line = line.index(), "tracing descriptor with error/warning");
            return Ok(TraceTarget {
                key,
                reason: TargetReason::Warning {
                    line: line.index(),
                    level: line.level(),
                },
            });
        }

        if fs_target.is_none() && line.filename().contains(fs_marker) {
            if let Some(key) = registered_key {
                fs_target = Some(TraceTarget {
                    key,
                    reason: TargetReason::FilesystemOp { line: line.index() },
                });
            }
        }
    }

    fs_target.ok_or(AnalyzerError::NoTraceTarget)
}
