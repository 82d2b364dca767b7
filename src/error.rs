//! Structural failures of the analyzer
//!
//! Only conditions that make a query impossible live here. Content anomalies
//! found while scanning (illegal transitions, leaks, dangling parents) are
//! report rows, never errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a load or a single query
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Unable to read log file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid log file: unknown severity '{token}' on line {line}")]
    InvalidLogFile { token: String, line: usize },

    #[error("Pid {0} does not appear in the log file")]
    UnknownPid(u32),

    #[error("Multiprocess log file: pids {pids:?}, select one explicitly")]
    MultiprocessLogFile { pids: Vec<u32> },

    #[error("Pid index {index} out of range ({count} pids in file)")]
    PidIndexOutOfRange { index: usize, count: usize },

    #[error("Log file contains no structured lines")]
    EmptyLogFile,

    #[error("Descriptor not found to trace")]
    NoTraceTarget,
}

/// Result type for analyzer operations
pub type Result<T> = std::result::Result<T, AnalyzerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AnalyzerError::InvalidLogFile {
            token: "LOUD".to_string(),
            line: 7,
        };
        assert_eq!(
            err.to_string(),
            "Invalid log file: unknown severity 'LOUD' on line 7"
        );

        let err = AnalyzerError::MultiprocessLogFile { pids: vec![1, 2] };
        assert!(err.to_string().starts_with("Multiprocess log file"));
        assert_eq!(
            AnalyzerError::NoTraceTarget.to_string(),
            "Descriptor not found to trace"
        );
    }

    #[test]
    fn test_unreadable_keeps_source() {
        let err = AnalyzerError::Unreadable {
            path: PathBuf::from("/nope.log"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("/nope.log"));
    }
}
