//! rpctrace - offline analyzer for CaRT RPC and descriptor trace logs
//!
//! This library parses the text logs written by the CaRT runtime and
//! reconstructs RPC lifecycles, the descriptor parent hierarchy and a log
//! transcript scoped to one descriptor's causal ancestry.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod consistency;
pub mod csv_output;
pub mod descriptor;
pub mod error;
pub mod filter;
pub mod json_output;
pub mod log_line;
pub mod log_stream;
pub mod rpc_tracker;
pub mod selector;
pub mod text_output;
pub mod transcript;
pub mod transition;

pub use analysis::{Analysis, Analyzer, Sections};
pub use error::{AnalyzerError, Result};
pub use log_stream::LogStream;
