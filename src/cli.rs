//! CLI argument parsing for rpctrace

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::analysis::Sections;

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables (default)
    Text,
    /// JSON format for machine parsing
    Json,
    /// CSV opcode tally for spreadsheet analysis
    Csv,
}

/// Which reports to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportKind {
    /// RPC lifecycle tally and transitions
    Rpc,
    /// Descriptor hierarchy, consistency and transcript
    Descriptors,
    /// Both reports
    All,
}

impl ReportKind {
    pub fn sections(self) -> Sections {
        match self {
            Self::Rpc => Sections {
                rpc: true,
                descriptors: false,
            },
            Self::Descriptors => Sections {
                rpc: false,
                descriptors: true,
            },
            Self::All => Sections::all(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "rpctrace")]
#[command(version)]
#[command(about = "Offline analyzer for CaRT RPC and descriptor trace logs", long_about = None)]
pub struct Cli {
    /// Log file to analyse
    #[arg(value_name = "LOGFILE")]
    pub logfile: PathBuf,

    /// Reports to produce
    #[arg(long = "report", value_enum, default_value = "all")]
    pub report: ReportKind,

    /// Output format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Index of the pid to analyse in a multiprocess log (sorted order)
    #[arg(long = "pid-index", value_name = "N")]
    pub pid_index: Option<usize>,

    /// Show SUCCESS transitions as well as findings
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Only print hierarchy lines in the log dump
    #[arg(short = 'q', long = "quiet-log")]
    pub quiet_log: bool,

    /// Trace this descriptor key instead of selecting one
    #[arg(long = "descriptor", value_name = "KEY")]
    pub descriptor: Option<String>,

    /// Print records matching a filter expression and exit
    /// (e.g., -e pid=42,level=warn,function=/^crt_/)
    #[arg(short = 'e', long = "filter", value_name = "EXPR")]
    pub filter: Option<String>,

    /// List the pids present in the log and exit
    #[arg(long = "list-pids")]
    pub list_pids: bool,

    /// Configuration file (TOML)
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Exit with status 1 when any report records a finding
    #[arg(long = "strict")]
    pub strict: bool,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
