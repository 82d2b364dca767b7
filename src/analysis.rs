//! Full analysis of one log file
//!
//! Runs the RPC pass for the selected process, then the descriptor passes
//! (hierarchy, consistency, target selection, transcript) over the same
//! loaded stream.

use serde::Serialize;
use tracing::{debug, info};

use crate::config::AnalyzerConfig;
use crate::consistency::{check_descriptors, ConsistencyReport};
use crate::descriptor::{build_hierarchy, DescriptorTable};
use crate::error::{AnalyzerError, Result};
use crate::log_stream::LogStream;
use crate::rpc_tracker::{track_pid, RpcReport};
use crate::selector::{descriptor_to_trace, TraceTarget};
use crate::transcript::{rpc_trace_output_logdump, Transcript, TranscriptOptions};

/// Which reports to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sections {
    pub rpc: bool,
    pub descriptors: bool,
}

impl Sections {
    pub fn all() -> Self {
        Self {
            rpc: true,
            descriptors: true,
        }
    }
}

/// Descriptor side of an analysis
#[derive(Debug, Clone, Default, Serialize)]
pub struct DescriptorAnalysis {
    pub table: DescriptorTable,
    pub consistency: ConsistencyReport,
    pub missing_parents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TraceTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Transcript>,
    /// Failures confined to this report, such as no trace target
    pub errors: Vec<String>,
}

impl DescriptorAnalysis {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
            || !self.missing_parents.is_empty()
            || !self.table.link_errors().is_empty()
            || self.consistency.has_errors()
            || self.transcript.as_ref().is_some_and(Transcript::has_errors)
    }
}

/// Result of analysing one log file
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub logfile: String,
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc: Option<RpcReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptors: Option<DescriptorAnalysis>,
}

impl Analysis {
    /// True when any report recorded a finding
    pub fn has_errors(&self) -> bool {
        self.rpc.as_ref().is_some_and(RpcReport::has_errors)
            || self
                .descriptors
                .as_ref()
                .is_some_and(DescriptorAnalysis::has_errors)
    }
}

/// Runs analysis passes over a loaded stream
#[derive(Debug)]
pub struct Analyzer<'a> {
    stream: &'a LogStream,
    config: AnalyzerConfig,
}

impl<'a> Analyzer<'a> {
    pub fn new(stream: &'a LogStream, config: AnalyzerConfig) -> Self {
        Self { stream, config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Process selected by the configured pid index
    pub fn selected_pid(&self) -> Result<u32> {
        self.stream.select_pid(self.config.pid_index)
    }

    /// RPC lifecycle report for the selected process
    pub fn rpc_reporting(&self) -> Result<RpcReport> {
        track_pid(self.stream, self.selected_pid()?)
    }

    /// Descriptor table and consistency report for `pid`
    pub fn descriptor_rpc_trace(&self, pid: u32) -> Result<(DescriptorTable, ConsistencyReport)> {
        let consistency = check_descriptors(self.stream, Some(pid))?;
        let table = build_hierarchy(self.stream, Some(pid))?;
        Ok((table, consistency))
    }

    pub fn descriptor_to_trace(&self, pid: u32) -> Result<TraceTarget> {
        descriptor_to_trace(self.stream, Some(pid), &self.config.fs_op_marker)
    }

    /// Transcript for `key`, honouring the configured verbosity
    pub fn rpc_trace_output(&self, table: &DescriptorTable, key: &str, pid: u32) -> Result<Transcript> {
        rpc_trace_output_logdump(
            self.stream,
            table,
            key,
            TranscriptOptions {
                verbose: self.config.verbose_log,
                pid: Some(pid),
            },
        )
    }

    /// Run the requested sections
    ///
    /// `requested` names a descriptor key to trace instead of selecting one.
    pub fn run(&self, sections: Sections, requested: Option<&str>) -> Result<Analysis> {
        let pid = self.selected_pid()?;
        info!(pid, logfile = %self.stream.display_name(), "analysing log");

        let rpc = if sections.rpc {
            Some(track_pid(self.stream, pid)?)
        } else {
            None
        };

        let descriptors = if sections.descriptors {
            Some(self.analyse_descriptors(pid, requested)?)
        } else {
            None
        };

        Ok(Analysis {
            logfile: self.stream.display_name(),
            pid,
            rpc,
            descriptors,
        })
    }

    fn analyse_descriptors(&self, pid: u32, requested: Option<&str>) -> Result<DescriptorAnalysis> {
        let (table, consistency) = self.descriptor_rpc_trace(pid)?;
        let mut analysis = DescriptorAnalysis {
            missing_parents: table.missing_parents(),
            table,
            consistency,
            ..DescriptorAnalysis::default()
        };

        let target = match requested {
            Some(key) => Ok(TraceTarget::requested(key)),
            None => self.descriptor_to_trace(pid),
        };
        match target {
            Ok(target) => {
                let transcript = self.rpc_trace_output(&analysis.table, &target.key, pid)?;
                analysis.target = Some(target);
                analysis.transcript = Some(transcript);
            }
            Err(AnalyzerError::NoTraceTarget) => {
                debug!(pid, "no descriptor to trace");
                analysis.errors.push(AnalyzerError::NoTraceTarget.to_string());
            }
            Err(other) => return Err(other),
        }
        Ok(analysis)
    }
}
