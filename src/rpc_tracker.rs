//! RPC lifecycle tracking for a single process
//!
//! Every RPC walks ALLOCATED → SUBMITTED → SENT → COMPLETED → DEALLOCATED.
//! The tracker replays those events in file order, checks each transition
//! against the allowed predecessors, and tallies counts per opcode.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use fnv::FnvHashMap;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::filter::RecordFilter;
use crate::log_line::LogLine;
use crate::log_stream::LogStream;
use crate::transition::TransitionStatus;

/// Opcode recorded for RPCs whose allocation was never seen
pub const UNKNOWN_OPCODE: &str = "unknown";

/// Result name for a successful completion
pub const SUCCESS_RESULT: &str = "-DER_SUCCESS";

/// Lifecycle state of an RPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RpcState {
    Allocated,
    Submitted,
    Sent,
    Completed,
    Deallocated,
}

impl RpcState {
    /// Column order of the tally table
    pub const ALL: [RpcState; 5] = [
        Self::Allocated,
        Self::Submitted,
        Self::Sent,
        Self::Completed,
        Self::Deallocated,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Allocated => "ALLOCATED",
            Self::Submitted => "SUBMITTED",
            Self::Sent => "SENT",
            Self::Completed => "COMPLETED",
            Self::Deallocated => "DEALLOCATED",
        }
    }

    /// States an RPC may be in when this state is entered
    ///
    /// SENT after COMPLETED covers retried RPCs.
    pub fn allowed_predecessors(self) -> &'static [RpcState] {
        match self {
            Self::Allocated => &[Self::Deallocated],
            Self::Deallocated => &[Self::Allocated, Self::Submitted, Self::Sent, Self::Completed],
            Self::Submitted => &[Self::Allocated],
            Self::Sent => &[Self::Submitted, Self::Completed],
            Self::Completed => &[Self::Sent, Self::Submitted, Self::Allocated],
        }
    }
}

impl fmt::Display for RpcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Map a completion code to its CaRT error name
///
/// Only the codes the runtime is known to report are named; anything else
/// is kept as written.
pub fn result_name(code: &str) -> String {
    match code.parse::<i64>() {
        Ok(0) => SUCCESS_RESULT.to_string(),
        Ok(-1011) => "-DER_TIMEDOUT".to_string(),
        Ok(-1032) => "-DER_EVICTED".to_string(),
        Ok(other) => other.to_string(),
        Err(_) => code.to_string(),
    }
}

/// A lifecycle event recognised on a log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcEvent {
    Allocated { opcode: String },
    Submitted,
    Sent,
    Completed { result: String },
    Deallocated,
}

impl RpcEvent {
    /// Classify a line by its message suffix
    pub fn classify(line: &LogLine) -> Option<Self> {
        if line.ends_with("allocated.") || line.ends_with("allocated per RPC request received.") {
            let opcode = line
                .get_field(0)
                .map(|f| f.trim_start_matches("[opc=").trim_end_matches(']'))
                .filter(|f| !f.is_empty())
                .unwrap_or(UNKNOWN_OPCODE);
            Some(Self::Allocated {
                opcode: opcode.to_string(),
            })
        } else if line.ends_with("), decref to 0.") {
            Some(Self::Deallocated)
        } else if line.ends_with("submitted.") {
            Some(Self::Submitted)
        } else if line.ends_with(" sent.") {
            Some(Self::Sent)
        } else if line.is_callback() {
            let code = line.get_field(-1)?.trim_end_matches('.');
            Some(Self::Completed {
                result: result_name(code),
            })
        } else {
            None
        }
    }

    pub fn state(&self) -> RpcState {
        match self {
            Self::Allocated { .. } => RpcState::Allocated,
            Self::Submitted => RpcState::Submitted,
            Self::Sent => RpcState::Sent,
            Self::Completed { .. } => RpcState::Completed,
            Self::Deallocated => RpcState::Deallocated,
        }
    }
}

/// One checked transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcTransition {
    pub status: TransitionStatus,
    pub rpc: String,
    pub state: RpcState,
    pub opcode: String,
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub line: usize,
}

/// Per-opcode state counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OpcodeCounts {
    pub allocated: u64,
    pub submitted: u64,
    pub sent: u64,
    pub completed: u64,
    pub deallocated: u64,
    /// Completion result name → count
    pub results: BTreeMap<String, u64>,
}

impl OpcodeCounts {
    pub fn count(&self, state: RpcState) -> u64 {
        match state {
            RpcState::Allocated => self.allocated,
            RpcState::Submitted => self.submitted,
            RpcState::Sent => self.sent,
            RpcState::Completed => self.completed,
            RpcState::Deallocated => self.deallocated,
        }
    }

    fn record(&mut self, state: RpcState) {
        let slot = match state {
            RpcState::Allocated => &mut self.allocated,
            RpcState::Submitted => &mut self.submitted,
            RpcState::Sent => &mut self.sent,
            RpcState::Completed => &mut self.completed,
            RpcState::Deallocated => &mut self.deallocated,
        };
        *slot += 1;
    }
}

/// Everything learned about one process's RPCs
#[derive(Debug, Clone, Default, Serialize)]
pub struct RpcReport {
    pub pid: u32,
    /// Every transition in file order, SUCCESS rows included
    pub transitions: Vec<RpcTransition>,
    pub tally: BTreeMap<String, OpcodeCounts>,
    /// Completion result names seen, `-DER_SUCCESS` first
    pub result_names: Vec<String>,
    /// Tally consistency violations
    pub errors: Vec<String>,
}

impl RpcReport {
    /// Non-SUCCESS transitions
    pub fn findings(&self) -> impl Iterator<Item = &RpcTransition> {
        self.transitions.iter().filter(|t| t.status.is_finding())
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.findings().next().is_some()
    }
}

/// Replays RPC events for one process
#[derive(Debug, Default)]
pub struct RpcTracker {
    pid: u32,
    states: FnvHashMap<String, RpcState>,
    opcodes: FnvHashMap<String, String>,
    transitions: Vec<RpcTransition>,
    tally: BTreeMap<String, OpcodeCounts>,
    result_names: BTreeSet<String>,
}

impl RpcTracker {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            ..Self::default()
        }
    }

    /// Feed one line; lines that are not RPC events are ignored
    pub fn observe(&mut self, line: &LogLine) {
        let rpc = line.descriptor();
        if rpc.is_empty() {
            return;
        }
        let Some(event) = RpcEvent::classify(line) else {
            return;
        };
        let state = event.state();

        let opcode = match &event {
            RpcEvent::Allocated { opcode } => {
                self.opcodes.insert(rpc.to_string(), opcode.clone());
                opcode.clone()
            }
            RpcEvent::Deallocated => self
                .opcodes
                .remove(rpc)
                .unwrap_or_else(|| UNKNOWN_OPCODE.to_string()),
            _ => self
                .opcodes
                .get(rpc)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_OPCODE.to_string()),
        };

        let counts = self.tally.entry(opcode.clone()).or_default();
        counts.record(state);
        if let RpcEvent::Completed { result } = &event {
            *counts.results.entry(result.clone()).or_default() += 1;
            self.result_names.insert(result.clone());
        }

        let (status, message) = self.check_transition(rpc, state);
        self.transitions.push(RpcTransition {
            status,
            rpc: rpc.to_string(),
            state,
            opcode,
            function: line.function().to_string(),
            message,
            line: line.index(),
        });
    }

    /// Validate `rpc` entering `state` and record the new state
    fn check_transition(&mut self, rpc: &str, state: RpcState) -> (TransitionStatus, Option<String>) {
        let outcome = match self.states.get(rpc) {
            Some(prev) if state.allowed_predecessors().contains(prev) => {
                (TransitionStatus::Success, None)
            }
            Some(prev) => (
                TransitionStatus::Error,
                Some(format!("previous state: {}", prev)),
            ),
            None if state == RpcState::Allocated => (TransitionStatus::Success, None),
            None => (
                TransitionStatus::Warn,
                Some("no alloc'd state registered".to_string()),
            ),
        };

        if state == RpcState::Deallocated {
            self.states.remove(rpc);
        } else {
            self.states.insert(rpc.to_string(), state);
        }
        outcome
    }

    pub fn finish(self) -> RpcReport {
        let mut result_names: Vec<String> = self.result_names.into_iter().collect();
        if let Some(pos) = result_names.iter().position(|n| n == SUCCESS_RESULT) {
            let success = result_names.remove(pos);
            result_names.insert(0, success);
        }

        let mut errors = Vec::new();
        for (op, counts) in &self.tally {
            if counts.allocated != counts.deallocated {
                errors.push(format!(
                    "Opcode {}: Alloc'd Total = {}, Dealloc'd Total = {}",
                    op, counts.allocated, counts.deallocated
                ));
            }
            // Collective RPCs may complete more often than they are sent, never less.
            if counts.sent > counts.completed {
                errors.push(format!(
                    "Opcode {}: sent Total = {}, Completed Total = {}",
                    op, counts.sent, counts.completed
                ));
            }
        }

        RpcReport {
            pid: self.pid,
            transitions: self.transitions,
            tally: self.tally,
            result_names,
            errors,
        }
    }
}

/// Run the RPC lifecycle pass for `pid`
pub fn track_pid(stream: &LogStream, pid: u32) -> Result<RpcReport> {
    let mut tracker = RpcTracker::new(pid);
    for record in stream.iter(RecordFilter::all().with_pid(pid))? {
        if let Some(line) = record.as_line() {
            tracker.observe(line);
        }
    }
    let report = tracker.finish();
    debug!(
        pid,
        transitions = report.transitions.len(),
        opcodes = report.tally.len(),
        "rpc pass complete"
    );
    Ok(report)
}
