//! Descriptor registration consistency
//!
//! Walks trace lines once, keyed by raw token, and flags registrations that
//! overlap, links to descriptors that are not registered, deregistrations of
//! unknown descriptors, and descriptors still registered at end of file.

use std::collections::BTreeSet;
use std::fmt;

use fnv::FnvHashMap;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::filter::RecordFilter;
use crate::log_line::LogLine;
use crate::log_stream::LogStream;
use crate::transition::TransitionStatus;

/// Registration state of a raw descriptor token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DescriptorState {
    Registered,
    Linked,
    Deregistered,
}

impl DescriptorState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Registered => "Registered",
            Self::Linked => "Linked",
            Self::Deregistered => "Deregistered",
        }
    }
}

impl fmt::Display for DescriptorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One checked registration event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DescriptorTransition {
    pub descriptor: String,
    pub state: DescriptorState,
    pub status: TransitionStatus,
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub line: usize,
    /// Message text of the line
    pub text: String,
}

/// A descriptor left over at end of file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Leak {
    pub descriptor: String,
    pub state: DescriptorState,
    /// Whether a registration was ever seen for it
    pub registered: bool,
    /// RPCs still attached when the log ended
    pub attached: Vec<String>,
}

impl Leak {
    pub fn message(&self) -> String {
        if self.registered {
            format!("{} is not Deregistered", self.descriptor)
        } else {
            format!("{}:{} not Deregistered from state", self.descriptor, self.state)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    /// Every registration event in file order, SUCCESS rows included
    pub transitions: Vec<DescriptorTransition>,
    pub leaks: Vec<Leak>,
}

impl ConsistencyReport {
    pub fn findings(&self) -> impl Iterator<Item = &DescriptorTransition> {
        self.transitions.iter().filter(|t| t.status.is_finding())
    }

    /// Leaks of descriptors that were properly registered
    pub fn registered_leaks(&self) -> impl Iterator<Item = &Leak> {
        self.leaks.iter().filter(|l| l.registered)
    }

    pub fn has_errors(&self) -> bool {
        !self.leaks.is_empty() || self.findings().next().is_some()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    state: DescriptorState,
    registered: bool,
    first_seen: usize,
}

/// Working state of the consistency scan
#[derive(Debug, Default)]
pub struct ConsistencyChecker {
    entries: FnvHashMap<String, Entry>,
    /// Descriptor → RPCs linked to it, cleared with the descriptor
    linked: FnvHashMap<String, BTreeSet<String>>,
    transitions: Vec<DescriptorTransition>,
}

impl ConsistencyChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, line: &LogLine) {
        let outcome = if line.is_new() {
            self.register(line.descriptor(), line.index())
        } else if line.is_link() {
            match line.parent() {
                Some(target) => self.link(target, line.descriptor(), line.index()),
                None => None,
            }
        } else if line.is_dereg() {
            self.deregister(line.descriptor())
        } else {
            None
        };

        if let Some((descriptor, state, status, message)) = outcome {
            self.transitions.push(DescriptorTransition {
                descriptor,
                state,
                status,
                function: line.function().to_string(),
                message,
                line: line.index(),
                text: line.text(),
            });
        }
    }

    fn register(&mut self, token: &str, line: usize) -> Option<Outcome> {
        if token.is_empty() {
            return None;
        }
        let (status, message) = match self.entries.get(token) {
            None => (TransitionStatus::Success, None),
            Some(prev) => (
                TransitionStatus::Error,
                Some(format!("previous state: {}", prev.state)),
            ),
        };
        let first_seen = self.entries.get(token).map_or(line, |e| e.first_seen);
        self.entries.insert(
            token.to_string(),
            Entry {
                state: DescriptorState::Registered,
                registered: true,
                first_seen,
            },
        );
        self.linked.insert(token.to_string(), BTreeSet::new());
        Some((token.to_string(), DescriptorState::Registered, status, message))
    }

    fn link(&mut self, target: &str, rpc: &str, line: usize) -> Option<Outcome> {
        if target.is_empty() {
            return None;
        }
        // Registered and Linked are both valid predecessors of Linked.
        let existed = self.entries.contains_key(target);
        let entry = self.entries.entry(target.to_string()).or_insert(Entry {
            state: DescriptorState::Linked,
            registered: false,
            first_seen: line,
        });
        let (status, message) = if existed {
            (TransitionStatus::Success, None)
        } else {
            (
                TransitionStatus::Warn,
                Some("link to unregistered descriptor".to_string()),
            )
        };
        entry.state = DescriptorState::Linked;
        if !rpc.is_empty() {
            self.linked
                .entry(target.to_string())
                .or_default()
                .insert(rpc.to_string());
        }
        Some((target.to_string(), DescriptorState::Linked, status, message))
    }

    fn deregister(&mut self, token: &str) -> Option<Outcome> {
        if token.is_empty() {
            return None;
        }
        let (status, message) = match self.entries.remove(token) {
            None => (
                TransitionStatus::Error,
                Some("Not registered".to_string()),
            ),
            Some(entry) if entry.registered => (TransitionStatus::Success, None),
            Some(entry) => (
                TransitionStatus::Error,
                Some(format!("previous state: {}", entry.state)),
            ),
        };
        self.linked.remove(token);
        Some((token.to_string(), DescriptorState::Deregistered, status, message))
    }

    pub fn finish(mut self) -> ConsistencyReport {
        let mut leftovers: Vec<(String, Entry)> = self.entries.drain().collect();
        leftovers.sort_by_key(|(_, e)| e.first_seen);

        let leaks = leftovers
            .into_iter()
            .map(|(descriptor, entry)| {
                let attached = self
                    .linked
                    .remove(&descriptor)
                    .map(|set| set.into_iter().collect())
                    .unwrap_or_default();
                Leak {
                    descriptor,
                    state: entry.state,
                    registered: entry.registered,
                    attached,
                }
            })
            .collect();

        ConsistencyReport {
            transitions: self.transitions,
            leaks,
        }
    }
}

type Outcome = (String, DescriptorState, TransitionStatus, Option<String>);

/// Run the consistency pass over the trace lines of `pid` (or all pids)
pub fn check_descriptors(stream: &LogStream, pid: Option<u32>) -> Result<ConsistencyReport> {
    let mut checker = ConsistencyChecker::new();
    for record in stream.iter(RecordFilter::all().pid_opt(pid).trace_only())? {
        if let Some(line) = record.as_line() {
            checker.observe(line);
        }
    }
    let report = checker.finish();
    debug!(
        transitions = report.transitions.len(),
        leaks = report.leaks.len(),
        "consistency pass complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(lines: &[&str]) -> ConsistencyReport {
        let text: String = lines
            .iter()
            .map(|l| format!("01/23-12:34:56.78 host CaRT[3] il DBUG src/a.c:1 {l}\n"))
            .collect();
        check_descriptors(&LogStream::parse(&text).unwrap(), None).unwrap()
    }

    #[test]
    fn test_clean_lifecycle() {
        let report = check(&[
            "f(0xA) Registered new 'X' as root",
            "g(0x1) Link 'RPC' to 0xA",
            "f(0xA) Deregistered",
            "f(0xA) Registered new 'X' as root",
            "f(0xA) Deregistered",
        ]);
        assert!(!report.has_errors());
        assert_eq!(report.transitions.len(), 5);
        assert_eq!(report.transitions[1].descriptor, "0xA");
        assert_eq!(report.transitions[1].state, DescriptorState::Linked);
    }

    #[test]
    fn test_leak_reported_once() {
        let report = check(&[
            "f(0xA) Registered new 'X' as root",
            "g(0x1) Link 'RPC' to 0xA",
            "g(0x2) Link 'RPC' to 0xA",
            "f(0xB) Registered new 'Y' as root",
            "f(0xB) Deregistered",
        ]);
        assert_eq!(report.leaks.len(), 1);
        let leak = &report.leaks[0];
        assert_eq!(leak.descriptor, "0xA");
        assert!(leak.registered);
        assert_eq!(leak.attached, vec!["0x1".to_string(), "0x2".to_string()]);
        assert_eq!(report.registered_leaks().count(), 1);
    }

    #[test]
    fn test_registered_leak_message() {
        let report = check(&["f(0xA) Registered new 'X' as root"]);
        assert_eq!(report.leaks[0].message(), "0xA is not Deregistered");
    }

    #[test]
    fn test_double_registration() {
        let report = check(&[
            "f(0xA) Registered new 'X' as root",
            "f(0xA) Registered new 'X' as root",
            "f(0xA) Deregistered",
        ]);
        let findings: Vec<_> = report.findings().collect();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].status, TransitionStatus::Error);
        assert_eq!(findings[0].message.as_deref(), Some("previous state: Registered"));
        assert!(report.leaks.is_empty());
    }

    #[test]
    fn test_registration_after_link_is_error() {
        let report = check(&["g(0x1) Link 'RPC' to 0xA", "f(0xA) Registered new 'X' as root"]);
        let findings: Vec<_> = report.findings().collect();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[1].status, TransitionStatus::Error);
        assert_eq!(findings[1].state, DescriptorState::Registered);
        assert_eq!(findings[1].message.as_deref(), Some("previous state: Linked"));
    }

    #[test]
    fn test_second_link_to_linked_descriptor_succeeds() {
        let report = check(&["g(0x1) Link 'RPC' to 0xA", "g(0x2) Link 'RPC' to 0xA"]);
        assert_eq!(report.transitions.len(), 2);
        assert_eq!(report.transitions[0].status, TransitionStatus::Warn);
        assert_eq!(report.transitions[1].status, TransitionStatus::Success);
        assert_eq!(report.findings().count(), 1);
        assert_eq!(report.leaks[0].attached, vec!["0x1".to_string(), "0x2".to_string()]);
    }

    #[test]
    fn test_link_without_registration_warns() {
        let report = check(&["g(0x1) Link 'RPC' to 0xA"]);
        let findings: Vec<_> = report.findings().collect();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].status, TransitionStatus::Warn);
        assert_eq!(report.leaks.len(), 1);
        assert_eq!(report.leaks[0].message(), "0xA:Linked not Deregistered from state");
        assert_eq!(report.registered_leaks().count(), 0);
    }

    #[test]
    fn test_deregister_unknown() {
        let report = check(&["f(0xA) Deregistered"]);
        let findings: Vec<_> = report.findings().collect();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].message.as_deref(), Some("Not registered"));
        assert_eq!(findings[0].state, DescriptorState::Deregistered);
    }

    #[test]
    fn test_deregister_unregistered_link_is_error() {
        let report = check(&["g(0x1) Link 'RPC' to 0xA", "f(0xA) Deregistered"]);
        let findings: Vec<_> = report.findings().collect();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[1].message.as_deref(), Some("previous state: Linked"));
        assert!(report.leaks.is_empty());
    }

    #[test]
    fn test_nil_descriptor_ignored() {
        let report = check(&["f((nil)) Deregistered"]);
        assert!(report.transitions.is_empty());
    }
}
