//! Causal hierarchy of a descriptor and the log transcript scoped to it

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::descriptor::{Attachment, DescriptorTable, ROOT};
use crate::error::Result;
use crate::filter::RecordFilter;
use crate::log_stream::LogStream;

/// One level of a descriptor's ancestry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HierarchyEntry {
    pub key: String,
    pub type_label: String,
    pub rpcs: Vec<Attachment>,
}

/// Ancestor chain of a descriptor, from the descriptor up towards root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Hierarchy {
    pub target: String,
    pub chain: Vec<HierarchyEntry>,
    /// Raw tokens of every descriptor and RPC in the chain
    pub tokens: BTreeSet<String>,
    pub errors: Vec<String>,
}

impl Hierarchy {
    /// Walk parent links from `key` up to root
    pub fn resolve(table: &DescriptorTable, key: &str) -> Self {
        let mut hierarchy = Self {
            target: key.to_string(),
            ..Self::default()
        };
        let mut visited = HashSet::new();
        let mut current = key.to_string();

        while current != ROOT {
            if !visited.insert(current.clone()) {
                hierarchy
                    .errors
                    .push(format!("Descriptor {} has a parent cycle", key));
                break;
            }
            let Some(node) = table.get(&current) else {
                if hierarchy.chain.is_empty() {
                    hierarchy.errors.push(format!(
                        "Descriptor {} not currently registered or linked",
                        key
                    ));
                    hierarchy.tokens.insert(current.clone());
                } else {
                    hierarchy
                        .errors
                        .push(format!("Descriptor {} does not trace back to root", key));
                }
                break;
            };
            let rpcs = table.attachments(&current).to_vec();
            hierarchy.tokens.insert(node.token.clone());
            hierarchy
                .tokens
                .extend(rpcs.iter().map(|a| a.rpc.clone()));
            hierarchy.chain.push(HierarchyEntry {
                key: node.key.clone(),
                type_label: node.type_label.clone(),
                rpcs,
            });
            current = node.parent.clone();
        }

        hierarchy
    }

    /// Root-most instance of the chain as (raw token, ordinal)
    fn anchor(&self, table: &DescriptorTable) -> (String, usize) {
        self.chain
            .last()
            .and_then(|entry| table.get(&entry.key))
            .map_or_else(|| (self.target.clone(), 0), |n| (n.token.clone(), n.ordinal))
    }

    /// Text listing: `TYPE: KEY` per level, attached RPCs indented
    pub fn listing(&self) -> Vec<String> {
        let mut out = Vec::new();
        for entry in &self.chain {
            out.push(format!("{}: {}", entry.type_label, entry.key));
            for rpc in &entry.rpcs {
                out.push(format!("\t{} {}", rpc.rpc_type, rpc.rpc));
            }
        }
        out
    }
}

/// One emitted transcript line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptLine {
    pub index: usize,
    pub marked: bool,
    pub text: String,
}

/// Log dump scoped to a descriptor's causal hierarchy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transcript {
    pub hierarchy: Hierarchy,
    pub lines: Vec<TranscriptLine>,
}

impl Transcript {
    pub fn marked(&self) -> impl Iterator<Item = &TranscriptLine> {
        self.lines.iter().filter(|l| l.marked)
    }

    pub fn has_errors(&self) -> bool {
        !self.hierarchy.errors.is_empty()
    }
}

/// Options for [`rpc_trace_output_logdump`]
#[derive(Debug, Clone, Copy)]
pub struct TranscriptOptions {
    /// Emit lines outside the hierarchy (unmarked) as well
    pub verbose: bool,
    pub pid: Option<u32>,
}

impl Default for TranscriptOptions {
    fn default() -> Self {
        Self {
            verbose: true,
            pid: None,
        }
    }
}

/// Produce the transcript for descriptor `key`
///
/// Scanning starts at the registration of the hierarchy's root-most
/// instance. From there every line whose descriptor belongs to the
/// hierarchy is marked; other lines are kept unmarked in verbose mode and
/// dropped otherwise.
pub fn rpc_trace_output_logdump(
    stream: &LogStream,
    table: &DescriptorTable,
    key: &str,
    options: TranscriptOptions,
) -> Result<Transcript> {
    let hierarchy = Hierarchy::resolve(table, key);
    let (anchor_token, anchor_ordinal) = hierarchy.anchor(table);

    let mut lines = Vec::new();
    let mut draining = false;
    let mut seen = 0usize;
    let mut emit = |index, marked, text| {
        lines.push(TranscriptLine {
            index,
            marked,
            text,
        })
    };

    for record in stream.iter(RecordFilter::all().pid_opt(options.pid).include_raw())? {
        if draining {
            let in_hierarchy = record
                .descriptor()
                .is_some_and(|d| hierarchy.tokens.contains(d));
            if in_hierarchy {
                emit(record.index(), true, record.render(true));
            } else if options.verbose {
                emit(record.index(), false, record.render(false));
            }
            continue;
        }

        if let Some(line) = record.as_line().filter(|l| l.is_new()) {
            if line.descriptor() == anchor_token {
                if seen == anchor_ordinal {
                    emit(record.index(), true, record.render(true));
                    draining = true;
                    continue;
                }
                seen += 1;
            }
        }

        if options.verbose {
            emit(record.index(), false, record.render(false));
        }
    }

    debug!(
        key,
        lines = lines.len(),
        started = draining,
        "transcript complete"
    );
    Ok(Transcript { hierarchy, lines })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::build_hierarchy;

    fn log(lines: &[&str]) -> LogStream {
        let text: String = lines
            .iter()
            .map(|l| {
                if l.starts_with('!') {
                    format!("{}\n", &l[1..])
                } else {
                    format!("01/23-12:34:56.78 host CaRT[3] il DBUG src/a.c:1 {l}\n")
                }
            })
            .collect();
        LogStream::parse(&text).unwrap()
    }

    fn dump(stream: &LogStream, key: &str, verbose: bool) -> Transcript {
        let table = build_hierarchy(stream, None).unwrap();
        rpc_trace_output_logdump(
            stream,
            &table,
            key,
            TranscriptOptions { verbose, pid: None },
        )
        .unwrap()
    }

    #[test]
    fn test_hierarchy_walks_to_root() {
        let s = log(&[
            "f(0x1) Registered new 'top' as root",
            "f(0x2) Registered new 'mid' from 0x1",
            "g(0x9) Link 'RPC' to 0x2",
        ]);
        let table = build_hierarchy(&s, None).unwrap();
        let h = Hierarchy::resolve(&table, "0x2");
        let keys: Vec<_> = h.chain.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["0x2", "0x1"]);
        assert!(h.tokens.contains("0x9"));
        assert!(h.errors.is_empty());
        assert_eq!(h.listing(), vec!["mid: 0x2", "\tRPC 0x9", "top: 0x1"]);
    }

    #[test]
    fn test_hierarchy_broken_chain() {
        let s = log(&["f(0x2) Registered new 'mid' from 0x1"]);
        let table = build_hierarchy(&s, None).unwrap();
        let h = Hierarchy::resolve(&table, "0x2");
        assert_eq!(h.errors, vec!["Descriptor 0x2 does not trace back to root"]);
    }

    #[test]
    fn test_hierarchy_unknown_key() {
        let table = DescriptorTable::default();
        let h = Hierarchy::resolve(&table, "0x5");
        assert!(h.chain.is_empty());
        assert_eq!(
            h.errors,
            vec!["Descriptor 0x5 not currently registered or linked"]
        );
    }

    #[test]
    fn test_hierarchy_self_parent_cycle_terminates() {
        let s = log(&["f(0x1) Registered new 'odd' from 0x1"]);
        let table = build_hierarchy(&s, None).unwrap();
        let h = Hierarchy::resolve(&table, "0x1");
        assert_eq!(h.chain.len(), 1);
        assert_eq!(h.errors.len(), 1);
    }

    #[test]
    fn test_quiet_dump_marks_hierarchy_only() {
        let s = log(&[
            "f(0xB) Registered new 'other' as root",
            "f(0xA) Registered new 'FOO' as root",
            "!interleaved output",
            "f(0xB) noise",
            "g(0x1) Link 'RPC' to 0xA",
            "a(0x1) [opc=0x5] allocated.",
        ]);
        let t = dump(&s, "0xA", false);
        let idx: Vec<_> = t.lines.iter().map(|l| l.index).collect();
        assert_eq!(idx, vec![2, 5, 6]);
        assert!(t.lines.iter().all(|l| l.marked));
    }

    #[test]
    fn test_verbose_dump_keeps_everything() {
        let s = log(&[
            "f(0xB) Registered new 'other' as root",
            "f(0xA) Registered new 'FOO' as root",
            "!interleaved output",
        ]);
        let t = dump(&s, "0xA", true);
        assert_eq!(t.lines.len(), 3);
        assert_eq!(t.lines[2].text, "interleaved output");
        assert!(!t.lines[0].marked);
        assert!(t.lines[1].marked);
        assert!(t.lines[1].text.contains(" ** "));
    }

    #[test]
    fn test_dump_starts_at_matching_instance() {
        let s = log(&[
            "f(0xA) Registered new 'X' as root",
            "f(0xA) Deregistered",
            "f(0xA) Registered new 'X' as root",
            "f(0xA) Deregistered",
        ]);
        let t = dump(&s, "0xA_1", false);
        let idx: Vec<_> = t.marked().map(|l| l.index).collect();
        assert_eq!(idx, vec![3, 4]);
    }

    #[test]
    fn test_dump_starts_at_root_most_ancestor() {
        let s = log(&[
            "f(0x1) Registered new 'top' as root",
            "f(0x7) noise before child",
            "f(0x2) Registered new 'mid' from 0x1",
        ]);
        let t = dump(&s, "0x2", false);
        let idx: Vec<_> = t.marked().map(|l| l.index).collect();
        assert_eq!(idx, vec![1, 3]);
    }
}
