//! Descriptor hierarchy reconstruction
//!
//! Descriptors are identified by addresses, and the runtime recycles those
//! addresses for unrelated objects. Every registration of an already seen
//! token therefore gets an ordinal key: `0xA`, then `0xA_1`, `0xA_2`, ...
//! Links and parent references resolve to whichever instance of the token
//! was registered most recently at the point the line occurs.

use std::collections::BTreeMap;

use fnv::FnvHashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::filter::RecordFilter;
use crate::log_line::LogLine;
use crate::log_stream::LogStream;

/// Parent of every top-level descriptor
pub const ROOT: &str = "root";

/// Running count of registrations per raw token
#[derive(Debug, Clone, Default)]
pub struct ReuseCounter {
    counts: FnvHashMap<String, usize>,
}

impl ReuseCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key of the `ordinal`-th registration of `token`
    pub fn key_for(token: &str, ordinal: usize) -> String {
        if ordinal == 0 {
            token.to_string()
        } else {
            format!("{}_{}", token, ordinal)
        }
    }

    /// Record a new registration, returning its key and ordinal
    pub fn register(&mut self, token: &str) -> (String, usize) {
        let count = self.counts.entry(token.to_string()).or_insert(0);
        let ordinal = *count;
        *count += 1;
        (Self::key_for(token, ordinal), ordinal)
    }

    /// Number of registrations of `token` seen so far
    pub fn count(&self, token: &str) -> usize {
        self.counts.get(token).copied().unwrap_or(0)
    }

    /// Key of the most recent registration, if there has been one
    pub fn active_key(&self, token: &str) -> Option<String> {
        match self.count(token) {
            0 => None,
            n => Some(Self::key_for(token, n - 1)),
        }
    }

    /// Key a reference to `token` resolves to; unregistered tokens stay as written
    pub fn resolve(&self, token: &str) -> String {
        self.active_key(token).unwrap_or_else(|| token.to_string())
    }
}

/// One registration of a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DescriptorNode {
    pub key: String,
    /// Raw token as written in the log
    pub token: String,
    pub ordinal: usize,
    pub type_label: String,
    /// Key of the parent instance, or [`ROOT`]
    pub parent: String,
    pub line: usize,
}

/// An RPC attached to a descriptor by a Link line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub rpc: String,
    pub rpc_type: String,
    pub line: usize,
}

/// How a node's parent resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRef<'a> {
    Root,
    Known(&'a DescriptorNode),
    Missing(&'a str),
}

/// Every descriptor instance of a log, in registration order
#[derive(Debug, Clone, Default, Serialize)]
pub struct DescriptorTable {
    nodes: Vec<DescriptorNode>,
    #[serde(skip)]
    index: FnvHashMap<String, usize>,
    attachments: BTreeMap<String, Vec<Attachment>>,
    link_errors: Vec<String>,
}

impl DescriptorTable {
    pub fn nodes(&self) -> &[DescriptorNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&DescriptorNode> {
        self.index.get(key).map(|&i| &self.nodes[i])
    }

    pub fn attachments(&self, key: &str) -> &[Attachment] {
        self.attachments.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Links that referenced a descriptor with no registration
    pub fn link_errors(&self) -> &[String] {
        &self.link_errors
    }

    pub fn parent_of<'a>(&'a self, node: &'a DescriptorNode) -> ParentRef<'a> {
        if node.parent == ROOT {
            return ParentRef::Root;
        }
        match self.get(&node.parent) {
            Some(parent) => ParentRef::Known(parent),
            None => ParentRef::Missing(&node.parent),
        }
    }

    /// Parent keys that name no registered descriptor, in table order
    pub fn missing_parents(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter_map(|node| match self.parent_of(node) {
                ParentRef::Missing(key) => Some(key.to_string()),
                _ => None,
            })
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        !self.link_errors.is_empty() || !self.missing_parents().is_empty()
    }
}

/// Builds a [`DescriptorTable`] from trace lines in file order
#[derive(Debug, Default)]
pub struct HierarchyBuilder {
    reuse: ReuseCounter,
    table: DescriptorTable,
}

impl HierarchyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, line: &LogLine) {
        if line.is_new() {
            self.register(line);
        } else if line.is_link() {
            self.link(line);
        }
    }

    fn register(&mut self, line: &LogLine) {
        let token = line.descriptor();
        let (Some(type_label), Some(parent)) = (line.type_label(), line.parent()) else {
            warn!(line = line.index(), "malformed registration skipped");
            return;
        };
        if token.is_empty() {
            return;
        }

        // Resolve the parent before registering, so a token naming itself
        // as parent points at its previous instance.
        let parent = if parent == ROOT {
            ROOT.to_string()
        } else {
            self.reuse.resolve(parent)
        };
        let (key, ordinal) = self.reuse.register(token);

        let node = DescriptorNode {
            key: key.clone(),
            token: token.to_string(),
            ordinal,
            type_label: type_label.to_string(),
            parent,
            line: line.index(),
        };
        self.table.index.insert(key.clone(), self.table.nodes.len());
        self.table.nodes.push(node);
        self.table.attachments.insert(key, Vec::new());
    }

    /// Link lines are written from the RPC's side: the line's descriptor is
    /// the RPC, and the last field is the descriptor it attaches to.
    fn link(&mut self, line: &LogLine) {
        let (Some(target), Some(rpc_type)) = (line.parent(), line.type_label()) else {
            warn!(line = line.index(), "malformed link skipped");
            return;
        };
        let key = self.reuse.resolve(target);
        match self.table.attachments.get_mut(&key) {
            Some(list) => list.push(Attachment {
                rpc: line.descriptor().to_string(),
                rpc_type: rpc_type.to_string(),
                line: line.index(),
            }),
            None => self
                .table
                .link_errors
                .push(format!("Descriptor {} is not present", key)),
        }
    }

    pub fn finish(self) -> DescriptorTable {
        self.table
    }
}

/// Build the descriptor table from the trace lines of `pid` (or all pids)
pub fn build_hierarchy(stream: &LogStream, pid: Option<u32>) -> Result<DescriptorTable> {
    let mut builder = HierarchyBuilder::new();
    for record in stream.iter(RecordFilter::all().pid_opt(pid).trace_only())? {
        if let Some(line) = record.as_line() {
            builder.observe(line);
        }
    }
    let table = builder.finish();
    debug!(
        descriptors = table.len(),
        link_errors = table.link_errors.len(),
        "hierarchy pass complete"
    );
    Ok(table)
}
