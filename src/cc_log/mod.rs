use anyhow::{Context, Result};
use fixedbitset::FixedBitSet;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

mod atoms;
mod parser;

pub use atoms::{Atom, AtomTable};
pub use parser::ParseOptions;

/// Dense index of a node, assigned in the order addresses are first seen
/// in the log.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> NodeId {
        debug_assert!(index <= u32::MAX as usize);
        NodeId(index as u32)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeKind {
    /// Reference counted, with the count the collector saw
    RefCounted(u64),
    /// Traced by the GC; `marked` is true if the GC found it reachable
    Gc { marked: bool },
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            NodeKind::RefCounted(rc) => write!(f, "rc={}", rc),
            NodeKind::Gc { marked } => write!(f, "gc{}", if marked { ".marked" } else { "" }),
        }
    }
}

pub type EdgeLabels = SmallVec<[Atom; 1]>;

/// All the edges from one node to one target, coalesced
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub target: NodeId,
    pub count: u32,
    pub labels: EdgeLabels,
}

#[derive(Clone, Debug)]
pub struct GraphNode {
    /// Shared with the address index of the graph
    pub address: Arc<str>,
    pub kind: NodeKind,
    pub label: Option<Atom>,
    pub edges: Vec<Edge>,
}

/// A conditional edge: `value` is alive if `map` and `key` are. A `None`
/// component was logged as a null pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeakMapEntry {
    pub map: Option<NodeId>,
    pub key: Option<NodeId>,
    pub key_delegate: Option<NodeId>,
    pub value: NodeId,
}

/// The heap graph section of a cycle collector log
#[derive(Debug)]
pub struct CcGraph {
    pub(crate) nodes: Vec<GraphNode>,
    pub(crate) ids: HashMap<Arc<str>, NodeId>,
    /// Node labels and edge labels
    pub(crate) atoms: AtomTable,
    pub(crate) weak_map_entries: Vec<WeakMapEntry>,
    pub(crate) incremental_roots: FixedBitSet,
}

impl CcGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId::from_index)
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id.index()]
    }

    pub fn lookup(&self, address: &str) -> Option<NodeId> {
        self.ids.get(address).copied()
    }

    pub fn address(&self, id: NodeId) -> &str {
        &self.nodes[id.index()].address
    }

    pub fn label(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.index()].label.map(|l| self.atoms.get(l))
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id.index()].kind
    }

    pub fn edges(&self, id: NodeId) -> &[Edge] {
        &self.nodes[id.index()].edges
    }

    pub fn edge(&self, from: NodeId, to: NodeId) -> Option<&Edge> {
        self.edges(from).iter().find(|e| e.target == to)
    }

    /// Labels of every logged edge from `from` to `to`
    pub fn edge_labels(&self, from: NodeId, to: NodeId) -> Vec<&str> {
        self.edge(from, to)
            .map(|e| e.labels.iter().map(|l| self.atoms.get(*l)).collect())
            .unwrap_or_default()
    }

    pub fn atoms(&self) -> &AtomTable {
        &self.atoms
    }

    pub fn ref_count(&self, id: NodeId) -> Option<u64> {
        match self.kind(id) {
            NodeKind::RefCounted(rc) => Some(rc),
            NodeKind::Gc { .. } => None,
        }
    }

    pub fn is_marked_gc(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Gc { marked: true })
    }

    pub fn rc_nodes(&self) -> impl Iterator<Item = (NodeId, u64)> + '_ {
        self.node_ids()
            .filter_map(|id| self.ref_count(id).map(|rc| (id, rc)))
    }

    pub fn gc_nodes(&self) -> impl Iterator<Item = (NodeId, bool)> + '_ {
        self.node_ids().filter_map(|id| match self.kind(id) {
            NodeKind::Gc { marked } => Some((id, marked)),
            NodeKind::RefCounted(_) => None,
        })
    }

    pub fn weak_map_entries(&self) -> &[WeakMapEntry] {
        &self.weak_map_entries
    }

    pub fn is_incremental_root(&self, id: NodeId) -> bool {
        self.incremental_roots.contains(id.index())
    }

    pub fn incremental_roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.incremental_roots.ones().map(NodeId::from_index)
    }

    /// `0x1 [nsFoo]` style description
    pub fn describe(&self, id: NodeId) -> String {
        format!("{} [{}]", self.address(id), self.label(id).unwrap_or(""))
    }
}

/// What the collector itself decided: the objects it freed, and for each
/// root, how many of its references the graph accounted for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CcResults {
    pub garbage: BTreeSet<NodeId>,
    pub known_edges: BTreeMap<NodeId, u64>,
}

#[derive(Debug)]
pub struct CcLog {
    pub graph: CcGraph,
    pub results: CcResults,
}

impl CcLog {
    pub fn from_path(p: impl AsRef<Path>, options: &ParseOptions) -> Result<CcLog> {
        let p = p.as_ref();
        let file = File::open(p).with_context(|| format!("Error opening file {}", p.display()))?;
        let log = if p.extension().is_some_and(|ext| ext == "zst") {
            let reader = zstd::Decoder::new(file)?;
            Self::parse(BufReader::new(reader), options)
        } else {
            Self::parse(BufReader::new(file), options)
        };
        log.with_context(|| format!("Error parsing {}", p.display()))
    }

    pub fn parse<R: BufRead>(reader: R, options: &ParseOptions) -> Result<CcLog> {
        parser::LogParser::new(options.clone())?.parse(reader)
    }

    pub fn parse_str(text: &str, options: &ParseOptions) -> Result<CcLog> {
        Self::parse(text.as_bytes(), options)
    }
}
