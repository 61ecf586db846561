use crate::cc_log::{CcLog, NodeId};

/// Why a node is treated as a root. When more than one reason applies the
/// first listed wins.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RootKind {
    /// The collector logged known edges for it, or it is an incremental root
    RcRoot,
    /// A marked GC object, or an incremental root
    GcRoot,
    /// Its label is the configured extra root class name
    StopNodeLabel,
}

#[derive(Clone, Debug, Default)]
pub struct RootSelection {
    pub ignore_rc_roots: bool,
    pub ignore_gc_roots: bool,
    pub stop_label: Option<String>,
}

#[derive(Debug)]
pub struct RootSet {
    kinds: Vec<Option<RootKind>>,
}

impl RootSet {
    pub fn select(log: &CcLog, selection: &RootSelection) -> RootSet {
        let graph = &log.graph;
        let stop_label = selection
            .stop_label
            .as_deref()
            .and_then(|l| graph.atoms().find(l));
        let kinds = graph
            .node_ids()
            .map(|x| {
                let incremental = graph.is_incremental_root(x);
                if !selection.ignore_rc_roots
                    && (log.results.known_edges.contains_key(&x) || incremental)
                {
                    Some(RootKind::RcRoot)
                } else if !selection.ignore_gc_roots && (graph.is_marked_gc(x) || incremental) {
                    Some(RootKind::GcRoot)
                } else if stop_label.is_some() && graph.node(x).label == stop_label {
                    Some(RootKind::StopNodeLabel)
                } else {
                    None
                }
            })
            .collect();
        RootSet { kinds }
    }

    pub fn kind(&self, x: NodeId) -> Option<RootKind> {
        self.kinds[x.index()]
    }

    pub fn contains(&self, x: NodeId) -> bool {
        self.kinds[x.index()].is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, RootKind)> + '_ {
        self.kinds
            .iter()
            .enumerate()
            .filter_map(|(i, k)| k.map(|k| (NodeId::from_index(i), k)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}
