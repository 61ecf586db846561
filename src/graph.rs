//! Reachability-only views of a parsed [`CcGraph`].

use crate::cc_log::{CcGraph, NodeId};

/// A graph without edge multiplicities or labels
///
/// Successor lists are sorted and free of duplicates, so two simple graphs
/// over the same nodes are equal exactly when they have the same edges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimpleGraph {
    succ: Vec<Vec<NodeId>>,
}

impl SimpleGraph {
    pub fn from_edges(num_nodes: usize, edges: impl IntoIterator<Item = (NodeId, NodeId)>) -> Self {
        let mut succ = vec![vec![]; num_nodes];
        for (from, to) in edges {
            succ[from.index()].push(to);
        }
        for s in &mut succ {
            s.sort_unstable();
            s.dedup();
        }
        SimpleGraph { succ }
    }

    pub fn len(&self) -> usize {
        self.succ.len()
    }

    pub fn is_empty(&self) -> bool {
        self.succ.is_empty()
    }

    pub fn successors(&self, id: NodeId) -> &[NodeId] {
        &self.succ[id.index()]
    }

    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.succ.iter().enumerate().flat_map(|(from, s)| {
            s.iter().map(move |to| (NodeId::from_index(from), *to))
        })
    }

    /// The graph with every edge flipped
    pub fn reverse(&self) -> SimpleGraph {
        let mut succ = vec![vec![]; self.succ.len()];
        // Sources are visited in increasing order, so the lists come out sorted
        for (from, to) in self.edges() {
            succ[to.index()].push(from);
        }
        SimpleGraph { succ }
    }
}

impl From<&CcGraph> for SimpleGraph {
    fn from(graph: &CcGraph) -> Self {
        let succ = graph
            .node_ids()
            .map(|id| {
                let mut s: Vec<NodeId> = graph.edges(id).iter().map(|e| e.target).collect();
                s.sort_unstable();
                s
            })
            .collect();
        SimpleGraph { succ }
    }
}

/// Edge multiplicities without labels
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Multigraph {
    succ: Vec<Vec<(NodeId, u32)>>,
}

impl Multigraph {
    pub fn successors(&self, id: NodeId) -> &[(NodeId, u32)] {
        &self.succ[id.index()]
    }

    /// Flip every edge, keeping its multiplicity
    pub fn reverse(&self) -> Multigraph {
        let mut succ = vec![vec![]; self.succ.len()];
        for (from, s) in self.succ.iter().enumerate() {
            for (to, count) in s {
                succ[to.index()].push((NodeId::from_index(from), *count));
            }
        }
        Multigraph { succ }
    }

    pub fn to_simple(&self) -> SimpleGraph {
        SimpleGraph::from_edges(
            self.succ.len(),
            self.succ.iter().enumerate().flat_map(|(from, s)| {
                s.iter().map(move |(to, _)| (NodeId::from_index(from), *to))
            }),
        )
    }
}

impl From<&CcGraph> for Multigraph {
    fn from(graph: &CcGraph) -> Self {
        let succ = graph
            .node_ids()
            .map(|id| {
                let mut s: Vec<(NodeId, u32)> =
                    graph.edges(id).iter().map(|e| (e.target, e.count)).collect();
                s.sort_unstable();
                s
            })
            .collect();
        Multigraph { succ }
    }
}
