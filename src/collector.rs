use anyhow::{bail, Result};
use fixedbitset::FixedBitSet;

use crate::cc_log::{CcGraph, CcResults, NodeId, NodeKind};
use crate::graph::SimpleGraph;

/// For each RC node, the number of references to it from inside the graph.
/// GC nodes always have an internal count of zero.
pub fn compute_internal_counts(graph: &CcGraph) -> Vec<u64> {
    let mut counts = vec![0u64; graph.len()];
    for id in graph.node_ids() {
        for edge in graph.edges(id) {
            if let NodeKind::RefCounted(_) = graph.kind(edge.target) {
                counts[edge.target.index()] += edge.count as u64;
            }
        }
    }
    counts
}

/// RC nodes with references from outside the graph, plus RC incremental
/// roots
pub fn compute_rc_roots(graph: &CcGraph, internal_counts: &[u64]) -> Result<FixedBitSet> {
    let mut roots = FixedBitSet::with_capacity(graph.len());
    for (id, rc) in graph.rc_nodes() {
        let ic = internal_counts[id.index()];
        if ic > rc {
            bail!(
                "computed internal count of {} ({}) is greater than its reference count ({})",
                graph.describe(id),
                ic,
                rc
            );
        }
        if rc > ic || graph.is_incremental_root(id) {
            roots.insert(id.index());
        }
    }
    Ok(roots)
}

/// Everything reachable from `seeds` along `graph`
pub fn flood(graph: &SimpleGraph, seeds: impl IntoIterator<Item = NodeId>) -> FixedBitSet {
    let mut live = FixedBitSet::with_capacity(graph.len());
    let mut mark_stack: Vec<NodeId> = seeds.into_iter().collect();
    while let Some(o) = mark_stack.pop() {
        if live.put(o.index()) {
            continue;
        }
        for child in graph.successors(o) {
            if !live.contains(child.index()) {
                mark_stack.push(*child);
            }
        }
    }
    live
}

/// An independent rerun of the cycle collector over a logged graph
///
/// This is the same basic idea as Bacon-Rajan '01, except the whole CC heap
/// is examined at once: a RC node whose reference count exceeds the number
/// of references the graph accounts for must be held from outside, and
/// anything not reachable from such a node or from a marked GC node is
/// garbage.
#[derive(Debug)]
pub struct Simulation {
    pub internal_counts: Vec<u64>,
    pub rc_roots: FixedBitSet,
    pub live: FixedBitSet,
    pub results: CcResults,
}

impl Simulation {
    pub fn run(graph: &CcGraph) -> Result<Simulation> {
        let internal_counts = compute_internal_counts(graph);
        let rc_roots = compute_rc_roots(graph, &internal_counts)?;
        debug!("{} ref counted roots", rc_roots.count_ones(..));

        let seeds = rc_roots
            .ones()
            .map(NodeId::from_index)
            .chain(graph.gc_nodes().filter(|(_, marked)| *marked).map(|(id, _)| id))
            .chain(graph.incremental_roots());
        let live = flood(&SimpleGraph::from(graph), seeds);

        let mut results = CcResults::default();
        for x in rc_roots.ones().map(NodeId::from_index) {
            results.known_edges.insert(x, internal_counts[x.index()]);
        }
        results.garbage = graph
            .node_ids()
            .filter(|id| !live.contains(id.index()))
            .collect();
        debug!(
            "{} live objects, {} garbage",
            live.count_ones(..),
            results.garbage.len()
        );

        Ok(Simulation {
            internal_counts,
            rc_roots,
            live,
            results,
        })
    }
}

/// Compute `(known edges, garbage)` the way the collector would have
pub fn cycle_collect(graph: &CcGraph) -> Result<CcResults> {
    Simulation::run(graph).map(|s| s.results)
}
