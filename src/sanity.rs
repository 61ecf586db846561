use std::fmt;
use std::path::Path;

use crate::cc_log::{CcGraph, CcLog, CcResults, NodeId, NodeKind, ParseOptions};
use crate::collector::cycle_collect;

/// A broken structural invariant of a parsed graph
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphViolation {
    NonPositiveRefCount { address: String },
    TargetNotInGraph { source: String, target: usize },
    IncrementalRootNotInGraph { index: usize },
    WeakMapEntryNotInGraph { index: usize },
    ResultNotInGraph { index: usize },
    GarbageAndRoot { address: String },
}

impl fmt::Display for GraphViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphViolation::NonPositiveRefCount { address } => {
                write!(f, "{} has a reference count of zero", address)
            }
            GraphViolation::TargetNotInGraph { source, target } => {
                write!(f, "{} has an edge to node #{}, which is not in the graph", source, target)
            }
            GraphViolation::IncrementalRootNotInGraph { index } => {
                write!(f, "incremental root #{} is not in the graph", index)
            }
            GraphViolation::WeakMapEntryNotInGraph { index } => {
                write!(f, "weak map entry {} refers to a node not in the graph", index)
            }
            GraphViolation::ResultNotInGraph { index } => {
                write!(f, "result for node #{}, which is not in the graph", index)
            }
            GraphViolation::GarbageAndRoot { address } => {
                write!(f, "{} is both garbage and a root", address)
            }
        }
    }
}

/// Basic coherence checks on a parsed log
///
/// The parser rejects all of these, so a violation here means the graph
/// was assembled some other way or the parser has a bug. RC and GC nodes
/// being disjoint, and every declared node having an edge list, hold by
/// construction of [`CcGraph`].
pub fn check_graph(log: &CcLog) -> Vec<GraphViolation> {
    let graph = &log.graph;
    let n = graph.len();
    let in_graph = |id: NodeId| id.index() < n;
    let mut violations = vec![];

    for id in graph.node_ids() {
        if let NodeKind::RefCounted(0) = graph.kind(id) {
            violations.push(GraphViolation::NonPositiveRefCount {
                address: graph.address(id).to_owned(),
            });
        }
        for edge in graph.edges(id) {
            if !in_graph(edge.target) {
                violations.push(GraphViolation::TargetNotInGraph {
                    source: graph.address(id).to_owned(),
                    target: edge.target.index(),
                });
            }
        }
    }

    for index in graph.incremental_roots.ones().filter(|i| *i >= n) {
        violations.push(GraphViolation::IncrementalRootNotInGraph { index });
    }

    for (index, entry) in graph.weak_map_entries().iter().enumerate() {
        let participants = [entry.map, entry.key, entry.key_delegate, Some(entry.value)];
        if participants.into_iter().flatten().any(|id| !in_graph(id)) {
            violations.push(GraphViolation::WeakMapEntryNotInGraph { index });
        }
    }

    let results = &log.results;
    for id in results.garbage.iter().chain(results.known_edges.keys()) {
        if !in_graph(*id) {
            violations.push(GraphViolation::ResultNotInGraph { index: id.index() });
        }
    }
    for id in results.garbage.iter().filter(|id| in_graph(**id)) {
        if results.known_edges.contains_key(id) {
            violations.push(GraphViolation::GarbageAndRoot {
                address: graph.address(*id).to_owned(),
            });
        }
    }

    violations
}

/// One way in which the logged and the recomputed collector results differ
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discrepancy {
    /// Garbage according to the log but not the simulation
    GarbageOnlyInLog(NodeId),
    /// Garbage according to the simulation but not the log
    GarbageOnlyInSimulation(NodeId),
    /// The log has known edges for it, the simulation found no root
    RootOnlyInLog(NodeId),
    /// The simulation found a root the log has no known edges for
    RootOnlyInSimulation(NodeId),
    KnownEdgesDiffer {
        node: NodeId,
        logged: u64,
        computed: u64,
    },
}

impl Discrepancy {
    pub fn describe(&self, graph: &CcGraph) -> String {
        match *self {
            Discrepancy::GarbageOnlyInLog(x) => format!(
                "{} was reported as garbage by the logged CC, but not the simulated CC.",
                graph.address(x)
            ),
            Discrepancy::GarbageOnlyInSimulation(x) => format!(
                "{} was reported as garbage by the simulated CC, but not the logged CC.",
                graph.address(x)
            ),
            Discrepancy::RootOnlyInLog(x) => format!(
                "{} had known edges reported, but the simulation did not think it was a root.",
                graph.address(x)
            ),
            Discrepancy::RootOnlyInSimulation(x) => format!(
                "{} is in the computed root set, but not the logged root set.",
                graph.address(x)
            ),
            Discrepancy::KnownEdgesDiffer {
                node,
                logged,
                computed,
            } => format!(
                "logged and simulated CC disagree on internal count for {} (computed {}, reported {})",
                graph.address(node),
                computed,
                logged
            ),
        }
    }
}

/// Every difference between the logged results and recomputed ones
pub fn compare_results(logged: &CcResults, computed: &CcResults) -> Vec<Discrepancy> {
    let mut discrepancies = vec![];
    discrepancies.extend(
        logged
            .garbage
            .difference(&computed.garbage)
            .map(|x| Discrepancy::GarbageOnlyInLog(*x)),
    );
    discrepancies.extend(
        computed
            .garbage
            .difference(&logged.garbage)
            .map(|x| Discrepancy::GarbageOnlyInSimulation(*x)),
    );
    for (x, logged_count) in &logged.known_edges {
        match computed.known_edges.get(x) {
            None => discrepancies.push(Discrepancy::RootOnlyInLog(*x)),
            Some(computed_count) if computed_count != logged_count => {
                discrepancies.push(Discrepancy::KnownEdgesDiffer {
                    node: *x,
                    logged: *logged_count,
                    computed: *computed_count,
                })
            }
            Some(_) => {}
        }
    }
    discrepancies.extend(
        computed
            .known_edges
            .keys()
            .filter(|x| !logged.known_edges.contains_key(x))
            .map(|x| Discrepancy::RootOnlyInSimulation(*x)),
    );
    debug_assert_eq!(discrepancies.is_empty(), logged == computed);
    discrepancies
}

/// The verdict for one log file
#[derive(Debug, Default)]
pub struct FileReport {
    /// One line per problem found; empty if the file checked out
    pub problems: Vec<String>,
}

impl FileReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Parse a log, check it is well formed, rerun the collector over it and
/// compare against what the collector logged
///
/// Errors along the way end up in the report rather than being returned,
/// so a batch of files can always be checked to the end.
pub fn check_file(path: impl AsRef<Path>, options: &ParseOptions) -> FileReport {
    let mut report = FileReport::default();
    info!("Parsing {}", path.as_ref().display());
    let log = match CcLog::from_path(path, options) {
        Ok(log) => log,
        Err(e) => {
            report.problems.push(format!("{:#}", e));
            return report;
        }
    };
    check_log(&log, &mut report);
    report
}

pub fn check_log(log: &CcLog, report: &mut FileReport) {
    info!("Checking graph");
    let violations = check_graph(log);
    if !violations.is_empty() {
        report
            .problems
            .extend(violations.iter().map(|v| v.to_string()));
        return;
    }
    info!("Running simulated CC");
    let computed = match cycle_collect(&log.graph) {
        Ok(r) => r,
        Err(e) => {
            report.problems.push(format!("{:#}", e));
            return;
        }
    };
    info!("Comparing results");
    report.problems.extend(
        compare_results(&log.results, &computed)
            .iter()
            .map(|d| d.describe(&log.graph)),
    );
}
