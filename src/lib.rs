#[macro_use]
extern crate log;

mod canonical;
mod cc_log;
mod collector;
pub mod find_roots;
pub mod graph;
mod sanity;

pub use crate::canonical::LabelCanonicalizer;
pub use crate::cc_log::{
    Atom, AtomTable, CcGraph, CcLog, CcResults, Edge, EdgeLabels, GraphNode, NodeId, NodeKind,
    ParseOptions, WeakMapEntry,
};
pub use crate::collector::{
    compute_internal_counts, compute_rc_roots, cycle_collect, flood, Simulation,
};
pub use crate::find_roots::{FindRootsConfig, RenderMode, RootFinder, SearchMode};
pub use crate::sanity::{
    check_file, check_graph, check_log, compare_results, Discrepancy, FileReport, GraphViolation,
};
