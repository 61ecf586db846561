//! Explain why an object in a cycle collector graph is alive by finding
//! paths to it from the roots.

use anyhow::Result;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::io::Write;

use crate::canonical::LabelCanonicalizer;
use crate::cc_log::{CcLog, NodeId};

mod render;
mod roots;
mod search;

pub use roots::{RootKind, RootSelection, RootSet};
pub use search::{PathSearch, RootPath, Via};

use render::PathPrinter;
use search::SearchGraph;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum SearchMode {
    /// Every path that does not share a node with an earlier one
    #[default]
    DepthFirst,
    /// A single shortest path
    BreadthFirst,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum RenderMode {
    #[default]
    Full,
    Addresses,
    /// One line per path, with labels reduced so that paths can be diffed
    Simple,
}

#[derive(Clone, Debug)]
pub struct FindRootsConfig {
    pub ignore_rc_roots: bool,
    pub ignore_gc_roots: bool,
    /// Treat nodes with exactly this label as roots
    pub stop_label: Option<String>,
    pub search: SearchMode,
    /// Let weak map entries keep their values alive
    pub weak_maps: bool,
    /// Assume every weak map is alive
    pub weak_maps_maps_live: bool,
    /// Also explain why each weak map used on a path is alive
    pub explain_weak_maps: bool,
    /// Paths to print per target in depth-first mode
    pub max_paths: Option<usize>,
    pub render: RenderMode,
    pub print_reverse: bool,
    pub roots_only: bool,
    pub canonicalizer: LabelCanonicalizer,
}

impl Default for FindRootsConfig {
    fn default() -> Self {
        FindRootsConfig {
            ignore_rc_roots: false,
            ignore_gc_roots: false,
            stop_label: None,
            search: SearchMode::DepthFirst,
            weak_maps: false,
            weak_maps_maps_live: false,
            explain_weak_maps: true,
            max_paths: None,
            render: RenderMode::Full,
            print_reverse: false,
            roots_only: false,
            canonicalizer: LabelCanonicalizer::default(),
        }
    }
}

impl FindRootsConfig {
    fn root_selection(&self) -> RootSelection {
        RootSelection {
            ignore_rc_roots: self.ignore_rc_roots,
            ignore_gc_roots: self.ignore_gc_roots,
            stop_label: self.stop_label.clone(),
        }
    }
}

/// What a target argument refers to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Targets {
    /// Looks like an address, but no node has it
    UnknownAddress(String),
    /// Nodes with that address, or whose label starts with the argument
    Nodes(Vec<NodeId>),
}

pub struct RootFinder<'a> {
    log: &'a CcLog,
    config: FindRootsConfig,
    roots: RootSet,
    graph: SearchGraph,
    address: Regex,
}

impl<'a> RootFinder<'a> {
    pub fn new(log: &'a CcLog, config: FindRootsConfig) -> Result<Self> {
        let roots = RootSet::select(log, &config.root_selection());
        debug!("{} roots", roots.len());
        let graph = SearchGraph::new(
            &log.graph,
            &roots,
            config.weak_maps,
            config.weak_maps_maps_live,
        );
        Ok(RootFinder {
            log,
            config,
            roots,
            graph,
            address: Regex::new(r"^(?:0x[0-9a-fA-F]+|[0-9A-F]+)$")?,
        })
    }

    pub fn roots(&self) -> &RootSet {
        &self.roots
    }

    pub fn resolve(&self, target: &str) -> Targets {
        let graph = &self.log.graph;
        if self.address.is_match(target) {
            return match graph.lookup(target) {
                Some(x) => Targets::Nodes(vec![x]),
                None => Targets::UnknownAddress(target.to_owned()),
            };
        }
        Targets::Nodes(
            graph
                .node_ids()
                .filter(|x| graph.label(*x).is_some_and(|l| l.starts_with(target)))
                .collect(),
        )
    }

    pub fn search(&self, target: NodeId) -> PathSearch {
        match self.config.search {
            SearchMode::DepthFirst => {
                search::find_roots_dfs(&self.graph, &self.roots, target, self.config.max_paths)
            }
            SearchMode::BreadthFirst => search::find_roots_bfs(&self.graph, &self.roots, target),
        }
    }

    /// Print the paths to every node `target` names
    pub fn run(&self, target: &str, out: &mut dyn Write) -> Result<()> {
        let targets = match self.resolve(target) {
            Targets::UnknownAddress(a) => {
                writeln!(out, "{} is not in the graph.", a)?;
                return Ok(());
            }
            Targets::Nodes(targets) if targets.is_empty() => {
                writeln!(out, "No matching class names found.")?;
                return Ok(());
            }
            Targets::Nodes(targets) => targets,
        };

        let printer = PathPrinter::new(self.log, &self.roots, &self.graph, &self.config)?;
        let mut explained: HashSet<NodeId> = HashSet::new();
        let mut maps: VecDeque<NodeId> = VecDeque::new();

        for x in targets {
            self.explain(&printer, x, &mut explained, &mut maps, out)?;
        }
        while let Some(map) = maps.pop_front() {
            writeln!(
                out,
                "Explaining why weak map {} is alive:",
                self.log.graph.address(map)
            )?;
            self.explain(&printer, map, &mut explained, &mut maps, out)?;
        }
        Ok(())
    }

    fn explain(
        &self,
        printer: &PathPrinter,
        x: NodeId,
        explained: &mut HashSet<NodeId>,
        maps: &mut VecDeque<NodeId>,
        out: &mut dyn Write,
    ) -> Result<()> {
        if !self.roots.contains(x) && self.graph.predecessors(x).next().is_none() {
            writeln!(
                out,
                "No other nodes point to {} and it is not a root.",
                self.log.graph.address(x)
            )?;
            writeln!(out)?;
            return Ok(());
        }

        info!("Searching graph for {}", self.log.graph.address(x));
        let found = self.search(x);
        for path in &found.paths {
            printer.print_path(path, out)?;
            if !self.config.explain_weak_maps {
                continue;
            }
            for i in path.weak_map_entries() {
                if let Some(map) = self.graph.map_needs_explaining(i) {
                    if explained.insert(map) {
                        maps.push_back(map);
                    }
                }
            }
        }

        if found.total_found == 0 {
            writeln!(out, "No roots found.")?;
            printer.print_incoming_edges(x, out)?;
            writeln!(out)?;
        } else if self.config.search == SearchMode::DepthFirst {
            if found.paths.len() < found.total_found {
                writeln!(
                    out,
                    "Displayed {} out of {} total paths found.",
                    found.paths.len(),
                    found.total_found
                )?;
            } else {
                writeln!(out, "Found and displayed {} paths.", found.total_found)?;
            }
        }
        Ok(())
    }
}
