use anyhow::Result;
use regex::Regex;
use std::io::Write;

use super::roots::{RootKind, RootSet};
use super::search::{RootPath, SearchGraph, Via};
use super::{FindRootsConfig, RenderMode};
use crate::cc_log::{CcLog, NodeId, NodeKind};

const NO_PRIVATE: &str = " <no private>";

/// Turns root paths into text
pub(super) struct PathPrinter<'a> {
    log: &'a CcLog,
    roots: &'a RootSet,
    graph: &'a SearchGraph,
    config: &'a FindRootsConfig,
    hex: Regex,
}

impl<'a> PathPrinter<'a> {
    pub(super) fn new(
        log: &'a CcLog,
        roots: &'a RootSet,
        graph: &'a SearchGraph,
        config: &'a FindRootsConfig,
    ) -> Result<Self> {
        Ok(PathPrinter {
            log,
            roots,
            graph,
            config,
            hex: Regex::new(r"0x[0-9a-fA-F]+")?,
        })
    }

    fn node(&self, x: NodeId) -> String {
        self.log.graph.describe(x)
    }

    /// A label with the details that differ between otherwise identical
    /// objects removed
    fn simple_label(&self, label: &str) -> String {
        let label = label.strip_suffix(NO_PRIVATE).unwrap_or(label);
        let label = self.config.canonicalizer.canonicalize(label);
        self.hex.replace_all(label, "*").into_owned()
    }

    fn simple_node(&self, x: NodeId) -> String {
        format!("[{}]", self.simple_label(self.log.graph.label(x).unwrap_or("")))
    }

    fn hop_label(&self, from: NodeId, to: NodeId, via: Via) -> String {
        match via {
            Via::Edge => self.log.graph.edge_labels(from, to).join(", "),
            Via::WeakMapEntry(i) => {
                let map = self.graph.weak_map_entry(i).and_then(|e| e.map);
                format!(
                    "value in weak map {}",
                    map.map_or("(nil)", |m| self.log.graph.address(m))
                )
            }
            Via::KeyDelegate(_) => "key delegate".to_owned(),
        }
    }

    fn arrow(&self, label: &str, reverse: bool) -> String {
        if reverse {
            format!("<--[{}]--", label)
        } else {
            format!("--[{}]-->", label)
        }
    }

    fn root_kind_name(kind: Option<RootKind>) -> &'static str {
        match kind {
            Some(RootKind::RcRoot) => "ref counted root",
            Some(RootKind::GcRoot) => "GC root",
            Some(RootKind::StopNodeLabel) => "extra root class",
            None => "non-root",
        }
    }

    pub(super) fn print_path(&self, path: &RootPath, out: &mut dyn Write) -> Result<()> {
        match self.config.render {
            RenderMode::Full => self.print_full(path, out),
            RenderMode::Addresses => self.print_addresses(path, out),
            RenderMode::Simple => self.print_simple(path, out),
        }
    }

    fn print_full(&self, path: &RootPath, out: &mut dyn Write) -> Result<()> {
        if !self.config.roots_only {
            writeln!(out, "{}", self.node(path.root()))?;
            for (w, via) in path.nodes.windows(2).zip(&path.hops) {
                let label = self.hop_label(w[0], w[1], *via);
                writeln!(out, "    {} {}", self.arrow(&label, false), self.node(w[1]))?;
            }
            writeln!(out)?;
        }
        self.explain_root(path.root(), out)?;
        writeln!(out)?;
        Ok(())
    }

    fn print_addresses(&self, path: &RootPath, out: &mut dyn Write) -> Result<()> {
        let graph = &self.log.graph;
        if self.config.roots_only {
            writeln!(out, "{}", graph.address(path.root()))?;
            return Ok(());
        }
        let mut addresses: Vec<&str> = path.nodes.iter().map(|x| graph.address(*x)).collect();
        if self.config.print_reverse {
            addresses.reverse();
            writeln!(out, "{}", addresses.join(" <- "))?;
        } else {
            writeln!(out, "{}", addresses.join(" -> "))?;
        }
        Ok(())
    }

    fn print_simple(&self, path: &RootPath, out: &mut dyn Write) -> Result<()> {
        let root = path.root();
        let via = format!("via {} :", Self::root_kind_name(self.roots.kind(root)));
        if self.config.roots_only {
            writeln!(out, "{} {}", via, self.simple_node(root))?;
            return Ok(());
        }
        let reverse = self.config.print_reverse;
        let mut parts: Vec<String> = vec![self.simple_node(root)];
        for (w, hop) in path.nodes.windows(2).zip(&path.hops) {
            let label = self.simple_label(&self.hop_label(w[0], w[1], *hop));
            parts.push(self.arrow(&label, reverse));
            parts.push(self.simple_node(w[1]));
        }
        if reverse {
            parts.reverse();
            parts.push(via);
        } else {
            parts.insert(0, via);
        }
        writeln!(out, "{}", parts.join(" "))?;
        Ok(())
    }

    /// Say why `root` counts as a root
    pub(super) fn explain_root(&self, root: NodeId, out: &mut dyn Write) -> Result<()> {
        let graph = &self.log.graph;
        write!(out, "    Root {} ", graph.address(root))?;
        if self.roots.kind(root) == Some(RootKind::StopNodeLabel) {
            writeln!(out, "is an extra root class.")?;
            return Ok(());
        }
        match graph.kind(root) {
            NodeKind::RefCounted(rc) => {
                let known = self.log.results.known_edges.get(&root).copied();
                let unknown = known.map_or(0, |k| rc.saturating_sub(k));
                writeln!(
                    out,
                    "is a ref counted object with {} unknown edge{}.",
                    unknown,
                    if unknown == 1 { "" } else { "s" }
                )?;
                if known.is_some_and(|k| k > 0) {
                    self.print_incoming_edges(root, out)?;
                }
            }
            NodeKind::Gc { marked: true } => writeln!(out, "is a marked GC object.")?,
            NodeKind::Gc { marked: false } => writeln!(out, "is a GC object.")?,
        }
        if graph.is_incremental_root(root) {
            writeln!(
                out,
                "    It is an incremental root, which means it was touched during an incremental CC."
            )?;
        }
        Ok(())
    }

    /// List the edges into `x` that the graph knows about
    pub(super) fn print_incoming_edges(&self, x: NodeId, out: &mut dyn Write) -> Result<()> {
        let sources = self.graph.incoming_edges(x);
        if sources.is_empty() {
            return Ok(());
        }
        writeln!(out, "    known edges:")?;
        for y in sources {
            let label = self.hop_label(*y, x, Via::Edge);
            writeln!(
                out,
                "        {}  {} {}",
                self.node(*y),
                self.arrow(&label, false),
                self.log.graph.address(x)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::roots::RootSelection;
    use super::*;
    use crate::canonical::LabelCanonicalizer;
    use crate::cc_log::ParseOptions;

    const LOG: &str = "\
0x10 [rc=3] nsDocument normal http://0xdead/
> 0x20 mFirstChild
0x20 [gc] nsGenericElement (xhtml) span class='a' <no private>
> 0x30 mNodeInfo
> 0x30 mSelf
0x30 [rc=1] nsNodeInfo (xhtml)
0x40 [gc.marked] JS Object (Window)
> 0x10 mDoc
IncrementalRoot 0x40
==========
0x10 [known=1]
";

    fn render(config: FindRootsConfig, target: &str) -> String {
        let log = CcLog::parse_str(LOG, &ParseOptions::default()).unwrap();
        let roots = RootSet::select(&log, &RootSelection::default());
        let graph = SearchGraph::new(&log.graph, &roots, false, false);
        let printer = PathPrinter::new(&log, &roots, &graph, &config).unwrap();
        let ids: Vec<NodeId> = ["0x10", "0x20", "0x30"]
            .iter()
            .map(|a| log.graph.lookup(a).unwrap())
            .collect();
        let path = RootPath {
            nodes: ids,
            hops: vec![Via::Edge, Via::Edge],
        };
        assert_eq!(log.graph.address(path.target()), target);
        let mut out = vec![];
        printer.print_path(&path, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_full_path() {
        let text = render(FindRootsConfig::default(), "0x30");
        assert_eq!(
            text,
            "\
0x10 [nsDocument normal http://0xdead/]
    --[mFirstChild]--> 0x20 [nsGenericElement (xhtml) span class='a' <no private>]
    --[mNodeInfo, mSelf]--> 0x30 [nsNodeInfo (xhtml)]

    Root 0x10 is a ref counted object with 2 unknown edges.
    known edges:
        0x40 [JS Object (Window)]  --[mDoc]--> 0x10

"
        );
    }

    #[test]
    fn test_roots_only() {
        let config = FindRootsConfig {
            roots_only: true,
            ..Default::default()
        };
        let text = render(config, "0x30");
        assert!(text.starts_with("    Root 0x10 is a ref counted object"));
        assert!(!text.contains("mFirstChild"));
    }

    #[test]
    fn test_addresses() {
        let config = FindRootsConfig {
            render: RenderMode::Addresses,
            ..Default::default()
        };
        assert_eq!(render(config.clone(), "0x30"), "0x10 -> 0x20 -> 0x30\n");
        let config = FindRootsConfig {
            print_reverse: true,
            ..config
        };
        assert_eq!(render(config, "0x30"), "0x30 <- 0x20 <- 0x10\n");
    }

    #[test]
    fn test_simple() {
        let config = FindRootsConfig {
            render: RenderMode::Simple,
            ..Default::default()
        };
        assert_eq!(
            render(config.clone(), "0x30"),
            "via ref counted root : [nsDocument normal http://*/] --[mFirstChild]--> \
             [nsGenericElement (xhtml) span class='a'] --[mNodeInfo, mSelf]--> [nsNodeInfo (xhtml)]\n"
        );

        let config = FindRootsConfig {
            canonicalizer: LabelCanonicalizer::dom_defaults(),
            print_reverse: true,
            ..config
        };
        assert_eq!(
            render(config, "0x30"),
            "[nsNodeInfo (xhtml)] <--[mNodeInfo, mSelf]-- [nsGenericElement (xhtml) span ] \
             <--[mFirstChild]-- [nsDocument] via ref counted root :\n"
        );
    }

    #[test]
    fn test_explain_gc_incremental_root() {
        let log = CcLog::parse_str(LOG, &ParseOptions::default()).unwrap();
        let roots = RootSet::select(&log, &RootSelection::default());
        let graph = SearchGraph::new(&log.graph, &roots, false, false);
        let config = FindRootsConfig::default();
        let printer = PathPrinter::new(&log, &roots, &graph, &config).unwrap();
        let mut out = vec![];
        printer
            .explain_root(log.graph.lookup("0x40").unwrap(), &mut out)
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "    Root 0x40 is a marked GC object.\n    \
             It is an incremental root, which means it was touched during an incremental CC.\n"
        );
    }
}
