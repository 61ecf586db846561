use super::*;
use anyhow::{anyhow, bail, ensure};
use regex::Regex;

#[derive(Clone, Debug)]
pub struct ParseOptions {
    /// Reject a node address that is declared twice. Logs from some
    /// embedded builds log objects twice and need this turned off.
    pub strict_double_logging: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            strict_double_logging: true,
        }
    }
}

/// Null pointers in weak map entries
const NULL_ADDRESSES: [&str; 3] = ["(nil)", "0x0", "0"];

/// The compiled line patterns of the log format
///
/// Lines are first classified by shape (leading token), and only then
/// matched against these. A line of a known shape that fails to match is a
/// corrupt log.
struct LineGrammar {
    node: Regex,
    edge: Regex,
    weak_map: Regex,
    incremental_root: Regex,
    result: Regex,
}

impl LineGrammar {
    fn new() -> Result<Self> {
        Ok(LineGrammar {
            node: Regex::new(r"^(\S+) \[([^\]]*)\](?: (.*))?$")?,
            edge: Regex::new(r"^> (\S+)(?: (.*))?$")?,
            weak_map: Regex::new(
                r"^WeakMapEntry map=(\S+) key=(\S+) keyDelegate=(\S+) value=(\S+)$",
            )?,
            incremental_root: Regex::new(r"^IncrementalRoot (\S+)$")?,
            result: Regex::new(r"^(\S+) \[(garbage|known=(\d+))\]$")?,
        })
    }
}

fn parse_node_tag(tag: &str) -> Option<NodeKind> {
    match tag {
        "gc" => Some(NodeKind::Gc { marked: false }),
        "gc.marked" => Some(NodeKind::Gc { marked: true }),
        _ => tag
            .strip_prefix("rc=")
            .and_then(|n| n.parse::<u64>().ok())
            .map(NodeKind::RefCounted),
    }
}

struct Slot {
    address: Arc<str>,
    declaration: Option<(NodeKind, Option<Atom>)>,
    edges: Vec<Edge>,
    first_seen: usize,
}

struct PendingWeakMapEntry<'a> {
    line: usize,
    components: [&'a str; 4],
}

/// Builds the graph while the node section is read. Addresses are interned
/// on first mention, so edges may point forward to nodes declared later.
struct GraphBuilder {
    options: ParseOptions,
    slots: Vec<Slot>,
    ids: HashMap<Arc<str>, NodeId>,
    atoms: AtomTable,
    current: Option<NodeId>,
    // target -> position in the current node's edge list
    current_edges: HashMap<NodeId, usize>,
    // inside the edges of a node line that was skipped
    skipping: bool,
    weak_map_entries: Vec<(usize, [String; 4])>,
    incremental_roots: Vec<(usize, String)>,
}

impl GraphBuilder {
    fn new(options: ParseOptions) -> Self {
        GraphBuilder {
            options,
            slots: vec![],
            ids: HashMap::new(),
            atoms: AtomTable::default(),
            current: None,
            current_edges: HashMap::new(),
            skipping: false,
            weak_map_entries: vec![],
            incremental_roots: vec![],
        }
    }

    fn intern(&mut self, address: &str, line: usize) -> NodeId {
        if let Some(id) = self.ids.get(address) {
            return *id;
        }
        let id = NodeId::from_index(self.slots.len());
        let address: Arc<str> = Arc::from(address);
        self.slots.push(Slot {
            address: address.clone(),
            declaration: None,
            edges: vec![],
            first_seen: line,
        });
        self.ids.insert(address, id);
        id
    }

    fn declare(
        &mut self,
        address: &str,
        kind: NodeKind,
        label: &str,
        line: usize,
    ) -> Result<()> {
        if let NodeKind::RefCounted(rc) = kind {
            ensure!(
                rc > 0,
                "line {}: node {} has a reference count of {}",
                line,
                address,
                rc
            );
        }
        let id = self.intern(address, line);
        let label = (!label.is_empty()).then(|| self.atoms.add(label));
        let slot = &mut self.slots[id.index()];
        if slot.declaration.is_some() {
            if self.options.strict_double_logging {
                bail!("line {}: node {} was logged twice", line, address);
            }
            warn!(
                "line {}: node {} was logged twice, keeping the last entry",
                line, address
            );
            slot.edges.clear();
        }
        slot.declaration = Some((kind, label));
        self.current = Some(id);
        self.current_edges.clear();
        self.skipping = false;
        Ok(())
    }

    /// Drop a node line that could not be understood, along with its edges
    fn skip_node(&mut self, line: usize, text: &str) {
        warn!("line {}: unknown node type, skipping: {}", line, text);
        self.current = None;
        self.current_edges.clear();
        self.skipping = true;
    }

    fn add_edge(&mut self, target: &str, label: &str, line: usize) -> Result<()> {
        if self.skipping {
            debug!("line {}: skipping edge to {}", line, target);
            return Ok(());
        }
        let source = self
            .current
            .ok_or_else(|| anyhow!("line {}: edge to {} before any node", line, target))?;
        let target = self.intern(target, line);
        let label = (!label.is_empty()).then(|| self.atoms.add(label));
        let edges = &mut self.slots[source.index()].edges;
        let i = *self.current_edges.entry(target).or_insert_with(|| {
            edges.push(Edge {
                target,
                count: 0,
                labels: SmallVec::new(),
            });
            edges.len() - 1
        });
        let edge = &mut edges[i];
        edge.count += 1;
        if let Some(label) = label {
            edge.labels.push(label);
        }
        Ok(())
    }

    fn add_weak_map_entry(&mut self, entry: PendingWeakMapEntry) -> Result<()> {
        let [map, key, key_delegate, value] = entry.components;
        ensure!(
            !NULL_ADDRESSES.contains(&value),
            "line {}: weak map entry has a null value",
            entry.line
        );
        self.weak_map_entries.push((
            entry.line,
            [map, key, key_delegate, value].map(str::to_owned),
        ));
        Ok(())
    }

    fn finish(self) -> Result<CcGraph> {
        let mut nodes = Vec::with_capacity(self.slots.len());
        for slot in self.slots {
            let Some((kind, label)) = slot.declaration else {
                bail!(
                    "line {}: edge to {}, which is not a node in the graph",
                    slot.first_seen,
                    slot.address
                );
            };
            let mut edges = slot.edges;
            edges.shrink_to_fit();
            nodes.push(GraphNode {
                address: slot.address,
                kind,
                label,
                edges,
            });
        }

        let mut graph = CcGraph {
            incremental_roots: FixedBitSet::with_capacity(nodes.len()),
            nodes,
            ids: self.ids,
            atoms: self.atoms,
            weak_map_entries: vec![],
        };

        for (line, address) in &self.incremental_roots {
            match graph.lookup(address) {
                Some(id) => graph.incremental_roots.insert(id.index()),
                None => warn!(
                    "line {}: incremental root {} is not in the graph",
                    line, address
                ),
            }
        }

        let resolve = |a: &str| -> std::result::Result<Option<NodeId>, ()> {
            if NULL_ADDRESSES.contains(&a) {
                Ok(None)
            } else {
                graph.lookup(a).map(Some).ok_or(())
            }
        };
        let mut weak_map_entries = Vec::with_capacity(self.weak_map_entries.len());
        for (line, [map, key, key_delegate, value]) in &self.weak_map_entries {
            match (
                resolve(map),
                resolve(key),
                resolve(key_delegate),
                resolve(value),
            ) {
                (Ok(map), Ok(key), Ok(key_delegate), Ok(Some(value))) => {
                    weak_map_entries.push(WeakMapEntry {
                        map,
                        key,
                        key_delegate,
                        value,
                    })
                }
                _ => warn!(
                    "line {}: dropping weak map entry with a participant that is not in the graph",
                    line
                ),
            }
        }
        graph.weak_map_entries = weak_map_entries;
        Ok(graph)
    }
}

enum Section {
    Graph(GraphBuilder),
    Results(CcGraph, CcResults),
}

pub(super) struct LogParser {
    grammar: LineGrammar,
    options: ParseOptions,
}

impl LogParser {
    pub(super) fn new(options: ParseOptions) -> Result<Self> {
        Ok(LogParser {
            grammar: LineGrammar::new()?,
            options,
        })
    }

    pub(super) fn parse<R: BufRead>(&self, mut reader: R) -> Result<CcLog> {
        let mut section = Section::Graph(GraphBuilder::new(self.options.clone()));
        let mut buf = String::with_capacity(1000);
        let mut line_number = 0;
        loop {
            buf.clear();
            if reader.read_line(&mut buf)? == 0 {
                break;
            }
            line_number += 1;
            let line = buf.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                continue;
            }
            section = match section {
                Section::Graph(mut builder) => {
                    if line.bytes().all(|b| b == b'=') {
                        debug!("Graph section ends at line {}", line_number);
                        Section::Results(builder.finish()?, CcResults::default())
                    } else {
                        self.graph_line(&mut builder, line, line_number)?;
                        Section::Graph(builder)
                    }
                }
                Section::Results(graph, mut results) => {
                    self.result_line(&graph, &mut results, line, line_number)?;
                    Section::Results(graph, results)
                }
            };
        }
        let (graph, results) = match section {
            // A log cut off before the separator still has a usable graph
            Section::Graph(builder) => {
                warn!("No results section found");
                (builder.finish()?, CcResults::default())
            }
            Section::Results(graph, results) => (graph, results),
        };
        info!(
            "Parsed {} nodes, {} weak map entries, {} garbage and {} known edge results",
            graph.len(),
            graph.weak_map_entries.len(),
            results.garbage.len(),
            results.known_edges.len()
        );
        Ok(CcLog { graph, results })
    }

    fn graph_line(&self, builder: &mut GraphBuilder, line: &str, n: usize) -> Result<()> {
        let g = &self.grammar;
        if line.starts_with('#') {
            return Ok(());
        }
        if line.starts_with('>') {
            let caps = g
                .edge
                .captures(line)
                .ok_or_else(|| anyhow!("line {}: malformed edge: {}", n, line))?;
            let label = caps.get(2).map_or("", |m| m.as_str());
            return builder.add_edge(&caps[1], label, n);
        }
        if line.starts_with("WeakMapEntry ") {
            let caps = g
                .weak_map
                .captures(line)
                .ok_or_else(|| anyhow!("line {}: malformed weak map entry: {}", n, line))?;
            let components = [1, 2, 3, 4].map(|i| caps.get(i).map_or("", |m| m.as_str()));
            return builder.add_weak_map_entry(PendingWeakMapEntry {
                line: n,
                components,
            });
        }
        if line.starts_with("IncrementalRoot ") {
            let caps = g
                .incremental_root
                .captures(line)
                .ok_or_else(|| anyhow!("line {}: malformed incremental root: {}", n, line))?;
            builder.incremental_roots.push((n, caps[1].to_owned()));
            return Ok(());
        }
        if let Some(caps) = g.node.captures(line) {
            let Some(kind) = parse_node_tag(&caps[2]) else {
                builder.skip_node(n, line);
                return Ok(());
            };
            let label = caps.get(3).map_or("", |m| m.as_str());
            return builder.declare(&caps[1], kind, label, n);
        }
        warn!("line {}: unknown line: {}", n, line);
        Ok(())
    }

    fn result_line(
        &self,
        graph: &CcGraph,
        results: &mut CcResults,
        line: &str,
        n: usize,
    ) -> Result<()> {
        let Some(caps) = self.grammar.result.captures(line) else {
            warn!("line {}: unknown result entry: {}", n, line);
            return Ok(());
        };
        let address = &caps[1];
        let id = graph
            .lookup(address)
            .ok_or_else(|| anyhow!("line {}: result for {}, which is not in the graph", n, address))?;
        match caps.get(3) {
            None => {
                ensure!(
                    !results.known_edges.contains_key(&id),
                    "line {}: {} is both garbage and a root",
                    n,
                    address
                );
                ensure!(
                    results.garbage.insert(id),
                    "line {}: {} was reported as garbage twice",
                    n,
                    address
                );
            }
            Some(known) => {
                let known: u64 = known
                    .as_str()
                    .parse()
                    .with_context(|| format!("line {}: bad known edge count", n))?;
                ensure!(
                    !results.garbage.contains(&id),
                    "line {}: {} is both garbage and a root",
                    n,
                    address
                );
                ensure!(
                    results.known_edges.insert(id, known).is_none(),
                    "line {}: found existing known edge count for {}",
                    n,
                    address
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<CcLog> {
        CcLog::parse_str(text, &ParseOptions::default())
    }

    #[test]
    fn test_parse_full_log() {
        let log = parse(
            "0x10 [rc=1] nsXPCWrappedJS (nsIDOMEventListener)\r\n\
             > 0x20 mJSObj\r\n\
             0x20 [gc.marked] JS Object (Function - onload)\r\n\
             > 0x30 fun_environment\r\n\
             0x30 [gc] Call <no private>\r\n\
             0x40 [gc] WeakMap\r\n\
             WeakMapEntry map=0x40 key=0x30 keyDelegate=(nil) value=0x10\r\n\
             IncrementalRoot 0x30\r\n\
             ==========\r\n\
             0x10 [known=1]\r\n\
             0x40 [garbage]\r\n",
        )
        .unwrap();
        let g = &log.graph;
        let ids: Vec<NodeId> = ["0x10", "0x20", "0x30", "0x40"]
            .iter()
            .map(|a| g.lookup(a).unwrap())
            .collect();
        assert_eq!(g.label(ids[2]), Some("Call <no private>"));
        assert_eq!(g.edge_labels(ids[1], ids[2]), ["fun_environment"]);
        assert_eq!(
            g.weak_map_entries(),
            [WeakMapEntry {
                map: Some(ids[3]),
                key: Some(ids[2]),
                key_delegate: None,
                value: ids[0],
            }]
        );
        assert!(g.is_incremental_root(ids[2]));
        assert_eq!(g.incremental_roots().count(), 1);
        assert_eq!(log.results.known_edges.get(&ids[0]), Some(&1));
        assert!(log.results.garbage.contains(&ids[3]));
    }

    #[test]
    fn test_every_node_has_an_entry() {
        let log = parse("0x1 [rc=1] A\n0x2 [gc] B\n==========\n").unwrap();
        assert_eq!(log.graph.len(), 2);
        for id in log.graph.node_ids() {
            assert!(log.graph.edges(id).is_empty());
        }
    }

    #[test]
    fn test_forward_edge_target() {
        let log = parse("0x1 [rc=1] A\n> 0x2 x\n0x2 [gc] B\n==========\n").unwrap();
        let a = log.graph.lookup("0x1").unwrap();
        let b = log.graph.lookup("0x2").unwrap();
        assert_eq!(log.graph.edges(a)[0].target, b);
    }

    #[test]
    fn test_undeclared_edge_target_is_an_error() {
        let err = parse("0x1 [rc=1] A\n> 0xdead x\n==========\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("0xdead"), "{}", msg);
        assert!(msg.contains("line 2"), "{}", msg);
    }

    #[test]
    fn test_zero_ref_count_is_an_error() {
        let err = parse("0x1 [rc=0] A\n==========\n").unwrap_err();
        assert!(err.to_string().contains("0x1"));
    }

    #[test]
    fn test_unknown_node_tag_is_skipped() {
        let log = parse("0x1 [gc] A\n0x2 [gray] B\n> 0x1 b\n0x3 [rc=abc] C\n==========\n").unwrap();
        assert_eq!(log.graph.len(), 1);
        assert_eq!(log.graph.lookup("0x2"), None);
        assert_eq!(log.graph.lookup("0x3"), None);
        let a = log.graph.lookup("0x1").unwrap();
        assert!(log.graph.edges(a).is_empty());

        // A later node line ends the skipped node's edges
        let log = parse("0x1 [gc] A\n0x2 [gray] B\n> 0x1\n0x3 [gc] C\n> 0x1 c\n==========\n").unwrap();
        let c = log.graph.lookup("0x3").unwrap();
        assert_eq!(log.graph.edge_labels(c, a), ["c"]);
        assert!(parse("0x1 [purple] A\n> 0x1\n0x1 [rc=0] A\n").is_err());
    }

    #[test]
    fn test_edge_before_node_is_an_error() {
        assert!(parse("> 0x1 a\n0x1 [gc] A\n").is_err());
    }

    #[test]
    fn test_malformed_known_shapes_are_errors() {
        assert!(parse("0x1 [gc] A\n>\n").is_err());
        assert!(parse("0x1 [gc] A\nWeakMapEntry map=0x1 key=0x1\n").is_err());
        assert!(parse("0x1 [gc] A\nWeakMapEntry map=0x1 key=0x1 keyDelegate=(nil) value=(nil)\n").is_err());
        assert!(parse("IncrementalRoot\u{20}\n").is_err());
    }

    #[test]
    fn test_unknown_lines_are_skipped() {
        let log = parse(
            "0x1 [rc=1] A\nsome new annotation\n> 0x2 x\n0x2 [gc] B\n==========\n0x1 [known=0]\nwhat is this\n0x2 [gray]\n",
        )
        .unwrap();
        assert_eq!(log.graph.len(), 2);
        assert_eq!(log.results.known_edges.len(), 1);
        assert!(log.results.garbage.is_empty());
    }

    #[test]
    fn test_double_logging() {
        let text = "0x1 [rc=1] A\n> 0x2 x\n0x2 [gc] B\n0x1 [rc=1] A\n> 0x2 y\n==========\n";
        let err = parse(text).unwrap_err();
        assert!(err.to_string().contains("logged twice"));

        let relaxed = ParseOptions {
            strict_double_logging: false,
        };
        let log = CcLog::parse_str(text, &relaxed).unwrap();
        let a = log.graph.lookup("0x1").unwrap();
        let b = log.graph.lookup("0x2").unwrap();
        let edge = log.graph.edge(a, b).unwrap();
        assert_eq!(edge.count, 1);
        assert_eq!(log.graph.edge_labels(a, b), ["y"]);
        assert_eq!(log.graph.edges(a).len(), 1);

        let text = "0x1 [rc=1] A\n> 0x2\n0x2 [gc] B\n0x1 [rc=2] Z\n==========\n";
        let log = CcLog::parse_str(text, &relaxed).unwrap();
        let a = log.graph.lookup("0x1").unwrap();
        assert_eq!(log.graph.kind(a), NodeKind::RefCounted(2));
        assert_eq!(log.graph.label(a), Some("Z"));
        assert!(log.graph.edges(a).is_empty());
    }

    #[test]
    fn test_repeated_node_does_not_inflate_counts() {
        let text = "\
A [rc=1] a
> B
B [rc=1] b
> C
C [rc=1] c
B [rc=1] b
> C
==========
A [known=0]
";
        let relaxed = ParseOptions {
            strict_double_logging: false,
        };
        let log = CcLog::parse_str(text, &relaxed).unwrap();
        let b = log.graph.lookup("B").unwrap();
        let c = log.graph.lookup("C").unwrap();
        assert_eq!(log.graph.edge(b, c).unwrap().count, 1);
        assert_eq!(crate::collector::cycle_collect(&log.graph).unwrap(), log.results);
    }

    #[test]
    fn test_results_for_unknown_node_is_an_error() {
        assert!(parse("0x1 [gc] A\n==========\n0x2 [garbage]\n").is_err());
    }

    #[test]
    fn test_garbage_and_known_is_an_error() {
        let err = parse("0x1 [rc=1] A\n==========\n0x1 [garbage]\n0x1 [known=0]\n").unwrap_err();
        assert!(err.to_string().contains("both garbage and a root"));
        assert!(parse("0x1 [rc=1] A\n==========\n0x1 [known=0]\n0x1 [garbage]\n").is_err());
    }

    #[test]
    fn test_duplicate_results_are_errors() {
        assert!(parse("0x1 [gc] A\n==========\n0x1 [garbage]\n0x1 [garbage]\n").is_err());
        assert!(parse("0x1 [rc=1] A\n==========\n0x1 [known=0]\n0x1 [known=1]\n").is_err());
    }

    #[test]
    fn test_weak_map_with_unknown_participant_is_dropped() {
        let log = parse(
            "0x1 [gc] A\n0x2 [gc] B\nWeakMapEntry map=0x99 key=0x1 keyDelegate=0x0 value=0x2\n==========\n",
        )
        .unwrap();
        assert!(log.graph.weak_map_entries().is_empty());
    }

    #[test]
    fn test_unknown_incremental_root_is_dropped() {
        let log = parse("0x1 [gc] A\nIncrementalRoot 0x2\n==========\n").unwrap();
        assert_eq!(log.graph.incremental_roots().count(), 0);
    }

    #[test]
    fn test_missing_separator() {
        let log = parse("0x1 [gc] A\n").unwrap();
        assert_eq!(log.graph.len(), 1);
        assert_eq!(log.results, CcResults::default());
    }
}
