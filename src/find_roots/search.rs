use fixedbitset::FixedBitSet;
use std::collections::{HashMap, VecDeque};

use super::roots::RootSet;
use crate::cc_log::{CcGraph, NodeId, WeakMapEntry};
use crate::graph::SimpleGraph;

/// How one node on a path keeps the next one alive
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Via {
    /// An ordinary edge in the graph
    Edge,
    /// The key of the weak map entry with this index keeps its value alive
    WeakMapEntry(usize),
    /// The key delegate of the weak map entry with this index keeps its key
    /// alive
    KeyDelegate(usize),
}

/// A chain of nodes from a root to a target. `hops[i]` joins `nodes[i]` to
/// `nodes[i + 1]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootPath {
    pub nodes: Vec<NodeId>,
    pub hops: Vec<Via>,
}

impl RootPath {
    pub fn root(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn target(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    /// Indices of the weak map entries this path relies on
    pub fn weak_map_entries(&self) -> impl Iterator<Item = usize> + '_ {
        self.hops.iter().filter_map(|h| match h {
            Via::WeakMapEntry(i) => Some(*i),
            _ => None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathSearch {
    pub target: NodeId,
    /// The paths that were kept, at most the requested number
    pub paths: Vec<RootPath>,
    /// How many paths were found in total
    pub total_found: usize,
}

/// Weak map entries turned into conditional edges
struct WeakMaps {
    entries: Vec<WeakMapEntry>,
    maps_live: bool,
    /// key or map -> entries it participates in
    by_trigger: HashMap<NodeId, Vec<usize>>,
    /// delegate -> (key, entry)
    delegate_of: HashMap<NodeId, Vec<(NodeId, usize)>>,
    /// Synthetic edges of the reversed graph: value -> key, key -> delegate.
    /// Entries whose map is dead are left out.
    reverse_hops: HashMap<NodeId, Vec<(NodeId, Via)>>,
}

impl WeakMaps {
    fn new(entries: &[WeakMapEntry], maps_live: bool) -> Self {
        let mut by_trigger: HashMap<NodeId, Vec<usize>> = HashMap::new();
        let mut delegate_of: HashMap<NodeId, Vec<(NodeId, usize)>> = HashMap::new();
        for (i, e) in entries.iter().enumerate() {
            let Some(key) = e.key else {
                continue;
            };
            by_trigger.entry(key).or_default().push(i);
            if let Some(map) = e.map {
                if map != key {
                    by_trigger.entry(map).or_default().push(i);
                }
            }
            if let Some(delegate) = e.key_delegate {
                delegate_of.entry(delegate).or_default().push((key, i));
            }
        }
        WeakMaps {
            entries: entries.to_vec(),
            maps_live,
            by_trigger,
            delegate_of,
            reverse_hops: HashMap::new(),
        }
    }

    fn map_is_live(&self, e: &WeakMapEntry, is_live: impl Fn(NodeId) -> bool) -> bool {
        self.maps_live || e.map.map_or(true, is_live)
    }

    fn add_reverse_hops(&mut self, alive: &FixedBitSet) {
        for (i, e) in self.entries.iter().enumerate() {
            let Some(key) = e.key else {
                continue;
            };
            if self.maps_live || e.map.map_or(true, |m| alive.contains(m.index())) {
                self.reverse_hops
                    .entry(e.value)
                    .or_default()
                    .push((key, Via::WeakMapEntry(i)));
            }
            if let Some(delegate) = e.key_delegate {
                self.reverse_hops
                    .entry(key)
                    .or_default()
                    .push((delegate, Via::KeyDelegate(i)));
            }
        }
    }
}

/// The graph the root finder walks: the simple graph in both directions,
/// plus weak map liveness when enabled
pub(super) struct SearchGraph {
    forward: SimpleGraph,
    reverse: SimpleGraph,
    weak: Option<WeakMaps>,
}

impl SearchGraph {
    pub(super) fn new(graph: &CcGraph, roots: &RootSet, weak_maps: bool, maps_live: bool) -> Self {
        let forward = SimpleGraph::from(graph);
        debug!("Reversing graph");
        let reverse = forward.reverse();
        let mut search_graph = SearchGraph {
            forward,
            reverse,
            weak: weak_maps.then(|| WeakMaps::new(graph.weak_map_entries(), maps_live)),
        };
        if search_graph.weak.is_some() {
            let alive = search_graph.flood(roots);
            if let Some(weak) = search_graph.weak.as_mut() {
                weak.add_reverse_hops(&alive);
            }
        }
        search_graph
    }

    /// Everything kept alive by the roots, following weak maps
    pub(super) fn flood(&self, roots: &RootSet) -> FixedBitSet {
        let mut alive = FixedBitSet::with_capacity(self.forward.len());
        let mut stack: Vec<NodeId> = roots.iter().map(|(x, _)| x).collect();
        while let Some(x) = stack.pop() {
            if alive.put(x.index()) {
                continue;
            }
            stack.extend(self.forward.successors(x));
            if let Some(weak) = &self.weak {
                if let Some(keys) = weak.delegate_of.get(&x) {
                    stack.extend(keys.iter().map(|(key, _)| *key));
                }
                for i in weak.by_trigger.get(&x).into_iter().flatten() {
                    let e = &weak.entries[*i];
                    let key_live = e.key.is_some_and(|k| alive.contains(k.index()));
                    if key_live && weak.map_is_live(e, |m| alive.contains(m.index())) {
                        stack.push(e.value);
                    }
                }
            }
        }
        alive
    }

    /// Nodes that directly keep `x` alive
    pub(super) fn predecessors(&self, x: NodeId) -> impl Iterator<Item = (NodeId, Via)> + '_ {
        let extra = self
            .weak
            .as_ref()
            .and_then(|w| w.reverse_hops.get(&x))
            .into_iter()
            .flatten()
            .copied();
        self.reverse
            .successors(x)
            .iter()
            .map(|y| (*y, Via::Edge))
            .chain(extra)
    }

    /// Graph edges into `x`
    pub(super) fn incoming_edges(&self, x: NodeId) -> &[NodeId] {
        self.reverse.successors(x)
    }

    pub(super) fn weak_map_entry(&self, i: usize) -> Option<&WeakMapEntry> {
        self.weak.as_ref().map(|w| &w.entries[i])
    }

    /// Whether the map of entry `i` needs its own explanation
    pub(super) fn map_needs_explaining(&self, i: usize) -> Option<NodeId> {
        let weak = self.weak.as_ref()?;
        if weak.maps_live {
            return None;
        }
        weak.entries[i].map
    }
}

struct Frame {
    node: NodeId,
    next: usize,
    preds: Vec<(NodeId, Via)>,
}

impl Frame {
    fn new(graph: &SearchGraph, node: NodeId) -> Self {
        Frame {
            node,
            next: 0,
            preds: graph.predecessors(node).collect(),
        }
    }
}

/// Walk backwards from `target` and report every root found, each with the
/// path that led to it
///
/// A node is visited at most once per search, so each node appears in at
/// most one path. Roots are not walked past. Paths beyond `max_paths` are
/// counted but not kept.
pub(super) fn find_roots_dfs(
    graph: &SearchGraph,
    roots: &RootSet,
    target: NodeId,
    max_paths: Option<usize>,
) -> PathSearch {
    let mut search = PathSearch {
        target,
        paths: vec![],
        total_found: 0,
    };
    let keep = |search: &mut PathSearch, path: RootPath| {
        if max_paths.map_or(true, |max| search.total_found < max) {
            search.paths.push(path);
        }
        search.total_found += 1;
    };

    let mut visited = FixedBitSet::with_capacity(graph.forward.len());
    visited.insert(target.index());
    if roots.contains(target) {
        keep(
            &mut search,
            RootPath {
                nodes: vec![target],
                hops: vec![],
            },
        );
        return search;
    }

    let mut stack = vec![Frame::new(graph, target)];
    while let Some(frame) = stack.last_mut() {
        let Some((z, via)) = frame.preds.get(frame.next).copied() else {
            stack.pop();
            continue;
        };
        frame.next += 1;
        if visited.put(z.index()) {
            continue;
        }
        if roots.contains(z) {
            // The stack holds the path from the target up to z's successor
            let mut nodes = vec![z];
            let mut hops = vec![via];
            for (i, f) in stack.iter().enumerate().rev() {
                nodes.push(f.node);
                if i > 0 {
                    hops.push(stack[i - 1].preds[stack[i - 1].next - 1].1);
                }
            }
            keep(&mut search, RootPath { nodes, hops });
        } else {
            stack.push(Frame::new(graph, z));
        }
    }
    search
}

#[derive(Clone, Copy)]
enum Parent {
    Start,
    Node(NodeId, Via),
}

/// Multi-source breadth-first search from every root at once, producing the
/// shortest path to `target` if there is one
pub(super) fn find_roots_bfs(graph: &SearchGraph, roots: &RootSet, target: NodeId) -> PathSearch {
    let n = graph.forward.len();
    let mut parents: Vec<Option<Parent>> = vec![None; n];
    let mut distances: Vec<u32> = vec![u32::MAX; n];
    let mut work_list: VecDeque<NodeId> = VecDeque::new();

    // Every root hangs off a fake start node at distance -1
    for (r, _) in roots.iter() {
        parents[r.index()] = Some(Parent::Start);
        distances[r.index()] = 0;
        work_list.push_back(r);
    }

    let mut limit = 0;
    while parents[target.index()].is_none() {
        let Some(x) = work_list.pop_front() else {
            break;
        };
        let dist = distances[x.index()];
        debug_assert!(dist >= limit, "work list should see nodes in increasing distance order");
        limit = dist;

        let mut next: Vec<(NodeId, Parent)> = graph
            .forward
            .successors(x)
            .iter()
            .map(|y| (*y, Parent::Node(x, Via::Edge)))
            .collect();
        if let Some(weak) = &graph.weak {
            for (key, i) in weak.delegate_of.get(&x).into_iter().flatten() {
                next.push((*key, Parent::Node(x, Via::KeyDelegate(*i))));
            }
            for i in weak.by_trigger.get(&x).into_iter().flatten() {
                let e = &weak.entries[*i];
                let Some(key) = e.key else {
                    continue;
                };
                // Both participants have to be reached no later than x
                let reached = |y: NodeId| distances[y.index()] <= dist;
                if reached(key) && weak.map_is_live(e, reached) {
                    next.push((e.value, Parent::Node(key, Via::WeakMapEntry(*i))));
                }
            }
        }
        for (y, parent) in next {
            if parents[y.index()].is_none() {
                parents[y.index()] = Some(parent);
                distances[y.index()] = dist + 1;
                work_list.push_back(y);
            }
        }
    }

    let mut search = PathSearch {
        target,
        paths: vec![],
        total_found: 0,
    };
    if parents[target.index()].is_none() {
        return search;
    }
    let mut nodes = vec![target];
    let mut hops = vec![];
    let mut p = target;
    while let Some(Parent::Node(prev, via)) = parents[p.index()] {
        nodes.push(prev);
        hops.push(via);
        p = prev;
    }
    nodes.reverse();
    hops.reverse();
    search.paths.push(RootPath { nodes, hops });
    search.total_found = 1;
    search
}

#[cfg(test)]
mod tests {
    use super::super::roots::RootSelection;
    use super::*;
    use crate::cc_log::{CcLog, ParseOptions};

    fn setup(text: &str, weak_maps: bool, maps_live: bool) -> (CcLog, RootSet, SearchGraph) {
        let log = CcLog::parse_str(text, &ParseOptions::default()).unwrap();
        let roots = RootSet::select(&log, &RootSelection::default());
        let graph = SearchGraph::new(&log.graph, &roots, weak_maps, maps_live);
        (log, roots, graph)
    }

    fn id(log: &CcLog, a: &str) -> NodeId {
        log.graph.lookup(a).unwrap()
    }

    fn addresses(log: &CcLog, path: &RootPath) -> Vec<String> {
        path.nodes
            .iter()
            .map(|x| log.graph.address(*x).to_owned())
            .collect()
    }

    const DIAMOND: &str = "\
R [gc.marked] root
> A
> B
A [gc] a
> C
B [gc] b
> X
X [gc] x
> C
C [gc] c
> T
T [gc] target
Q [gc] unreachable
> T
==========
";

    #[test]
    fn test_dfs_finds_a_path() {
        let (log, roots, graph) = setup(DIAMOND, false, false);
        let search = find_roots_dfs(&graph, &roots, id(&log, "T"), None);
        assert_eq!(search.total_found, 1);
        let path = &search.paths[0];
        assert_eq!(path.root(), id(&log, "R"));
        assert_eq!(path.target(), id(&log, "T"));
        assert_eq!(path.hops.len(), path.nodes.len() - 1);
        assert!(path.hops.iter().all(|h| *h == Via::Edge));
        for w in path.nodes.windows(2) {
            assert!(log.graph.edge(w[0], w[1]).is_some());
        }
    }

    #[test]
    fn test_bfs_finds_the_shortest_path() {
        let (log, roots, graph) = setup(DIAMOND, false, false);
        let search = find_roots_bfs(&graph, &roots, id(&log, "T"));
        assert_eq!(search.total_found, 1);
        assert_eq!(addresses(&log, &search.paths[0]), ["R", "A", "C", "T"]);
    }

    #[test]
    fn test_target_is_a_root() {
        let (log, roots, graph) = setup(DIAMOND, false, false);
        let r = id(&log, "R");
        for search in [
            find_roots_dfs(&graph, &roots, r, None),
            find_roots_bfs(&graph, &roots, r),
        ] {
            assert_eq!(search.paths, [RootPath { nodes: vec![r], hops: vec![] }]);
        }
    }

    #[test]
    fn test_unreachable_target() {
        let (log, roots, graph) = setup(DIAMOND, false, false);
        let q = id(&log, "Q");
        assert_eq!(find_roots_dfs(&graph, &roots, q, None).total_found, 0);
        assert_eq!(find_roots_bfs(&graph, &roots, q).total_found, 0);
    }

    #[test]
    fn test_dfs_multiple_roots_and_limit() {
        let text = "\
R1 [gc.marked] r1
> T
R2 [gc.marked] r2
> M
R3 [gc.marked] r3
> M
M [gc] m
> T
T [gc] t
==========
";
        let (log, roots, graph) = setup(text, false, false);
        let t = id(&log, "T");
        let all = find_roots_dfs(&graph, &roots, t, None);
        assert_eq!(all.total_found, 3);
        assert_eq!(all.paths.len(), 3);
        let mut found: Vec<Vec<String>> = all.paths.iter().map(|p| addresses(&log, p)).collect();
        found.sort();
        assert_eq!(found, [vec!["R1", "T"], vec!["R2", "M", "T"], vec!["R3", "M", "T"]]);

        let limited = find_roots_dfs(&graph, &roots, t, Some(1));
        assert_eq!(limited.total_found, 3);
        assert_eq!(limited.paths.len(), 1);
    }

    #[test]
    fn test_dfs_does_not_walk_past_roots() {
        let text = "R1 [gc.marked] r1\n> R2\nR2 [gc.marked] r2\n> T\nT [gc] t\n==========\n";
        let (log, roots, graph) = setup(text, false, false);
        let search = find_roots_dfs(&graph, &roots, id(&log, "T"), None);
        assert_eq!(search.total_found, 1);
        assert_eq!(addresses(&log, &search.paths[0]), ["R2", "T"]);
    }

    #[test]
    fn test_dfs_cycles_terminate() {
        let text = "A [gc] a\n> B\nB [gc] b\n> A\n> T\nT [gc] t\n> A\n==========\n";
        let (log, roots, graph) = setup(text, false, false);
        assert_eq!(find_roots_dfs(&graph, &roots, id(&log, "T"), None).total_found, 0);
    }

    #[test]
    fn test_dfs_long_chain() {
        let n = 100_000;
        let mut text = String::from("N0 [gc.marked] head\n");
        for i in 1..n {
            text.push_str(&format!("> N{}\nN{} [gc] link\n", i, i));
        }
        text.push_str("==========\n");
        let (log, roots, graph) = setup(&text, false, false);
        let tail = id(&log, &format!("N{}", n - 1));
        let search = find_roots_dfs(&graph, &roots, tail, None);
        assert_eq!(search.paths[0].nodes.len(), n);
        let search = find_roots_bfs(&graph, &roots, tail);
        assert_eq!(search.paths[0].nodes.len(), n);
    }

    const WEAK: &str = "\
Map [gc.marked] WeakMap
> Key
Key [gc] JS Object (Object)
Value [gc] JS Object (Function)
WeakMapEntry map=Map key=Key keyDelegate=(nil) value=Value
==========
";

    #[test]
    fn test_weak_map_value_is_reachable() {
        let (log, roots, graph) = setup(WEAK, true, false);
        let value = id(&log, "Value");
        let bfs = find_roots_bfs(&graph, &roots, value);
        assert_eq!(addresses(&log, &bfs.paths[0]), ["Map", "Key", "Value"]);
        assert_eq!(bfs.paths[0].hops, [Via::Edge, Via::WeakMapEntry(0)]);
        assert_eq!(bfs.paths[0].weak_map_entries().collect::<Vec<_>>(), [0]);

        let dfs = find_roots_dfs(&graph, &roots, value, None);
        assert_eq!(addresses(&log, &dfs.paths[0]), ["Map", "Key", "Value"]);
        assert_eq!(dfs.paths[0].hops, [Via::Edge, Via::WeakMapEntry(0)]);
    }

    #[test]
    fn test_weak_map_value_is_unreachable_without_weak_maps() {
        let (log, roots, graph) = setup(WEAK, false, false);
        let value = id(&log, "Value");
        assert_eq!(find_roots_bfs(&graph, &roots, value).total_found, 0);
        assert_eq!(find_roots_dfs(&graph, &roots, value, None).total_found, 0);
        assert!(!graph.flood(&roots).contains(value.index()));
    }

    const DEAD_MAP: &str = "\
R [gc.marked] root
> Key
Map [gc] WeakMap
Key [gc] key
Value [gc] value
WeakMapEntry map=Map key=Key keyDelegate=(nil) value=Value
==========
";

    #[test]
    fn test_weak_map_needs_a_live_map() {
        let (log, roots, graph) = setup(DEAD_MAP, true, false);
        let value = id(&log, "Value");
        assert_eq!(find_roots_bfs(&graph, &roots, value).total_found, 0);
        assert_eq!(find_roots_dfs(&graph, &roots, value, None).total_found, 0);
    }

    #[test]
    fn test_weak_maps_assumed_live() {
        let (log, roots, graph) = setup(DEAD_MAP, true, true);
        let value = id(&log, "Value");
        let bfs = find_roots_bfs(&graph, &roots, value);
        assert_eq!(addresses(&log, &bfs.paths[0]), ["R", "Key", "Value"]);
        assert_eq!(find_roots_dfs(&graph, &roots, value, None).total_found, 1);
        assert_eq!(graph.map_needs_explaining(0), None);
    }

    #[test]
    fn test_weak_map_key_delegate() {
        let text = "\
R [gc.marked] root
> D
D [gc] delegate
Key [gc] key
Value [gc] value
WeakMapEntry map=(nil) key=Key keyDelegate=D value=Value
==========
";
        let (log, roots, graph) = setup(text, true, false);
        let value = id(&log, "Value");
        let bfs = find_roots_bfs(&graph, &roots, value);
        assert_eq!(addresses(&log, &bfs.paths[0]), ["R", "D", "Key", "Value"]);
        assert_eq!(
            bfs.paths[0].hops,
            [Via::Edge, Via::KeyDelegate(0), Via::WeakMapEntry(0)]
        );
        let dfs = find_roots_dfs(&graph, &roots, value, None);
        assert_eq!(dfs.paths[0], bfs.paths[0]);
    }

    #[test]
    fn test_map_reached_after_key() {
        // The key is one hop from a root, the map three hops
        let text = "\
R [gc.marked] root
> Key
> A
A [gc] a
> B
B [gc] b
> Map
Map [gc] WeakMap
Key [gc] key
Value [gc] value
WeakMapEntry map=Map key=Key keyDelegate=(nil) value=Value
==========
";
        let (log, roots, graph) = setup(text, true, false);
        let value = id(&log, "Value");
        let bfs = find_roots_bfs(&graph, &roots, value);
        assert_eq!(addresses(&log, &bfs.paths[0]), ["R", "Key", "Value"]);
        assert_eq!(graph.map_needs_explaining(0), Some(id(&log, "Map")));
    }

    #[test]
    fn test_dfs_and_bfs_agree_on_existence() {
        let text = "\
R [rc=1] root
> A
A [rc=1] a
> B
B [rc=2] b
> C
C [gc] c
> B
> D
D [gc] d
E [gc.marked] e
> F
F [gc] f
> C
G [gc] g
> H
H [gc] h
> G
Map [gc] WeakMap
K [gc] key
V [gc] value
WeakMapEntry map=Map key=K keyDelegate=(nil) value=V
WeakMapEntry map=E key=F keyDelegate=(nil) value=H
IncrementalRoot K
==========
R [known=0]
";
        for (weak_maps, maps_live) in [(false, false), (true, false), (true, true)] {
            let (log, roots, graph) = setup(text, weak_maps, maps_live);
            let alive = graph.flood(&roots);
            for x in log.graph.node_ids() {
                let dfs = find_roots_dfs(&graph, &roots, x, Some(1));
                let bfs = find_roots_bfs(&graph, &roots, x);
                assert_eq!(
                    dfs.total_found > 0,
                    bfs.total_found > 0,
                    "{} weak_maps={} maps_live={}",
                    log.graph.address(x),
                    weak_maps,
                    maps_live
                );
                assert_eq!(bfs.total_found > 0, alive.contains(x.index()));
                if let (Some(d), Some(b)) = (dfs.paths.first(), bfs.paths.first()) {
                    assert!(b.nodes.len() <= d.nodes.len());
                }
            }
        }
    }
}
