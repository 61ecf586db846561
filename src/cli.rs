use ccgraph::{FindRootsConfig, LabelCanonicalizer, ParseOptions, RenderMode, SearchMode};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Parser, Debug, Clone)]
pub struct CheckArgs {
    /// Cycle collector logs, optionally zstd compressed
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Let a node be logged more than once, keeping its last declaration
    #[arg(long, default_value_t = false)]
    pub allow_double_logging: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct FindRootsArgs {
    /// Cycle collector log, optionally zstd compressed
    pub path: String,

    /// An address, or a prefix of the class names to look for
    pub target: String,

    /// Ignore ref counted roots
    #[arg(short = 'i', long, default_value_t = false)]
    pub ignore_rc_roots: bool,

    /// Ignore marked JS objects as roots
    #[arg(short = 'j', long, default_value_t = false)]
    pub ignore_js_roots: bool,

    /// Treat nodes with this class name as extra roots
    #[arg(short = 'n', long, value_name = "CLASS_NAME")]
    pub node_name_as_root: Option<String>,

    /// Find every path that does not reuse a node (default)
    #[arg(long, default_value_t = false, conflicts_with = "breadth_first")]
    pub depth_first: bool,

    /// Find a single shortest path
    #[arg(short = 'b', long, default_value_t = false)]
    pub breadth_first: bool,

    /// Let weak map entries keep their values alive
    #[arg(long, default_value_t = false)]
    pub weak_maps: bool,

    /// Assume every weak map is alive
    #[arg(long, default_value_t = false, requires = "weak_maps")]
    pub weak_maps_maps_live: bool,

    /// Don't explain why the weak maps on a path are alive
    #[arg(long, default_value_t = false)]
    pub no_explain_weak_maps: bool,

    /// Print each path on one line with addresses removed
    #[arg(short = 's', long, default_value_t = false, conflicts_with = "addresses_only")]
    pub simple_path: bool,

    /// Print each path as a list of addresses
    #[arg(short = 'a', long, default_value_t = false)]
    pub addresses_only: bool,

    /// Print paths from the target back to the root
    #[arg(short = 'r', long, default_value_t = false)]
    pub print_reverse: bool,

    /// Only say which roots were found
    #[arg(long, default_value_t = false)]
    pub print_roots_only: bool,

    /// Only print out the first so many paths for each target
    #[arg(long, value_name = "N")]
    pub num_paths: Option<usize>,

    /// Class name prefix to group labels by in simple paths (repeatable)
    #[arg(long = "canonical-prefix", value_name = "PREFIX")]
    pub canonical_prefixes: Vec<String>,

    /// Let a node be logged more than once, keeping its last declaration
    #[arg(long, default_value_t = false)]
    pub allow_double_logging: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rerun the cycle collector over logs and compare with what it decided
    CheckCycleCollector(CheckArgs),
    /// Explain why an object is alive
    FindRoots(FindRootsArgs),
}

impl CheckArgs {
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            strict_double_logging: !self.allow_double_logging,
        }
    }
}

impl FindRootsArgs {
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            strict_double_logging: !self.allow_double_logging,
        }
    }

    pub fn config(&self) -> FindRootsConfig {
        let render = if self.simple_path {
            RenderMode::Simple
        } else if self.addresses_only {
            RenderMode::Addresses
        } else {
            RenderMode::Full
        };
        let canonicalizer = if self.canonical_prefixes.is_empty() {
            LabelCanonicalizer::dom_defaults()
        } else {
            LabelCanonicalizer::new(self.canonical_prefixes.iter().cloned())
        };
        FindRootsConfig {
            ignore_rc_roots: self.ignore_rc_roots,
            ignore_gc_roots: self.ignore_js_roots,
            stop_label: self.node_name_as_root.clone(),
            search: if self.breadth_first {
                SearchMode::BreadthFirst
            } else {
                SearchMode::DepthFirst
            },
            weak_maps: self.weak_maps,
            weak_maps_maps_live: self.weak_maps_maps_live,
            explain_weak_maps: !self.no_explain_weak_maps,
            max_paths: self.num_paths,
            render,
            print_reverse: self.print_reverse,
            roots_only: self.print_roots_only,
            canonicalizer,
        }
    }
}
