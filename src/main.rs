#[macro_use]
extern crate log;

use std::io::{self, BufWriter, Write};
use std::process::ExitCode;

use anyhow::Result;
use ccgraph::*;
use clap::Parser;

mod cli;

use cli::{Args, CheckArgs, Commands, FindRootsArgs};

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn get_git_info() -> String {
    match (built_info::GIT_COMMIT_HASH, built_info::GIT_DIRTY) {
        (Some(hash), Some(dirty)) => format!(
            "{}{}",
            hash.split_at(7).0,
            if dirty { "-dirty" } else { "" }
        ),
        (Some(hash), None) => format!("{}{}", hash.split_at(7).0, "-?"),
        _ => "unknown-git-version".to_string(),
    }
}

/// Checks each log in turn, writing a verdict per file and a summary line.
/// Returns true if every file checked out.
fn check_files(paths: &[String], options: &ParseOptions, out: &mut dyn Write) -> Result<bool> {
    let mut all_ok = true;
    for path in paths {
        writeln!(out, "Checking {}.", path)?;
        let report = check_file(path, options);
        if report.is_ok() {
            writeln!(out, "Ok.")?;
        } else {
            writeln!(out, "Error.")?;
            for problem in &report.problems {
                writeln!(out, "    {}", problem)?;
            }
            all_ok = false;
        }
    }
    if all_ok {
        writeln!(out, "All files were okay.")?;
    } else {
        writeln!(out, "Error: One or more files failed checking.")?;
    }
    Ok(all_ok)
}

fn check_cycle_collector(args: CheckArgs) -> Result<ExitCode> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let all_ok = check_files(&args.paths, &args.parse_options(), &mut out)?;
    out.flush()?;
    Ok(if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn find_roots(args: FindRootsArgs) -> Result<ExitCode> {
    info!("Parsing {}", args.path);
    let log = CcLog::from_path(&args.path, &args.parse_options())?;
    info!("Done loading graph, {} nodes", log.graph.len());
    let finder = RootFinder::new(&log, args.config())?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    finder.run(&args.target, &mut out)?;
    out.flush()?;
    Ok(ExitCode::SUCCESS)
}

pub fn main() -> Result<ExitCode> {
    env_logger::init();
    info!("ccgraph {}", get_git_info());
    let args = Args::parse();
    match args.command {
        Commands::CheckCycleCollector(args) => check_cycle_collector(args),
        Commands::FindRoots(args) => find_roots(args),
    }
}
