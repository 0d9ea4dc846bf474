//! KaaL Ring Trace
//!
//! Replays allocate/free scripts against the ring allocator and prints the
//! cursor positions after every step.
//!
//! Usage:
//!   kaal-ring-trace path/to/script.trace
//!   kaal-ring-trace --builtin wrap
//!   kaal-ring-trace --builtin all --quiet
//!   kaal-ring-trace --list

mod builtin;
mod runner;
mod script;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use std::fs;
use std::path::PathBuf;

use crate::runner::Runner;
use crate::script::{parse, parse_number};

#[derive(Parser, Debug)]
#[command(name = "kaal-ring-trace")]
#[command(version)]
#[command(about = "Replay allocate/free scripts against the KaaL ring allocator")]
struct Args {
    /// Script file to replay
    #[arg(conflicts_with = "builtin")]
    script: Option<PathBuf>,

    /// Run a bundled scenario instead ("all" runs every one)
    #[arg(short, long)]
    builtin: Option<String>,

    /// List bundled scenarios
    #[arg(long)]
    list: bool,

    /// Ring capacity in bytes (decimal or 0x hex)
    #[arg(short, long, default_value = "2048", value_parser = parse_capacity)]
    capacity: usize,

    /// Only print the per-script summary
    #[arg(short, long)]
    quiet: bool,
}

fn parse_capacity(s: &str) -> std::result::Result<usize, String> {
    parse_number(s).ok_or_else(|| format!("invalid capacity '{}'", s))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if args.list {
        for (name, _) in builtin::SCENARIOS {
            println!("{}", name);
        }
        return Ok(());
    }

    let scripts = load_scripts(&args)?;
    log::info!("Ring capacity: {} bytes", args.capacity);

    for (name, source) in &scripts {
        let steps = parse(source).with_context(|| format!("Failed to parse {}", name))?;

        println!("\n{} {}", "RESET:".bold(), name);
        let mut runner = Runner::new(args.capacity, args.quiet).context("Invalid ring capacity")?;
        let summary = runner
            .run(&steps)
            .with_context(|| format!("{} failed", name))?;

        println!(
            "{} {}: {} allocations ({} rejected), {} frees, {} checks",
            "✅".green(),
            name,
            summary.allocations,
            summary.rejected,
            summary.frees,
            summary.checks
        );
    }

    Ok(())
}

fn load_scripts(args: &Args) -> Result<Vec<(String, String)>> {
    match (&args.script, &args.builtin) {
        (Some(path), _) => {
            let source = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(vec![(path.display().to_string(), source)])
        }
        (None, Some(name)) if name == "all" => Ok(builtin::SCENARIOS
            .iter()
            .map(|(name, source)| (name.to_string(), source.to_string()))
            .collect()),
        (None, Some(name)) => match builtin::find(name) {
            Some(source) => Ok(vec![(name.clone(), source.to_string())]),
            None => bail!("Unknown scenario '{}' (see --list)", name),
        },
        (None, None) => bail!("Nothing to run: pass a script path or --builtin <name>"),
    }
}
