//! CLI entrypoint for the bkit-mem workload harness.

use std::path::PathBuf;

use bkit_mem::{BackendKind, DEFAULT_CAPACITY, TrackerConfig};
use bkit_mem_harness::{WorkloadSpec, run_workload, write_report};
use clap::{Parser, Subcommand};

/// Workload tooling for the bkit-mem allocation front end.
#[derive(Debug, Parser)]
#[command(name = "bkit-mem-harness")]
#[command(about = "Deterministic workloads against the bkit-mem allocation front end")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run an allocate/release/swap workload and emit a JSON report.
    Run {
        /// Tracking table slots.
        #[arg(long, default_value_t = DEFAULT_CAPACITY)]
        capacity: usize,
        /// Initial backend (`platform` or `system`).
        #[arg(long, default_value = "platform")]
        backend: String,
        /// Total allocations across all threads.
        #[arg(long, default_value_t = 4096)]
        allocs: usize,
        /// Release one held block after every n-th allocation (0 = never).
        #[arg(long, default_value_t = 2)]
        release_every: usize,
        /// Swap every primitive to this backend after the workers finish.
        #[arg(long)]
        swap_to: Option<String>,
        /// Worker threads sharing the front end.
        #[arg(long, default_value_t = 1)]
        threads: usize,
        /// Root seed (decimal or 0x...).
        #[arg(long, default_value = "0xDEAD_BEEF")]
        seed: String,
        /// Output file path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the configuration the process-wide front end would use.
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            capacity,
            backend,
            allocs,
            release_every,
            swap_to,
            threads,
            seed,
            output,
        } => {
            let spec = WorkloadSpec {
                capacity,
                backend: BackendKind::parse(&backend)?,
                allocs,
                release_every,
                swap_to: swap_to.as_deref().map(BackendKind::parse).transpose()?,
                threads,
                seed: parse_seed(&seed)?,
            };
            let report = run_workload(&spec)?;
            write_report(&report, output.as_deref())?;
            if let Some(path) = output {
                eprintln!("Wrote workload report to {}", path.display());
            }
        }
        Command::Config => {
            let config = TrackerConfig::from_env();
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn parse_seed(raw: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let s = raw.trim();
    let seed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        let hex = hex.replace('_', "");
        u64::from_str_radix(&hex, 16)?
    } else {
        let dec = s.replace('_', "");
        dec.parse::<u64>()?
    };
    Ok(seed)
}
