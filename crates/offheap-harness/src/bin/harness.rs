//! CLI entrypoint for the off-heap allocator harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use offheap_harness::{LogEmitter, StressConfig, classify_request, load_config, run_stress};

/// Stress and configuration tooling for the off-heap allocator.
#[derive(Debug, Parser)]
#[command(name = "offheap-harness")]
#[command(about = "Stress and configuration harness for the off-heap free list allocator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Hammer one manager from many threads and check accounting and overlap.
    Stress {
        /// Worker threads.
        #[arg(long, default_value_t = 4)]
        threads: usize,
        /// Allocate/verify/release cycles per thread.
        #[arg(long, default_value_t = 10_000)]
        iterations: usize,
        /// Data size of every allocation, in bytes.
        #[arg(long, default_value_t = 64)]
        data_size: usize,
        /// Length of each slab, in bytes.
        #[arg(long, default_value_t = 1024 * 1024)]
        slab_size: usize,
        /// Number of slabs.
        #[arg(long, default_value_t = 4)]
        slabs: usize,
        /// Live chunks each thread keeps before releasing its oldest.
        #[arg(long, default_value_t = 16)]
        live_set: usize,
        /// Back slabs with anonymous mappings.
        #[arg(long)]
        mmap: bool,
        /// Allocator config JSON (defaults to `OFF_HEAP_*` environment variables).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Structured JSONL log output path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Output JSON report path (if omitted, prints to stdout).
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Print the size class and total size a request maps to.
    Classes {
        /// Requested data size in bytes.
        #[arg(long)]
        data_size: usize,
        /// Allocator config JSON (defaults to `OFF_HEAP_*` environment variables).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run the allocator config validators against a JSON file.
    ValidateConfig {
        /// Allocator config JSON.
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Stress {
            threads,
            iterations,
            data_size,
            slab_size,
            slabs,
            live_set,
            mmap,
            config,
            log,
            report,
        } => {
            let allocator = load_config(config.as_deref())?;
            let stress = StressConfig {
                threads,
                iterations,
                data_size,
                slab_size,
                slabs,
                live_set,
                mmap,
            };
            let mut emitter = match &log {
                Some(path) => {
                    let run_id = format!("stress-{}", std::process::id());
                    Some(LogEmitter::to_file(path, &run_id)?)
                }
                None => None,
            };
            let result = run_stress(&stress, &allocator, emitter.as_mut())?;

            eprintln!(
                "Stress complete: allocations={}, releases={}, out_of_memory={}, live={}, passed={}",
                result.allocations,
                result.releases,
                result.out_of_memory,
                result.live_chunks,
                result.passed
            );
            let json = serde_json::to_string_pretty(&result)?;
            match report {
                Some(path) => {
                    eprintln!("Writing report to {}", path.display());
                    std::fs::write(&path, json)?;
                }
                None => println!("{json}"),
            }
            if !result.passed {
                std::process::exit(1);
            }
        }
        Command::Classes { data_size, config } => {
            let allocator = load_config(config.as_deref())?;
            let class = classify_request(&allocator, data_size)?;
            println!("{}", serde_json::to_string_pretty(&class)?);
        }
        Command::ValidateConfig { config } => match load_config(Some(&config)) {
            Ok(valid) => {
                eprintln!("{}: valid", config.display());
                println!("{}", serde_json::to_string_pretty(&valid)?);
            }
            Err(err) => {
                eprintln!("{}: {err}", config.display());
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
