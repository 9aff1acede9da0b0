//! Command-line driver for the viua execution runtime: loads a module,
//! spins up the kernel's scheduler pools, and runs its `__entry` function
//! to completion.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use viua_kernel::kernel::{Kernel, ProcessOutcome, SchedulerConfig};

/// Runs a compiled viua module.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the executable module to run (resolved against the search
    /// path the same way an `import` instruction would).
    module: String,

    /// Number of bytecode worker threads.
    #[arg(long = "schedulers-vp", default_value_t = 1)]
    schedulers_vp: usize,

    /// Number of FFI worker threads.
    #[arg(long = "schedulers-ffi", default_value_t = 1)]
    schedulers_ffi: usize,

    /// Extra directory to search for modules, ahead of the default path.
    #[arg(long)]
    module_path: Option<std::path::PathBuf>,

    /// Emit a trace of every instruction executed, via `tracing`.
    #[arg(long)]
    trace: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.trace { "viua=info,viua_kernel=trace" } else { "viua=info,viua_kernel=info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| tracing_subscriber::EnvFilter::new(filter),
        ))
        .init();

    match run(args) {
        Ok(ProcessOutcome::Completed(value)) => {
            tracing::info!(result = %value.str(), "entry process completed");
            ExitCode::SUCCESS
        }
        Ok(ProcessOutcome::Failed(exc)) => {
            eprintln!("unhandled exception: {}: {}", exc.tag, exc.payload.str());
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: Args) -> Result<ProcessOutcome> {
    let config = SchedulerConfig {
        bytecode_workers: args.schedulers_vp.max(1),
        ffi_workers: args.schedulers_ffi.max(1),
        ..SchedulerConfig::default()
    };

    let mut kernel = Kernel::new(config);
    if let Some(dir) = args.module_path {
        kernel.add_search_dir(dir);
    }

    let kernel = Arc::new(kernel);
    kernel
        .run(&args.module)
        .context("running the entry module failed")
}
