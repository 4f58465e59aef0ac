//! rhythm - multicore execution time estimator
//!
//! Replays a captured pthread synchronization trace against a modeled
//! heterogeneous architecture and reports an estimated wall-clock time.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rhythm::driver;

#[derive(Parser)]
#[command(name = "rhythm")]
#[command(about = "Estimate multithreaded execution time from a pthread synchronization trace")]
struct Args {
    /// Architecture configuration file (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Trace manifest file: one trace-file path per line
    #[arg(short = 't', long = "trace-manifest")]
    trace_manifest: PathBuf,

    /// Directory to write the CSV reports into
    #[arg(short, long)]
    output_dir: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rhythm=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match driver::estimate(&args.config, &args.trace_manifest, &args.output_dir) {
        Ok(total_time) => {
            println!("estimated execution time: {:.6} s", total_time as f64 / 1e9);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(target: "rhythm", "simulation failed: {e}");
            ExitCode::FAILURE
        }
    }
}
