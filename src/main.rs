//! Command line entry point.
//!
//! Prints the chosen frame indices as a JSON array on stdout. Logs go to
//! stderr so the output stays machine readable.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use frame_path_optimizer_lib::{optimize_directory, OptimizerConfig};

fn init_tracing() {
    // Colored output for terminals, JSON when LOG_FORMAT=json
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("frame_path_optimizer_lib=info,frame_path_optimizer=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Pick the smoothest minimum-cost path through a numbered photo burst
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory of numbered frames (jpg, jpeg or png)
    frames_dir: PathBuf,

    /// JSON object overriding ratio_test, n_features, velocity_factor,
    /// window_size or threads
    config: Option<String>,
}

fn run(cli: Cli) -> Result<()> {
    let dir = cli.frames_dir;
    let config = match cli.config {
        Some(json) => OptimizerConfig::from_json(&json).context("Invalid configuration argument")?,
        None => OptimizerConfig::default(),
    };

    info!(?config, "starting");

    let path = optimize_directory(&dir, &config)
        .with_context(|| format!("Failed to optimize frames in {}", dir.display()))?;

    println!("{}", serde_json::to_string(&path.indices)?);
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
