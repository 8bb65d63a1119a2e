//! CLI entry point for the document harvest pipeline.

use anyhow::{Context, Result};
use clap::Parser;
use docharvest_core::{Config, pipeline};
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("Document harvest starting");

    // Configuration validation is the only fatal failure path: a
    // malformed file or missing required keys exits non-zero before
    // any stage runs.
    let config = Config::load(&args.config_file).with_context(|| {
        format!(
            "evaluation of configuration file {} failed",
            args.config_file.display()
        )
    })?;

    pipeline::run(config).await.context("pipeline failed")?;

    info!("Document harvest finished");
    Ok(())
}
