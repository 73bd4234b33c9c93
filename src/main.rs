//! CLI entry point for the harvester tool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use harvester_core::{Pipeline, ProgressStore, TransferOutcome};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

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

    let config = args.to_config()?;

    if args.seeds.is_empty() {
        info!("No seed pages provided. Pass one or more http(s) URLs as arguments.");
        info!("Example: harvester -o ./videos https://example.com/videos");
        return Ok(());
    }

    info!(
        seeds = args.seeds.len(),
        output_dir = %config.output_dir.display(),
        min_duration_secs = config.min_duration_secs,
        "Harvester starting"
    );

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| format!("creating {}", config.output_dir.display()))?;

    let store = Arc::new(ProgressStore::load(&config.progress_path()).await?);
    if args.reset_visited {
        let cleared = store.reset_visited();
        info!(cleared, "Visited pages reset");
    }

    let cancel = Arc::new(AtomicBool::new(false));
    tokio::spawn({
        let cancel = Arc::clone(&cancel);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after in-flight chunks");
                cancel.store(true, Ordering::SeqCst);
            }
        }
    });

    let pipeline = Pipeline::from_config(&config, store, cancel)?;
    let summary = pipeline.run(args.seeds.clone()).await?;

    for (item, outcome) in &summary.outcomes {
        if let TransferOutcome::Failed { reason } = outcome {
            warn!(locator = %item.locator, title = %item.title, %reason, "Transfer failed");
        }
    }

    info!(
        pages_visited = summary.pages_visited,
        transferred = summary.transfers_succeeded,
        skipped = summary.transfers_skipped,
        failed = summary.transfers_failed(),
        "Harvest complete"
    );
    info!("{summary}");

    Ok(())
}
