use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use attendance_scan::client::HttpMarkingClient;
use attendance_scan::config;
use attendance_scan::connectivity::ConnectivityMonitor;
use attendance_scan::model::Operator;
use attendance_scan::queue::OfflineQueue;
use attendance_scan::sync::SyncEngine;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Submit all pending offline scans to the marking service and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Exit successfully even if some scans remain queued
    #[arg(long)]
    allow_remaining: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let queue = Arc::new(OfflineQueue::new(cfg.queue_database_url()));
    queue.init().await?;

    let pending = queue.count_unsynced().await?;
    info!(pending, "initial sync state");
    if pending == 0 {
        info!("no pending scans, exiting");
        return Ok(());
    }

    let endpoint = Arc::new(HttpMarkingClient::from_config(&cfg)?);
    // a one-shot run assumes reachability; failures are per item
    let monitor = ConnectivityMonitor::new(true);
    let operator = Operator::new(cfg.client.operator_id.clone(), cfg.client.operator_name.clone());
    let engine = SyncEngine::new(Arc::clone(&queue), endpoint, monitor, operator);

    let report = engine.drain().await?;
    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        remaining = report.remaining,
        "drain finished"
    );
    if let Some(notice) = report.completion_notice() {
        println!("{}", notice);
    }
    for code in &report.dropped {
        println!("not recorded: {} is not in the roster", code);
    }
    queue.close().await;

    if report.remaining > 0 {
        if args.allow_remaining {
            warn!(remaining = report.remaining, "scans remain queued");
        } else {
            bail!("{} scans remain queued; retry later", report.remaining);
        }
    }
    Ok(())
}
