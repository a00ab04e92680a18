use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tracing::{info, warn};

use attendance_scan::client::{HttpMarkingClient, MarkingEndpoint};
use attendance_scan::config;
use attendance_scan::connectivity::ConnectivityMonitor;
use attendance_scan::dispatcher::ScanDispatcher;
use attendance_scan::model::{OutcomeKind, Operator};
use attendance_scan::queue::OfflineQueue;
use attendance_scan::scanner::CodeDebouncer;
use attendance_scan::sync::{spawn_sync_loop, SyncEngine};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Scanning device: one decoded code per stdin line; `:online`, `:offline`, `:sync`, `:pending`, `:quit` are commands"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Start with the reachability signal reporting offline
    #[arg(long)]
    offline: bool,
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
    queue.init().await.context("offline queue unavailable")?;

    let endpoint: Arc<dyn MarkingEndpoint> = Arc::new(HttpMarkingClient::from_config(&cfg)?);
    let monitor = ConnectivityMonitor::new(!args.offline);
    let operator = Operator::new(cfg.client.operator_id.clone(), cfg.client.operator_name.clone());

    if monitor.is_online() {
        match endpoint.roster().await {
            Ok(roster) => {
                queue.store_roster(&roster).await?;
                info!(count = roster.len(), "roster cached");
            }
            Err(err) => warn!(?err, "could not refresh roster cache"),
        }
    }

    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&queue),
        Arc::clone(&endpoint),
        monitor.clone(),
        operator.clone(),
    ));
    let sync_task = spawn_sync_loop(Arc::clone(&engine), monitor.clone(), cfg.sync_interval());

    let mut reports = engine.reports();
    let notices = tokio::spawn(async move {
        while reports.changed().await.is_ok() {
            let (notice, dropped) = match reports.borrow_and_update().as_ref() {
                Some(r) => (r.completion_notice(), r.dropped.clone()),
                None => (None, Vec::new()),
            };
            if let Some(notice) = notice {
                println!("sync: {}", notice);
            }
            for code in dropped {
                println!("sync: [NOT RECORDED] {} is not in the roster", code);
            }
        }
    });

    let dispatcher = ScanDispatcher::new(
        Arc::clone(&queue),
        endpoint,
        monitor.clone(),
        operator,
        cfg.display_timeout(),
    );
    let mut debouncer = CodeDebouncer::new(cfg.debounce_window());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            ":quit" => break,
            ":online" => monitor.set_online(true),
            ":offline" => monitor.set_online(false),
            ":pending" => println!("{} pending", queue.count_unsynced().await?),
            ":sync" => {
                let report = engine.drain().await?;
                println!(
                    "synced {} / failed {} / remaining {}",
                    report.succeeded, report.failed, report.remaining
                );
                for code in &report.dropped {
                    println!("[NOT RECORDED] {} is not in the roster", code);
                }
            }
            raw => {
                let Some(code) = debouncer.accept(raw, Instant::now()) else {
                    continue;
                };
                match dispatcher.submit(&code).await {
                    Ok(outcome) => {
                        let tag = match outcome.kind {
                            OutcomeKind::Success => "OK",
                            OutcomeKind::Duplicate => "DUPLICATE",
                            OutcomeKind::Error => "ERROR",
                        };
                        println!("[{}] {}", tag, outcome.message);
                    }
                    Err(err) => println!("[ERROR] {}", err),
                }
            }
        }
    }

    sync_task.abort();
    notices.abort();
    queue.close().await;
    Ok(())
}
