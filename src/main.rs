use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use attendance_scan::config;
use attendance_scan::marking::MarkingService;
use attendance_scan::roster::SheetLayout;
use attendance_scan::server::{self, AppState};
use attendance_scan::sheets::SheetsClient;

#[derive(Debug, Parser)]
#[command(author, version, about = "Attendance marking service backed by a spreadsheet roster")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override `server.bind`
    #[arg(long)]
    bind: Option<String>,
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

    let layout = SheetLayout::from_config(&cfg)?;
    let store = SheetsClient::from_config(&cfg)?;
    let marking = Arc::new(MarkingService::new(
        Arc::new(store),
        layout,
        cfg.request_timeout(),
    ));

    let bind = args.bind.unwrap_or_else(|| cfg.server.bind.clone());
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;

    info!(%bind, "starting marking service");
    server::serve(listener, AppState { marking }).await?;
    Ok(())
}
