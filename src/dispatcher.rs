//! Scan dispatcher: routes a decoded code to the marking endpoint or the offline queue.
//!
//! Display state: `Idle -> Showing(outcome) -> Idle` after the display timeout.
//! A newer scan replaces what is shown and restarts the timeout; it never
//! cancels a submission that is still in flight.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::client::MarkingEndpoint;
use crate::connectivity::ConnectivityMonitor;
use crate::model::{OutcomeKind, Operator, ScanOutcome};
use crate::queue::OfflineQueue;

pub const OFFLINE_PLACEHOLDER_NAME: &str = "Unknown (offline)";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("QR ID is required")]
    EmptyCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayState {
    Idle,
    Showing { seq: u64, outcome: ScanOutcome },
}

pub struct ScanDispatcher {
    queue: Arc<OfflineQueue>,
    endpoint: Arc<dyn MarkingEndpoint>,
    monitor: ConnectivityMonitor,
    operator: Operator,
    display_timeout: Duration,
    display: Arc<watch::Sender<DisplayState>>,
    seq: AtomicU64,
    refresh: watch::Sender<u64>,
}

impl ScanDispatcher {
    pub fn new(
        queue: Arc<OfflineQueue>,
        endpoint: Arc<dyn MarkingEndpoint>,
        monitor: ConnectivityMonitor,
        operator: Operator,
        display_timeout: Duration,
    ) -> Self {
        let (display, _) = watch::channel(DisplayState::Idle);
        let (refresh, _) = watch::channel(0);
        Self {
            queue,
            endpoint,
            monitor,
            operator,
            display_timeout,
            display: Arc::new(display),
            seq: AtomicU64::new(0),
            refresh,
        }
    }

    pub fn display(&self) -> watch::Receiver<DisplayState> {
        self.display.subscribe()
    }

    /// Bumped after every successful scan; stats and activity views watch it.
    pub fn refreshes(&self) -> watch::Receiver<u64> {
        self.refresh.subscribe()
    }

    /// Resolve a decoded code to a visible outcome.
    ///
    /// Empty codes are rejected before any I/O. Every other path yields an
    /// outcome, including storage and network failures.
    #[instrument(skip_all, fields(code = %code))]
    pub async fn submit(&self, code: &str) -> Result<ScanOutcome, ScanError> {
        if code.trim().is_empty() {
            return Err(ScanError::EmptyCode);
        }

        let outcome = if self.monitor.is_online() {
            self.submit_online(code).await
        } else {
            self.submit_offline(code).await
        };

        if outcome.kind == OutcomeKind::Success {
            self.refresh.send_modify(|n| *n += 1);
        }
        self.show(outcome.clone());
        Ok(outcome)
    }

    async fn submit_online(&self, code: &str) -> ScanOutcome {
        match self.endpoint.mark(code, &self.operator).await {
            Ok(result) => {
                info!(status = ?result.status, "scan resolved");
                ScanOutcome::from_mark(result)
            }
            Err(err) => {
                warn!(?err, "scan submission failed");
                ScanOutcome::error("Failed to mark attendance. Please try again.")
            }
        }
    }

    async fn submit_offline(&self, code: &str) -> ScanOutcome {
        let name = match self.queue.find_cached(code).await {
            Ok(Some(student)) => student.name,
            Ok(None) => OFFLINE_PLACEHOLDER_NAME.to_string(),
            Err(err) => {
                warn!(?err, "roster cache lookup failed");
                OFFLINE_PLACEHOLDER_NAME.to_string()
            }
        };
        match self.queue.enqueue(code, &name).await {
            Ok(id) => {
                info!(%id, "scan queued offline");
                ScanOutcome::success(format!("{name} marked present (offline)"), None)
            }
            Err(err) => {
                error!(?err, "scan not recorded");
                ScanOutcome::error("Scan not recorded: offline storage unavailable")
            }
        }
    }

    fn show(&self, outcome: ScanOutcome) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.display
            .send_replace(DisplayState::Showing { seq, outcome });

        let display = Arc::clone(&self.display);
        let hold = self.display_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            display.send_if_modified(|state| match state {
                DisplayState::Showing { seq: shown, .. } if *shown == seq => {
                    *state = DisplayState::Idle;
                    true
                }
                _ => false,
            });
        });
    }
}
