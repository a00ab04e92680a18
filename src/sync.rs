//! Sync engine: drains the offline queue against the marking endpoint.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use crate::client::MarkingEndpoint;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::model::{MarkStatus, Operator};
use crate::queue::{OfflineQueue, QueueError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries confirmed recorded (newly marked or already present).
    pub succeeded: usize,
    /// Entries not recorded by this drain, whether retried later or not.
    pub failed: usize,
    pub pending_at_start: usize,
    pub remaining: usize,
    /// Codes removed from the queue without being recorded (not in the roster).
    pub dropped: Vec<String>,
    /// Another drain was in flight, or the device was offline.
    pub skipped: bool,
}

impl DrainReport {
    /// Operator notice, only when every entry of a non-empty batch was recorded.
    pub fn completion_notice(&self) -> Option<String> {
        if !self.skipped && self.pending_at_start > 0 && self.remaining == 0 && self.failed == 0 {
            Some(format!(
                "Successfully synced {} attendance records.",
                self.pending_at_start
            ))
        } else {
            None
        }
    }
}

pub struct SyncEngine {
    queue: Arc<OfflineQueue>,
    endpoint: Arc<dyn MarkingEndpoint>,
    monitor: ConnectivityMonitor,
    operator: Operator,
    in_flight: Mutex<()>,
    last_report: watch::Sender<Option<DrainReport>>,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<OfflineQueue>,
        endpoint: Arc<dyn MarkingEndpoint>,
        monitor: ConnectivityMonitor,
        operator: Operator,
    ) -> Self {
        let (last_report, _) = watch::channel(None);
        Self {
            queue,
            endpoint,
            monitor,
            operator,
            in_flight: Mutex::new(()),
            last_report,
        }
    }

    /// Latest report of a drain that actually ran.
    pub fn reports(&self) -> watch::Receiver<Option<DrainReport>> {
        self.last_report.subscribe()
    }

    /// Submit every unsynced entry in enqueue order.
    ///
    /// A drain already in flight makes this call return a skipped report
    /// instead of submitting the same entries twice.
    #[instrument(skip_all)]
    pub async fn drain(&self) -> Result<DrainReport, QueueError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            info!("drain already in flight");
            return Ok(DrainReport {
                skipped: true,
                ..Default::default()
            });
        };
        if !self.monitor.is_online() {
            let remaining = self.queue.count_unsynced().await? as usize;
            return Ok(DrainReport {
                pending_at_start: remaining,
                remaining,
                skipped: true,
                ..Default::default()
            });
        }

        let pending = self.queue.list_unsynced().await?;
        let mut report = DrainReport {
            pending_at_start: pending.len(),
            ..Default::default()
        };

        let mut cleared = 0;
        for item in &pending {
            match self.endpoint.mark(&item.code, &self.operator).await {
                Ok(result) if result.is_recorded() => {
                    if let Err(err) = self.queue.mark_synced(&item.id).await {
                        report.failed += 1;
                        error!(?err, id = %item.id, "recorded remotely but could not clear local entry");
                        continue;
                    }
                    cleared += 1;
                    report.succeeded += 1;
                    info!(id = %item.id, code = %item.code, status = ?result.status, "synced");
                }
                Ok(result) if result.status == MarkStatus::NotFound => {
                    // unknown codes will never resolve; stop retrying them
                    report.failed += 1;
                    if let Err(err) = self.queue.mark_synced(&item.id).await {
                        error!(?err, id = %item.id, "could not clear unknown code");
                        continue;
                    }
                    cleared += 1;
                    report.dropped.push(item.code.clone());
                    warn!(id = %item.id, code = %item.code, "queued code not in roster; dropped from queue");
                }
                Ok(result) => {
                    report.failed += 1;
                    warn!(id = %item.id, message = %result.message, "mark rejected; will retry");
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(?err, id = %item.id, "submission failed; will retry");
                }
            }
        }

        report.remaining = match self.queue.count_unsynced().await {
            Ok(n) => n as usize,
            Err(err) => {
                error!(?err, "could not recount pending scans");
                pending.len() - cleared
            }
        };
        if !report.dropped.is_empty() {
            warn!(codes = ?report.dropped, "scans dropped: codes not in roster");
        }
        if let Some(notice) = report.completion_notice() {
            info!("{}", notice);
        }
        self.last_report.send_replace(Some(report.clone()));
        Ok(report)
    }

    async fn drain_logged(&self) {
        match self.drain().await {
            Ok(report) if !report.skipped => {
                info!(
                    succeeded = report.succeeded,
                    failed = report.failed,
                    remaining = report.remaining,
                    "drain finished"
                );
            }
            Ok(_) => {}
            Err(err) => error!(?err, "drain aborted"),
        }
    }
}

/// Drain on every transition to online and on each interval tick while online.
///
/// An online-triggered drain restarts the interval, so drains stay at least
/// one interval apart except for those transitions. Runs until aborted.
pub async fn run_sync_loop(engine: Arc<SyncEngine>, monitor: ConnectivityMonitor, interval: Duration) {
    let mut events = monitor.subscribe();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ConnectivityEvent::Online) => {
                    engine.drain_logged().await;
                    ticker.reset();
                }
                Some(ConnectivityEvent::Offline) => {}
                None => break,
            },
            _ = ticker.tick() => {
                if monitor.is_online() {
                    engine.drain_logged().await;
                }
            }
        }
    }
}

pub fn spawn_sync_loop(
    engine: Arc<SyncEngine>,
    monitor: ConnectivityMonitor,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(run_sync_loop(engine, monitor, interval))
}
