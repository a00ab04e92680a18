mod common;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use attendance_scan::client::{EndpointError, MarkingEndpoint};
use attendance_scan::connectivity::ConnectivityMonitor;
use attendance_scan::dispatcher::ScanDispatcher;
use attendance_scan::model::{AttendanceRecord, MarkResult, Operator, OutcomeKind};
use attendance_scan::queue::OfflineQueue;
use attendance_scan::sync::{spawn_sync_loop, SyncEngine};
use common::{
    marking_service, memory_queue, operator, roster_row, transport_error, MemoryStore,
    RecordingEndpoint,
};

fn roster() -> Vec<Vec<String>> {
    vec![
        roster_row("Ada", "IEEE-042", "Absent"),
        roster_row("Grace", "IEEE-043", "Present"),
        roster_row("Linus", "IEEE-044", "Absent"),
        roster_row("Barbara", "IEEE-045", "Absent"),
    ]
}

#[tokio::test]
async fn offline_scans_sync_once_back_online() {
    let store = MemoryStore::with_roster(roster());
    let endpoint: Arc<dyn MarkingEndpoint> = marking_service(store.clone());
    let queue = memory_queue().await;
    let monitor = ConnectivityMonitor::new(false);

    let dispatcher = ScanDispatcher::new(
        queue.clone(),
        endpoint.clone(),
        monitor.clone(),
        operator(),
        Duration::from_secs(3),
    );
    for code in ["IEEE-042", "IEEE-044", "IEEE-045"] {
        let outcome = dispatcher.submit(code).await.unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Success);
    }
    assert_eq!(queue.count_unsynced().await.unwrap(), 3);
    assert_eq!(store.update_count().await, 0);

    monitor.set_online(true);
    let engine = SyncEngine::new(queue.clone(), endpoint, monitor, operator());
    let report = engine.drain().await.unwrap();

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.remaining, 0);
    assert_eq!(
        report.completion_notice().as_deref(),
        Some("Successfully synced 3 attendance records.")
    );
    assert_eq!(queue.count_unsynced().await.unwrap(), 0);
    for code in ["IEEE-042", "IEEE-044", "IEEE-045"] {
        assert_eq!(store.status_of(code).await.as_deref(), Some("Present"));
    }
    assert_eq!(store.log_rows().await.len(), 3);
    assert_eq!(engine.reports().borrow().clone(), Some(report));
}

#[tokio::test]
async fn already_marked_counts_as_synced() {
    let store = MemoryStore::with_roster(roster());
    let queue = memory_queue().await;
    queue.enqueue("IEEE-043", "Grace").await.unwrap();

    let engine = SyncEngine::new(
        queue.clone(),
        marking_service(store.clone()),
        ConnectivityMonitor::new(true),
        operator(),
    );
    let report = engine.drain().await.unwrap();

    assert_eq!((report.succeeded, report.failed, report.remaining), (1, 0, 0));
    assert_eq!(store.update_count().await, 0);
}

#[tokio::test]
async fn unknown_code_is_dropped_and_counted_failed() {
    let store = MemoryStore::with_roster(roster());
    let queue = memory_queue().await;
    let id = queue.enqueue("IEEE-999", "Unknown (offline)").await.unwrap();

    let engine = SyncEngine::new(
        queue.clone(),
        marking_service(store),
        ConnectivityMonitor::new(true),
        operator(),
    );
    let report = engine.drain().await.unwrap();

    assert_eq!((report.succeeded, report.failed, report.remaining), (0, 1, 0));
    assert_eq!(report.dropped, vec!["IEEE-999"]);
    assert!(report.completion_notice().is_none());
    assert!(queue.get(&id).await.unwrap().unwrap().synced);
}

#[tokio::test]
async fn mixed_batch_reports_dropped_code_instead_of_full_success() {
    let store = MemoryStore::with_roster(roster());
    let queue = memory_queue().await;
    for code in ["IEEE-042", "IEEE-999", "IEEE-044"] {
        queue.enqueue(code, "Volunteer scan").await.unwrap();
    }

    let engine = SyncEngine::new(
        queue.clone(),
        marking_service(store.clone()),
        ConnectivityMonitor::new(true),
        operator(),
    );
    let report = engine.drain().await.unwrap();

    assert_eq!((report.succeeded, report.failed, report.remaining), (2, 1, 0));
    assert_eq!(report.dropped, vec!["IEEE-999"]);
    assert_eq!(report.completion_notice(), None);
    assert_eq!(store.status_of("IEEE-042").await.as_deref(), Some("Present"));
    assert_eq!(store.status_of("IEEE-044").await.as_deref(), Some("Present"));
}

/// Marks through the service, but the local queue breaks on the first call.
struct QueueBreakingEndpoint {
    queue: Arc<OfflineQueue>,
    inner: RecordingEndpoint,
}

#[async_trait]
impl MarkingEndpoint for QueueBreakingEndpoint {
    async fn mark(&self, code: &str, operator: &Operator) -> Result<MarkResult, EndpointError> {
        self.queue.close().await;
        self.inner.mark(code, operator).await
    }

    async fn roster(&self) -> Result<Vec<AttendanceRecord>, EndpointError> {
        self.inner.roster().await
    }
}

#[tokio::test]
async fn local_storage_failure_does_not_abort_the_batch() {
    let store = MemoryStore::with_roster(roster());
    let queue = memory_queue().await;
    queue.enqueue("IEEE-042", "Ada").await.unwrap();
    queue.enqueue("IEEE-044", "Linus").await.unwrap();

    let inner = RecordingEndpoint::delegating(marking_service(store.clone()));
    let endpoint = QueueBreakingEndpoint {
        queue: queue.clone(),
        inner: inner.clone(),
    };
    let engine = SyncEngine::new(
        queue.clone(),
        Arc::new(endpoint),
        ConnectivityMonitor::new(true),
        operator(),
    );
    let report = engine.drain().await.unwrap();

    assert_eq!(inner.calls().await, vec!["IEEE-042", "IEEE-044"]);
    assert_eq!((report.succeeded, report.failed, report.remaining), (0, 2, 2));
    assert!(report.completion_notice().is_none());
    assert_eq!(store.status_of("IEEE-044").await.as_deref(), Some("Present"));
}

#[tokio::test]
async fn transport_failure_keeps_entry_and_continues() {
    let store = MemoryStore::with_roster(roster());
    let endpoint = RecordingEndpoint::delegating(marking_service(store.clone()));
    endpoint.push_response(Err(transport_error())).await;

    let queue = memory_queue().await;
    let first = queue.enqueue("IEEE-042", "Ada").await.unwrap();
    queue.enqueue("IEEE-044", "Linus").await.unwrap();

    let engine = SyncEngine::new(
        queue.clone(),
        Arc::new(endpoint.clone()),
        ConnectivityMonitor::new(true),
        operator(),
    );

    let report = engine.drain().await.unwrap();
    assert_eq!((report.succeeded, report.failed, report.remaining), (1, 1, 1));
    assert!(report.completion_notice().is_none());
    let left = queue.list_unsynced().await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, first);

    let retry = engine.drain().await.unwrap();
    assert_eq!((retry.succeeded, retry.failed, retry.remaining), (1, 0, 0));
    assert_eq!(endpoint.calls().await, vec!["IEEE-042", "IEEE-044", "IEEE-042"]);
    assert_eq!(store.status_of("IEEE-042").await.as_deref(), Some("Present"));
}

#[tokio::test]
async fn store_failure_response_is_retried_later() {
    let store = MemoryStore::with_roster(roster());
    store.failures.lock().await.update = true;
    let queue = memory_queue().await;
    queue.enqueue("IEEE-042", "Ada").await.unwrap();

    let engine = SyncEngine::new(
        queue.clone(),
        marking_service(store.clone()),
        ConnectivityMonitor::new(true),
        operator(),
    );
    let report = engine.drain().await.unwrap();
    assert_eq!((report.succeeded, report.failed, report.remaining), (0, 1, 1));

    store.failures.lock().await.update = false;
    let report = engine.drain().await.unwrap();
    assert_eq!((report.succeeded, report.remaining), (1, 0));
}

#[tokio::test]
async fn overlapping_drains_submit_each_entry_once() {
    let store = MemoryStore::with_roster(roster());
    let endpoint = RecordingEndpoint {
        delay: Some(Duration::from_millis(20)),
        ..RecordingEndpoint::delegating(marking_service(store))
    };
    let queue = memory_queue().await;
    queue.enqueue("IEEE-042", "Ada").await.unwrap();
    queue.enqueue("IEEE-044", "Linus").await.unwrap();

    let engine = SyncEngine::new(
        queue.clone(),
        Arc::new(endpoint.clone()),
        ConnectivityMonitor::new(true),
        operator(),
    );
    let (a, b) = tokio::join!(engine.drain(), engine.drain());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.skipped != b.skipped);
    let ran = if a.skipped { b } else { a };
    assert_eq!(ran.succeeded, 2);
    assert_eq!(endpoint.calls().await.len(), 2);
    assert_eq!(queue.count_unsynced().await.unwrap(), 0);
}

#[tokio::test]
async fn drain_while_offline_submits_nothing() {
    let endpoint = RecordingEndpoint::default();
    let queue = memory_queue().await;
    queue.enqueue("IEEE-042", "Ada").await.unwrap();

    let engine = SyncEngine::new(
        queue.clone(),
        Arc::new(endpoint.clone()),
        ConnectivityMonitor::new(false),
        operator(),
    );
    let report = engine.drain().await.unwrap();

    assert!(report.skipped);
    assert_eq!(report.remaining, 1);
    assert!(endpoint.calls().await.is_empty());
    assert!(engine.reports().borrow().is_none());
}

#[tokio::test]
async fn loop_drains_when_connectivity_returns() {
    let store = MemoryStore::with_roster(roster());
    let queue = memory_queue().await;
    queue.enqueue("IEEE-042", "Ada").await.unwrap();
    queue.enqueue("IEEE-044", "Linus").await.unwrap();

    let monitor = ConnectivityMonitor::new(false);
    let engine = Arc::new(SyncEngine::new(
        queue.clone(),
        marking_service(store.clone()),
        monitor.clone(),
        operator(),
    ));
    let mut reports = engine.reports();
    let task = spawn_sync_loop(engine.clone(), monitor.clone(), Duration::from_secs(3600));

    tokio::task::yield_now().await;
    assert_eq!(queue.count_unsynced().await.unwrap(), 2);

    monitor.set_online(true);
    tokio::time::timeout(Duration::from_secs(5), reports.changed())
        .await
        .expect("drain after reconnect")
        .unwrap();

    let report = reports.borrow().clone().unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(queue.count_unsynced().await.unwrap(), 0);
    assert_eq!(store.status_of("IEEE-044").await.as_deref(), Some("Present"));
    task.abort();
}
