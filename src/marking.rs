//! Remote marking service: read-check-write of one roster row plus its audit entry.
//!
//! The record store has no compare-and-swap, so the sequence below is only
//! exclusive among callers sharing this `MarkingService`: concurrent calls for
//! the same code are serialized through a keyed async mutex. Separate server
//! processes can still race each other.
use chrono::{SecondsFormat, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};

use crate::model::{
    AttendanceRecord, AttendanceStats, AttendanceStatus, AuditLogEntry, MarkResult, Operator,
    ACTION_MARKED_PRESENT,
};
use crate::roster::SheetLayout;
use crate::sheets::{RecordStore, StoreError};

/// Per-code async locks; entries are dropped once no caller holds or awaits them.
#[derive(Default)]
struct CodeLocks {
    inner: std::sync::Mutex<HashMap<String, LockSlot>>,
}

struct LockSlot {
    lock: Arc<Mutex<()>>,
    /// Holders plus waiters.
    users: usize,
}

struct CodeGuard<'a> {
    locks: &'a CodeLocks,
    code: String,
    held: Option<OwnedMutexGuard<()>>,
}

impl CodeLocks {
    async fn acquire(&self, code: &str) -> CodeGuard<'_> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            let slot = map.entry(code.to_string()).or_insert_with(|| LockSlot {
                lock: Arc::default(),
                users: 0,
            });
            slot.users += 1;
            Arc::clone(&slot.lock)
        };
        // registered before waiting so a cancelled wait still releases its slot
        let mut guard = CodeGuard {
            locks: self,
            code: code.to_string(),
            held: None,
        };
        guard.held = Some(lock.lock_owned().await);
        guard
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Drop for CodeGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        let mut map = self.locks.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(slot) = map.get_mut(&self.code) {
            slot.users -= 1;
            if slot.users == 0 {
                map.remove(&self.code);
            }
        }
    }
}

pub struct MarkingService {
    store: Arc<dyn RecordStore>,
    layout: SheetLayout,
    timeout: Duration,
    locks: CodeLocks,
}

impl MarkingService {
    pub fn new(store: Arc<dyn RecordStore>, layout: SheetLayout, timeout: Duration) -> Self {
        Self {
            store,
            layout,
            timeout,
            locks: CodeLocks::default(),
        }
    }

    pub fn layout(&self) -> &SheetLayout {
        &self.layout
    }

    /// Bound a store call; an elapsed timeout is a transport failure.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::Timeout),
        }
    }

    /// Fetch and decode the full roster.
    #[instrument(skip_all)]
    pub async fn list_students(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        let rows = self
            .bounded(self.store.read_range(&self.layout.roster_range))
            .await?;
        Ok(self.layout.parse_rows(&rows))
    }

    /// Mark the record whose code equals `code` as present.
    ///
    /// Never fails: store errors resolve to [`MarkResult::store_failure`].
    /// Audit append errors are logged and do not affect the result.
    #[instrument(skip_all, fields(code = %code, operator = %operator.id))]
    pub async fn mark_present(&self, code: &str, operator: &Operator) -> MarkResult {
        let _guard = self.locks.acquire(code).await;

        // Row position is re-resolved on every call from a fresh read.
        let roster = match self.list_students().await {
            Ok(roster) => roster,
            Err(err) => {
                warn!(?err, "failed to read roster");
                return MarkResult::store_failure();
            }
        };
        let Some(student) = roster.into_iter().find(|s| s.qr_id == code) else {
            info!("code not in roster");
            return MarkResult::not_found();
        };
        if student.is_present() {
            info!(row_index = student.row_index, "already marked present");
            return MarkResult::already_marked(student);
        }

        let cell = self.layout.status_cell(student.row_index);
        if let Err(err) = self
            .bounded(self.store.update_cell(&cell, AttendanceStatus::Present.as_str()))
            .await
        {
            warn!(?err, cell = %cell, "failed to write status cell");
            return MarkResult::store_failure();
        }

        if let Err(err) = self
            .bounded(self.store.highlight_row(
                self.layout.sheet_id,
                student.row_index,
                self.layout.highlight_end,
            ))
            .await
        {
            warn!(?err, row_index = student.row_index, "row highlight failed; ignoring");
        }

        let entry = AuditLogEntry {
            volunteer_id: operator.id.clone(),
            volunteer_name: operator.name.clone(),
            student_id: code.to_string(),
            student_name: student.name.clone(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            action: ACTION_MARKED_PRESENT.to_string(),
        };
        self.log_attendance(&entry).await;

        info!(row_index = student.row_index, "marked present");
        MarkResult::marked(AttendanceRecord {
            attendance: AttendanceStatus::Present,
            ..student
        })
    }

    /// Append an audit entry; failures are swallowed.
    async fn log_attendance(&self, entry: &AuditLogEntry) {
        if let Err(err) = self
            .bounded(self.store.append_row(&self.layout.log_append_range, entry.to_row()))
            .await
        {
            warn!(?err, code = %entry.student_id, "failed to append audit entry");
        }
    }

    #[instrument(skip_all)]
    pub async fn stats(&self) -> Result<AttendanceStats, StoreError> {
        let roster = self.list_students().await?;
        Ok(AttendanceStats::from_roster(&roster))
    }

    /// The `limit` most recent audit entries, newest first.
    #[instrument(skip_all, fields(limit = limit))]
    pub async fn recent_logs(&self, limit: usize) -> Result<Vec<AuditLogEntry>, StoreError> {
        let rows = self
            .bounded(self.store.read_range(&self.layout.log_read_range))
            .await?;
        let skip = rows.len().saturating_sub(limit);
        Ok(rows
            .iter()
            .skip(skip)
            .rev()
            .map(|row| AuditLogEntry::from_row(row))
            .collect())
    }
}
