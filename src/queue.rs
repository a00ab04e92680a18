//! Local offline queue: durable per-device store of scans awaiting sync.
//!
//! Storage is opened lazily on first use (or by an explicit [`OfflineQueue::init`]).
//! Every failure surfaces as [`QueueError::StorageUnavailable`] so callers can
//! tell the operator the scan was not recorded.
use chrono::Utc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::db::{self, CachedStudent, Pool};
use crate::model::{AttendanceRecord, PendingAttendance};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("offline storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        error!(?err, "offline storage failure");
        QueueError::StorageUnavailable(format!("{err:#}"))
    }
}

/// Locally generated id: capture millis plus a random suffix.
pub fn new_local_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("offline_{}_{}", Utc::now().timestamp_millis(), &suffix[..9])
}

pub struct OfflineQueue {
    database_url: String,
    pool: OnceCell<Pool>,
}

impl OfflineQueue {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            pool: OnceCell::new(),
        }
    }

    /// Wrap an already-migrated pool.
    pub fn from_pool(pool: Pool) -> Self {
        Self {
            database_url: String::new(),
            pool: OnceCell::new_with(Some(pool)),
        }
    }

    /// Open storage and apply migrations. Idempotent.
    pub async fn init(&self) -> Result<(), QueueError> {
        self.pool().await.map(|_| ())
    }

    async fn pool(&self) -> Result<&Pool, QueueError> {
        self.pool
            .get_or_try_init(|| async {
                let pool = db::init_pool(&self.database_url).await?;
                db::run_migrations(&pool).await?;
                info!("offline queue ready");
                Ok::<_, anyhow::Error>(pool)
            })
            .await
            .map_err(QueueError::from)
    }

    /// Close the pool; later calls fail with `StorageUnavailable`.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }

    /// Persist a new unsynced scan and return its local id.
    #[instrument(skip_all, fields(code = %code))]
    pub async fn enqueue(&self, code: &str, display_name: &str) -> Result<String, QueueError> {
        let pool = self.pool().await?;
        let record = PendingAttendance {
            id: new_local_id(),
            code: code.to_string(),
            display_name: display_name.to_string(),
            captured_at: Utc::now(),
            synced: false,
        };
        db::insert_pending(pool, &record).await?;
        info!(id = %record.id, "queued offline scan");
        Ok(record.id)
    }

    /// Unsynced entries in enqueue order, read from storage on every call.
    pub async fn list_unsynced(&self) -> Result<Vec<PendingAttendance>, QueueError> {
        let pool = self.pool().await?;
        Ok(db::list_unsynced(pool).await?)
    }

    /// No-op for unknown or already-synced ids.
    pub async fn mark_synced(&self, id: &str) -> Result<(), QueueError> {
        let pool = self.pool().await?;
        db::mark_synced(pool, id).await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<PendingAttendance>, QueueError> {
        let pool = self.pool().await?;
        Ok(db::get_pending(pool, id).await?)
    }

    pub async fn count_unsynced(&self) -> Result<i64, QueueError> {
        let pool = self.pool().await?;
        Ok(db::count_unsynced(pool).await?)
    }

    /// Replace the cached roster with a fresh snapshot.
    pub async fn store_roster(&self, roster: &[AttendanceRecord]) -> Result<(), QueueError> {
        let pool = self.pool().await?;
        let students: Vec<CachedStudent> = roster
            .iter()
            .filter(|r| !r.qr_id.is_empty())
            .map(|r| CachedStudent {
                code: r.qr_id.clone(),
                name: r.name.clone(),
                email: r.email.clone(),
                section: r.section.clone(),
            })
            .collect();
        db::replace_roster_cache(pool, &students).await?;
        Ok(())
    }

    pub async fn find_cached(&self, code: &str) -> Result<Option<CachedStudent>, QueueError> {
        let pool = self.pool().await?;
        Ok(db::find_cached_student(pool, code).await?)
    }
}
