#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::Mutex;

use attendance_scan::client::{EndpointError, MarkingEndpoint};
use attendance_scan::config::{self, Config};
use attendance_scan::db;
use attendance_scan::marking::MarkingService;
use attendance_scan::model::{AttendanceRecord, MarkResult, Operator};
use attendance_scan::queue::OfflineQueue;
use attendance_scan::roster::{column_index, SheetLayout};
use attendance_scan::sheets::{RecordStore, StoreError};

pub fn example_config() -> Config {
    serde_yaml::from_str(config::example()).unwrap()
}

pub fn layout() -> SheetLayout {
    SheetLayout::from_config(&example_config()).unwrap()
}

pub fn operator() -> Operator {
    Operator::new("vol@example.org", "Volunteer One")
}

/// Roster row in the example layout: name B, email D, roll E, section F, code I, status K.
pub fn roster_row(name: &str, code: &str, status: &str) -> Vec<String> {
    let mut row = vec![String::new(); 11];
    row[0] = "2026-10-01 09:00".into();
    row[1] = name.into();
    row[3] = format!("{}@example.org", name.to_lowercase());
    row[4] = format!("R-{}", code);
    row[5] = "A".into();
    row[8] = code.into();
    row[10] = status.into();
    row
}

#[derive(Default)]
pub struct Failures {
    pub read: bool,
    pub update: bool,
    pub append: bool,
    pub highlight: bool,
}

/// In-memory stand-in for the spreadsheet. Roster rows start at sheet row 2.
#[derive(Default)]
pub struct MemoryStore {
    pub roster: Mutex<Vec<Vec<String>>>,
    pub logs: Mutex<Vec<Vec<String>>>,
    pub updates: Mutex<Vec<(String, String)>>,
    pub highlights: Mutex<Vec<u32>>,
    pub reads: Mutex<usize>,
    pub failures: Mutex<Failures>,
    pub read_delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn with_roster(rows: Vec<Vec<String>>) -> Arc<Self> {
        let store = Self::default();
        *store.roster.try_lock().unwrap() = rows;
        Arc::new(store)
    }

    pub async fn status_of(&self, code: &str) -> Option<String> {
        self.roster
            .lock()
            .await
            .iter()
            .find(|r| r.get(8).map(String::as_str) == Some(code))
            .map(|r| r.get(10).cloned().unwrap_or_default())
    }

    pub async fn update_count(&self) -> usize {
        self.updates.lock().await.len()
    }

    pub async fn log_rows(&self) -> Vec<Vec<String>> {
        self.logs.lock().await.clone()
    }
}

fn transport(msg: &str) -> StoreError {
    StoreError::Transport(msg.to_string())
}

/// Split `'Sheet'!K7` into (column index, row).
fn parse_cell(range: &str) -> Option<(usize, usize)> {
    let cell = range.rsplit('!').next()?;
    let split = cell.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = cell.split_at(split);
    Some((column_index(letters)? as usize, digits.parse().ok()?))
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, StoreError> {
        *self.reads.lock().await += 1;
        if self.failures.lock().await.read {
            return Err(transport("read refused"));
        }
        let delay = *self.read_delay.lock().await;
        let snapshot = if range.starts_with("Logs") {
            self.logs.lock().await.clone()
        } else {
            self.roster.lock().await.clone()
        };
        // let concurrent callers interleave between read and write
        match delay {
            Some(d) => tokio::time::sleep(d).await,
            None => tokio::task::yield_now().await,
        }
        Ok(snapshot)
    }

    async fn update_cell(&self, range: &str, value: &str) -> Result<(), StoreError> {
        if self.failures.lock().await.update {
            return Err(transport("update refused"));
        }
        let (col, row) = parse_cell(range).ok_or_else(|| transport("bad cell"))?;
        let mut roster = self.roster.lock().await;
        let r = roster
            .get_mut(row - 2)
            .ok_or_else(|| transport("row out of range"))?;
        if r.len() <= col {
            r.resize(col + 1, String::new());
        }
        r[col] = value.to_string();
        self.updates
            .lock()
            .await
            .push((range.to_string(), value.to_string()));
        Ok(())
    }

    async fn append_row(&self, _range: &str, row: Vec<String>) -> Result<(), StoreError> {
        if self.failures.lock().await.append {
            return Err(transport("append refused"));
        }
        self.logs.lock().await.push(row);
        Ok(())
    }

    async fn highlight_row(
        &self,
        _sheet_id: i64,
        row_index: u32,
        _end_column: u32,
    ) -> Result<(), StoreError> {
        if self.failures.lock().await.highlight {
            return Err(transport("format refused"));
        }
        self.highlights.lock().await.push(row_index);
        Ok(())
    }
}

pub fn marking_service(store: Arc<MemoryStore>) -> Arc<MarkingService> {
    Arc::new(MarkingService::new(store, layout(), Duration::from_secs(15)))
}

/// Endpoint that replays queued responses, then delegates to a marking service.
#[derive(Clone, Default)]
pub struct RecordingEndpoint {
    pub responses: Arc<Mutex<VecDeque<Result<MarkResult, EndpointError>>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub delegate: Option<Arc<MarkingService>>,
    pub delay: Option<Duration>,
}

impl RecordingEndpoint {
    pub fn delegating(service: Arc<MarkingService>) -> Self {
        Self {
            delegate: Some(service),
            ..Default::default()
        }
    }

    pub async fn push_response(&self, response: Result<MarkResult, EndpointError>) {
        self.responses.lock().await.push_back(response);
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

pub fn transport_error() -> EndpointError {
    EndpointError::Transport(anyhow!("connection refused").to_string())
}

#[async_trait]
impl MarkingEndpoint for RecordingEndpoint {
    async fn mark(&self, code: &str, operator: &Operator) -> Result<MarkResult, EndpointError> {
        self.calls.lock().await.push(code.to_string());
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let queued = self.responses.lock().await.pop_front();
        match (queued, &self.delegate) {
            (Some(response), _) => response,
            (None, Some(service)) => Ok(service.mark_present(code, operator).await),
            (None, None) => Err(transport_error()),
        }
    }

    async fn roster(&self) -> Result<Vec<AttendanceRecord>, EndpointError> {
        match &self.delegate {
            Some(service) => service
                .list_students()
                .await
                .map_err(|e| EndpointError::Transport(e.to_string())),
            None => Err(transport_error()),
        }
    }
}

/// Single-connection in-memory queue so every query sees the same database.
pub async fn memory_queue() -> Arc<OfflineQueue> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    Arc::new(OfflineQueue::from_pool(pool))
}
