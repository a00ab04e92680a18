use super::model::CachedStudent;
use crate::model::PendingAttendance;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open {}", normalized))?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn pending_from_row(row: &SqliteRow) -> Result<PendingAttendance> {
    Ok(PendingAttendance {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        display_name: row.try_get("display_name")?,
        captured_at: row.try_get::<DateTime<Utc>, _>("captured_at")?,
        synced: row.try_get::<i64, _>("synced")? != 0,
    })
}

#[instrument(skip_all, fields(id = %record.id))]
pub async fn insert_pending(pool: &Pool, record: &PendingAttendance) -> Result<()> {
    sqlx::query(
        "INSERT INTO pending_attendance (id, code, display_name, captured_at, synced) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&record.id)
    .bind(&record.code)
    .bind(&record.display_name)
    .bind(record.captured_at)
    .bind(record.synced as i64)
    .execute(pool)
    .await
    .context("failed to persist pending attendance")?;
    Ok(())
}

/// Unsynced entries in insertion order.
#[instrument(skip_all)]
pub async fn list_unsynced(pool: &Pool) -> Result<Vec<PendingAttendance>> {
    let rows = sqlx::query(
        "SELECT id, code, display_name, captured_at, synced FROM pending_attendance WHERE synced = 0 ORDER BY rowid ASC",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(pending_from_row).collect()
}

#[instrument(skip_all)]
pub async fn get_pending(pool: &Pool, id: &str) -> Result<Option<PendingAttendance>> {
    let row = sqlx::query(
        "SELECT id, code, display_name, captured_at, synced FROM pending_attendance WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(pending_from_row).transpose()
}

/// Flag an entry as synced. Unknown or already-synced ids are left alone.
#[instrument(skip_all, fields(id = %id))]
pub async fn mark_synced(pool: &Pool, id: &str) -> Result<()> {
    sqlx::query("UPDATE pending_attendance SET synced = 1 WHERE id = ? AND synced = 0")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_unsynced(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_attendance WHERE synced = 0")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Replace the cached roster in one transaction.
#[instrument(skip_all, fields(count = students.len()))]
pub async fn replace_roster_cache(pool: &Pool, students: &[CachedStudent]) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM roster_cache")
        .execute(&mut *tx)
        .await?;
    for s in students {
        // duplicate codes in the sheet: first row wins, as in the marking lookup
        sqlx::query(
            "INSERT OR IGNORE INTO roster_cache (code, name, email, section) VALUES (?, ?, ?, ?)",
        )
        .bind(&s.code)
        .bind(&s.name)
        .bind(&s.email)
        .bind(&s.section)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn find_cached_student(pool: &Pool, code: &str) -> Result<Option<CachedStudent>> {
    let student = sqlx::query_as::<_, CachedStudent>(
        "SELECT code, name, email, section FROM roster_cache WHERE code = ?",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;
    Ok(student)
}
