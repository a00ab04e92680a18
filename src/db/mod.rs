//! Device-local database: pending scans and the cached roster.
//!
//! - `model`: row types returned by repositories.
//! - `repo`: SQL-only functions over a `SqlitePool`.
//!
//! Callers normally go through [`crate::queue::OfflineQueue`], which owns the
//! pool's lifecycle and maps failures to `StorageUnavailable`.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::CachedStudent;
