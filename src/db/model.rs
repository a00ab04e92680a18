//! Row models used by repositories.

/// Roster slice kept on the device for offline name lookup.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CachedStudent {
    pub code: String,
    pub name: String,
    pub email: String,
    pub section: String,
}
