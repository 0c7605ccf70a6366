//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking
//! over SQLite. Repositories are safe to use concurrently for different
//! scan ids; single-row writes rely on SQLite's own atomicity.

mod annotations;
pub mod migrations;
mod pool;
mod records;
mod scans;

pub use annotations::AnnotationRepository;
pub use migrations::run_migrations;
pub use pool::{AsyncSqlitePool, DieselError};
pub use scans::ScanRepository;

use chrono::{DateTime, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
