//! Error types for the store

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported schema version {found}, upgradable range is {oldest}..={current}")]
    UnsupportedSchemaVersion { found: i64, oldest: i64, current: i64 },

    #[error("schema version {found} after upgrade, expected {expected}")]
    VersionMismatch { found: i64, expected: i64 },

    #[error("migration to version {version} failed: {source}")]
    Migration {
        version: i64,
        #[source]
        source: Box<StoreError>,
    },

    #[error("unknown time zone: {0}")]
    UnknownTimeZone(String),

    #[error("invalid release time '{0}', expected HH:MM")]
    InvalidReleaseTime(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
