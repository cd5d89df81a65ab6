//! Error type shared by the Polish crates

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file missing, unreadable or holding unusable values
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stored row that no longer decodes (unknown status, bad timestamp)
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
