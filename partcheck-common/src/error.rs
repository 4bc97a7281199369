//! Errors shared by the partcheck crates

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the catalog store, config loading and logging setup
#[derive(Error, Debug)]
pub enum Error {
    /// Catalog or cache database failure
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad config file, out-of-range thresholds or an unusable log target
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown set, part or color in the catalog
    #[error("Not found: {0}")]
    NotFound(String),

    /// Catalog rows that fail to encode or decode, or a second tracing init
    #[error("Internal error: {0}")]
    Internal(String),
}
