//! Error types for the response cache and history store

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown history domain: {0}")]
    UnknownDomain(String),

    #[error("Invalid stored timestamp: {0}")]
    InvalidTimestamp(String),
}
