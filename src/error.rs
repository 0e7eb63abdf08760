// src/error.rs
//
// Error types shared by the serial link, the record store and the pipeline.

use thiserror::Error;

/// Failure on the serial link. Fatal to the current connection only.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open {address}: {reason}")]
    Open { address: String, reason: String },

    #[error("read error: {0}")]
    Read(#[from] std::io::Error),

    #[error("already connected to {0}")]
    AlreadyConnected(String),
}

/// Failure of a persistence call. The affected event is dropped.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
