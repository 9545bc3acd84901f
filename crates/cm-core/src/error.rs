//! Error types for cm-core

use thiserror::Error;

/// Main error type for cm-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transaction state error: {0}")]
    TransactionState(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Error returned by every operation on a closed store
    pub fn closed() -> Self {
        Error::Connection("store closed".to_string())
    }

    /// Whether this error came from using a closed store
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}

/// Result type alias for cm-core
pub type Result<T> = std::result::Result<T, Error>;
