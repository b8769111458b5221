//! Common error types for the codeframe services

use thiserror::Error;

/// Common result type for codeframe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across codeframe crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Too few answers to build a codeframe from
    #[error("Minimum {required} answers required. Found: {found}")]
    InsufficientAnswers { required: usize, found: usize },

    /// State conflict (concurrent generation, stale node version, wrong status)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// External collaborator (embedding, clustering, proposal, validation) failed
    #[error("{service} service error: {message}")]
    Upstream { service: String, message: String },

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for SQLite lock contention, which is safe to retry
    pub fn is_lock_error(&self) -> bool {
        match self {
            Error::Database(db_err) => db_err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}
