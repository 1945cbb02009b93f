//! Error types for pool and transport operations

use std::time::Duration;

/// Capacity errors returned by [`crate::ConnectionPool`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Attempted to take from an empty idle list
    #[error("no idle connections available")]
    NoIdle,

    #[error("connection pool is full")]
    Full,

    /// Timeout flavour of [`PoolError::Full`]
    #[error("connection pool acquire timed out after {0:?}")]
    AcquireTimeout(Duration),

    #[error("connection pool is closed")]
    Closed,
}

impl PoolError {
    /// True for both the immediate and the timed-out capacity failure
    pub fn is_full(&self) -> bool {
        matches!(self, PoolError::Full | PoolError::AcquireTimeout(_))
    }
}

/// Transport-level failures.
///
/// These never escape `Connection::send`; they surface from connection
/// creation, authentication and the transport helpers.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("authentication failed for {endpoint}: {reason}")]
    Auth { endpoint: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("connection is closed")]
    Closed,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
