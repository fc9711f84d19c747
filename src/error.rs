//! Error taxonomy for the offline order engine.
//!
//! Catalog conflicts are not errors here: they are data returned by a sync
//! cycle.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Submission or snapshot fetch failed for connectivity reasons.
    #[error("{0}")]
    Network(String),

    /// API key rejected or terminal not authorized.
    #[error("{0}")]
    Auth(String),

    #[error("{message} (HTTP {status})")]
    Server { status: u16, message: String },

    /// Backend answered but refused the order (`success: false`).
    #[error("Order rejected by admin dashboard: {0}")]
    Rejected(String),

    #[error("Invalid response from admin dashboard: {0}")]
    InvalidResponse(String),

    #[error("storage: {0}")]
    Storage(String),

    /// Malformed persisted payload. Loads log this and fall back to empty.
    #[error("corrupt payload under {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("{0}")]
    InvalidPayload(String),
}

impl SyncError {
    /// Whether the next cycle may succeed without anyone intervening.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network(_) => true,
            SyncError::Server { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
