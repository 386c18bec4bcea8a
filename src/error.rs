//! Common Error Types
//!
//! Unified error handling across all modules.

use thiserror::Error;

/// Root error type
#[derive(Debug, Error)]
pub enum PaydeskError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    /// Intent storage errors
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// Ledger errors
    #[error("ledger error: {0}")]
    Ledger(#[from] crate::storage::LedgerError),

    /// Payment source errors
    #[error("payment source error: {0}")]
    Source(#[from] crate::sources::SourceError),

    /// Reconciliation engine errors
    #[error("reconciliation error: {0}")]
    Engine(#[from] crate::reconcile::EngineError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PaydeskError {
    /// Whether retrying the same operation can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaydeskError::Storage(_) | PaydeskError::Source(_) | PaydeskError::Io(_)
        )
    }
}

/// Result type alias using PaydeskError
pub type Result<T> = std::result::Result<T, PaydeskError>;
