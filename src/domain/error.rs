//! Domain errors

use thiserror::Error;

/// Domain-level error types
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("Transaction not found: {0}")]
    TransactionNotFound(i64),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Validation: {0}")]
    Validation(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

/// Result type for domain operations
pub type DomainResult<T> = Result<T, DomainError>;
