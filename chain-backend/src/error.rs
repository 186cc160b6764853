use thiserror::Error;

/// Errors a [`crate::backend::Backend`] implementation may raise. Transient
/// and protocol errors are logged by callers and left for the next scheduler
/// tick or notifier delivery to retry; `Backend` implementations should not
/// retry internally.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transient backend error: {0}")]
    Transient(String),

    #[error("backend protocol error: {0}")]
    Protocol(String),

    #[error("unknown transaction: {0}")]
    UnknownTransaction(String),

    #[error("insufficient backend balance")]
    InsufficientBalance,
}

pub type Result<T> = std::result::Result<T, BackendError>;
