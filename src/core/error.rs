//! Service-level error taxonomy shared by the watchlist, screening and cache
//! components.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    DuplicateKey(String),

    #[error("Order mismatch: {0}")]
    OrderMismatch(String),

    #[error("A screening job is already running")]
    AlreadyRunning,

    #[error("No screening job is running")]
    NotRunning,

    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ServiceError {
    /// Stable machine-readable reason used in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::DuplicateKey(_) => "duplicate_key",
            ServiceError::OrderMismatch(_) => "order_mismatch",
            ServiceError::AlreadyRunning => "already_running",
            ServiceError::NotRunning => "not_running",
            ServiceError::UpstreamFailure(_) => "upstream_failure",
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::Storage(_) => "storage",
        }
    }

    pub fn upstream(err: anyhow::Error) -> Self {
        ServiceError::UpstreamFailure(format!("{err:#}"))
    }

    pub fn storage(err: anyhow::Error) -> Self {
        ServiceError::Storage(format!("{err:#}"))
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
