//! Warehouse error types

use thiserror::Error;

/// Errors returned by warehouse calls
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

impl WarehouseError {
    /// The resource already exists (an insert with a reused job id)
    pub fn is_conflict(&self) -> bool {
        matches!(self, WarehouseError::Api { status: 409, .. })
    }

    /// Check if the service itself reported the failure
    pub fn is_service_error(&self) -> bool {
        matches!(self, WarehouseError::Api { status, .. } if *status >= 500)
    }

    /// Check if repeating the same call later could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            WarehouseError::Api { status, .. } => *status >= 500 || *status == 429,
            WarehouseError::Network(_) => true,
            WarehouseError::InvalidResponse(_) => false,
            WarehouseError::MissingCredentials(_) => false,
        }
    }
}
