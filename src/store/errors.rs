//! # Store Errors
//!
//! Errors reported by a document store driver.

use thiserror::Error;

/// Result type for store calls
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures surfaced by the underlying document store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Document or anchor does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Security rules rejected the call
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Backend unreachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Malformed request
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Write contention or aborted commit
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Internal error
    #[error("Internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "NOT_FOUND",
            StoreError::PermissionDenied(_) => "PERMISSION_DENIED",
            StoreError::Unavailable(_) => "UNAVAILABLE",
            StoreError::InvalidArgument(_) => "INVALID_ARGUMENT",
            StoreError::Aborted(_) => "ABORTED",
            StoreError::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_codes() {
        assert_eq!(StoreError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(StoreError::Aborted("x".into()).code(), "ABORTED");
        assert_eq!(
            StoreError::PermissionDenied("rules".into()).to_string(),
            "Permission denied: rules"
        );
    }
}
