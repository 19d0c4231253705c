//! # Lift Errors
//!
//! Error types surfaced to callers of the collection API.

use thiserror::Error;

use crate::store::StoreError;

/// Result type for lift operations
pub type LiftResult<T> = Result<T, LiftError>;

/// Errors raised by the write compiler, query compiler and subscriptions
#[derive(Debug, Clone, Error)]
pub enum LiftError {
    // ==================
    // Write Task Errors
    // ==================
    /// A non-empty write task has no document id
    #[error("Unable to process write task. Lacks an id. Collection: {collection}. Task type: {task_type}")]
    MissingId {
        collection: String,
        task_type: &'static str,
    },

    /// A path marker did not resolve to exactly one value
    #[error("Missing value for path write: {0}")]
    MissingPathValue(String),

    /// A decoded write task had an unrecognized type tag
    #[error("Unknown write task type: {0}")]
    UnknownTaskType(String),

    /// A protected root property was written without an explicit override
    #[error("Cannot run {operation} because \"{field}\" is a protected root property on {collection}. Use allow_writes_to_all_paths to override")]
    RestrictedField {
        collection: String,
        field: String,
        operation: &'static str,
    },

    /// A write payload cannot be expressed as store operations
    #[error("Invalid write payload: {0}")]
    InvalidPayload(String),

    /// A query description cannot be compiled
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    // ==================
    // Collection Errors
    // ==================
    /// Id generation was disabled for the collection
    #[error("Unable to generate id. Id generation is disabled for collection {0}")]
    IdGenerationDisabled(String),

    /// A stored document does not match the collection model
    #[error("Failed to decode document {id} in {collection}: {message}")]
    Decode {
        collection: String,
        id: String,
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    // ==================
    // Provider Errors
    // ==================
    /// A live subscription reported a failure
    #[error("{message} in subscription on collection {collection} with {target}")]
    Subscription {
        collection: String,
        target: String,
        message: String,
    },

    /// The document store rejected a call
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LiftError {
    /// Stable error code for logs and callers that match on strings
    pub fn code(&self) -> &'static str {
        match self {
            LiftError::MissingId { .. } => "MISSING_ID",
            LiftError::MissingPathValue(_) => "MISSING_PATH_VALUE",
            LiftError::UnknownTaskType(_) => "UNKNOWN_TASK_TYPE",
            LiftError::RestrictedField { .. } => "RESTRICTED_FIELD",
            LiftError::InvalidPayload(_) => "INVALID_PAYLOAD",
            LiftError::InvalidQuery(_) => "INVALID_QUERY",
            LiftError::IdGenerationDisabled(_) => "ID_GENERATION_DISABLED",
            LiftError::Decode { .. } => "DECODE_FAILED",
            LiftError::Config(_) => "CONFIG_ERROR",
            LiftError::Subscription { .. } => "SUBSCRIPTION_FAILED",
            LiftError::Store(e) => e.code(),
        }
    }

    /// Returns true if the error was raised before any store call was made
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LiftError::MissingId { .. }
                | LiftError::MissingPathValue(_)
                | LiftError::UnknownTaskType(_)
                | LiftError::RestrictedField { .. }
                | LiftError::InvalidPayload(_)
                | LiftError::InvalidQuery(_)
        )
    }

    pub(crate) fn decode(collection: &str, id: &str, err: serde_json::Error) -> Self {
        LiftError::Decode {
            collection: collection.to_string(),
            id: id.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for LiftError {
    fn from(e: serde_json::Error) -> Self {
        LiftError::InvalidPayload(e.to_string())
    }
}
