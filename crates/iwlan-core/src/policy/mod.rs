//! Retry policy engine.
//!
//! Policies come from two layered JSON documents, bundled defaults and a
//! carrier override, each mapping APN names (or `"*"`) to an ordered list of
//! rules. Documents are deserialized into [`schema`] types, validated once
//! into immutable [`ErrorPolicy`] values, kept in a [`PolicyStore`] and
//! looked up through a [`PolicyResolver`].

pub mod resolver;
pub mod retry;
pub mod rule;
pub mod schema;
pub mod store;

pub use resolver::PolicyResolver;
pub use retry::RetryArray;
pub use rule::{ErrorDetail, ErrorPolicy, ErrorType};
pub use store::{CarrierReload, DefaultPolicies, PolicyMap, PolicyStore};

use crate::event::UnknownEvent;

/// Wildcard used for APN names, error types and error details.
pub const WILDCARD: &str = "*";

/// Reasons a policy document is rejected.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("malformed policy document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown error type: {0}")]
    UnknownErrorType(String),

    #[error("invalid error detail {detail:?} for {error_type}")]
    InvalidErrorDetail { error_type: ErrorType, detail: String },

    #[error("misplaced -1 at position {index} of the retry array")]
    MisplacedInfiniteMarker { index: usize },

    #[error("retry time {0:?} is not in an acceptable format")]
    InvalidRetryTime(String),

    #[error("randomized retry time {0:?} is not in an acceptable format")]
    InvalidRandomizedRetryTime(String),

    #[error("unexpected unthrottling event {0}")]
    UnknownUnthrottlingEvent(String),

    #[error("{field} must be a positive integer, got {value:?}")]
    InvalidCount { field: &'static str, value: String },

    #[error("HandoverAttemptCount is only allowed for IKE_PROTOCOL_ERROR_TYPE, not {0}")]
    HandoverAttemptCountNotAllowed(ErrorType),

    #[error("default policies must contain a wildcard fallback for the \"*\" APN")]
    MissingDefaultFallback,
}

impl From<UnknownEvent> for PolicyError {
    fn from(err: UnknownEvent) -> Self {
        Self::UnknownUnthrottlingEvent(err.0)
    }
}
