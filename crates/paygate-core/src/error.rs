//! Error types for paygate-core
//!
//! `StoreError` is what an `AccessStore` adapter reports; `Error` is what the
//! pipeline components surface to the actor that invoked them.

use thiserror::Error;

use crate::model::TransitionError;

/// Errors reported by an `AccessStore` adapter
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// `update` or a transactional `Update` targeted a missing document
    #[error("document not found: {0}")]
    NotFound(String),

    /// The store could not be reached or refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Backend database error
    #[error("database error: {0}")]
    Database(String),

    /// A stored document could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A transactional `Expect` precondition no longer held
    #[error("precondition failed: {0}")]
    Conflict(String),

    /// The subscription or store was closed
    #[error("store closed")]
    Closed,
}

impl StoreError {
    /// Whether re-issuing the same operation may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Database(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Identity has not resolved yet; submit/listen/guard are gated on it
    #[error("identity unavailable")]
    IdentityUnavailable,

    /// Email address rejected before submission
    #[error("invalid email: {0}")]
    InvalidEmail(String),

    /// Plan id not present in the catalog
    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    /// A write to the store failed; the caller may re-invoke
    #[error("write failed: {0}")]
    Write(#[source] StoreError),

    /// A one-shot read failed
    #[error("read failed: {0}")]
    Read(#[source] StoreError),

    /// Opening or consuming a subscription failed
    #[error("subscription error: {0}")]
    Subscription(#[source] StoreError),

    /// No payment request exists for the given request or user
    #[error("payment request not found: {0}")]
    RequestNotFound(String),

    /// The stored request was superseded by a newer submission
    #[error("request {requested} was superseded by {current}")]
    StaleRequest {
        /// Request id the operator acted on
        requested: String,
        /// Request id currently stored for the user
        current: String,
    },

    /// Decision not allowed from the current status
    #[error("invalid transition: {0}")]
    Transition(#[from] TransitionError),

    /// Record path segment rejected
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid component configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Whether the invoking actor may simply retry the same call
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Write(_) => true,
            Self::Read(e) | Self::Subscription(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Stable error code for CLI output and logs
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::IdentityUnavailable => "identity_unavailable",
            Self::InvalidEmail(_) => "invalid_email",
            Self::UnknownPlan(_) => "unknown_plan",
            Self::Write(_) => "write_failure",
            Self::Read(_) => "read_failure",
            Self::Subscription(_) => "subscription_error",
            Self::RequestNotFound(_) => "request_not_found",
            Self::StaleRequest { .. } => "stale_request",
            Self::Transition(_) => "invalid_transition",
            Self::InvalidPath(_) => "invalid_path",
            Self::Serialization(_) => "serialization_error",
            Self::Configuration(_) => "configuration_error",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
