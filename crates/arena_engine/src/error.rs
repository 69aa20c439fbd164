//! Error taxonomy for the action pipeline.
//!
//! Per-message failures never cross the worker boundary: workers log and
//! drop. Startup failures use `anyhow` and terminate the process instead.

use thiserror::Error;

/// Failure kinds surfaced by ingress validation, the action handler, and
/// the backing stores.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Malformed payload, unknown action key, or non-parseable id.
    /// Maps to HTTP 400; at the worker the message is logged and dropped.
    #[error("invalid action: {0}")]
    Invalid(String),

    /// The referenced user does not exist (or was deleted while the
    /// message was in flight). Maps to HTTP 404.
    #[error("unknown user: {0}")]
    NotFound(String),

    /// Store or log unavailability, timeouts. Maps to HTTP 500; the caller
    /// may retry by resubmitting.
    #[error(transparent)]
    Transient(#[from] anyhow::Error),
}

impl ActionError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }

    pub fn not_found(user: impl Into<String>) -> Self {
        Self::NotFound(user.into())
    }
}
