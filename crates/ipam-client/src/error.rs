//! Error taxonomy for the remote IPAM client (§7).

use thiserror::Error;

/// Errors surfaced by [`crate::NetBoxClient`] and the [`crate::IpamClient`]
/// trait it implements.
#[derive(Debug, Error)]
pub enum NetBoxError {
    /// Non-2xx response from the registry.
    #[error("netbox returned {status}: {snippet}")]
    Remote {
        /// HTTP status code.
        status: u16,
        /// First portion of the response body, for diagnostics.
        snippet: String,
    },

    /// Network-layer failure, or a retryable 5xx, after the retry budget
    /// was exhausted.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// More than one remote object was returned where at most one was
    /// assumed (a duplicate UID, a duplicate tag name, a duplicate
    /// custom-field descriptor).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A value could not be parsed or fails a wire-format constraint.
    #[error("validation error: {0}")]
    Validation(String),

    /// `serde_json` (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NetBoxError {
    /// True for errors the caller may reasonably retry at a higher layer
    /// (the reconcile work queue), matching §7's `TransientNetwork`.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, NetBoxError::TransientNetwork(_))
    }
}
