//! Controller-specific error types (§7).

use ipam_client::NetBoxError;
use thiserror::Error;

/// Errors surfaced from reconcile loops and the `clean` subcommand.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error.
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// NetBox remote-registry error.
    #[error("netbox error: {0}")]
    NetBox(#[from] NetBoxError),

    /// Bad or missing configuration at startup; fatal.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Object absent from cluster or registry where presence was assumed.
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource watch stream failed.
    #[error("watch error: {0}")]
    Watch(String),

    /// The `kube_runtime` finalizer helper failed outside the apply/cleanup
    /// closure itself (e.g. adding or removing the finalizer).
    #[error("finalizer error: {0}")]
    Finalizer(String),
}

impl ControllerError {
    /// True for the `TransientNetwork`/5xx class, which the work queue
    /// should retry rather than give up on (§7 propagation policy).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerError::NetBox(e) => e.is_transient(),
            ControllerError::Kube(_) => true,
            _ => false,
        }
    }
}
