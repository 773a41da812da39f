//! Trait abstraction over the remote IPAM client (C1), so C5 and the
//! cleanup tool can be exercised against [`crate::mock::MockIpamClient`]
//! without a live NetBox instance.

use async_trait::async_trait;

use crate::error::NetBoxError;
use crate::models::{Record, Tag};

/// Every method corresponds 1:1 to a bullet in §4.1. Implementations take
/// their own cancellation/timeout handling from the underlying transport;
/// no method takes an explicit context argument because `tokio`'s
/// cooperative cancellation (dropping the future) already serves that
/// role in this codebase's idiom.
#[async_trait]
pub trait IpamClient: Send + Sync {
    /// Idempotently installs the `netbox_ip_controller_uid` custom-field
    /// descriptor. Fails only if the underlying GET/POST fails, or if more
    /// than one matching descriptor already exists
    /// ([`NetBoxError::InvariantViolation`]).
    async fn upsert_uid_field(&self) -> Result<(), NetBoxError>;

    /// `GET /extras/tags/?name=<name>`. A multi-result response is an
    /// [`NetBoxError::InvariantViolation`].
    async fn get_tag(&self, name: &str) -> Result<Option<Tag>, NetBoxError>;

    /// `POST /extras/tags/` with `slug` equal to `name`.
    async fn create_tag(&self, name: &str) -> Result<Tag, NetBoxError>;

    /// `GET /ipam/ip-addresses/?cf_netbox_ip_controller_uid=<uid>`. A
    /// multi-result response is an [`NetBoxError::InvariantViolation`].
    async fn get_ip(&self, uid: &str) -> Result<Option<Record>, NetBoxError>;

    /// `getIP`; if absent, POST; if present and changed, PUT; otherwise a
    /// no-op returning `None`.
    async fn upsert_ip(&self, record: &Record) -> Result<Option<Record>, NetBoxError>;

    /// `getIP`; if absent, no-op; otherwise DELETE.
    async fn delete_ip(&self, uid: &str) -> Result<(), NetBoxError>;
}
