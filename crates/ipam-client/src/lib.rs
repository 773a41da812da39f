//! Remote IPAM Client (C1) and IP Record Model (C2).
//!
//! A typed, rate-limited wrapper over the subset of the NetBox REST API
//! this controller needs: custom-field bootstrap, tag CRUD, and IP-address
//! CRUD. Every outbound call waits on a shared token bucket; idempotent
//! verbs (GET, PUT, DELETE) are retried with exponential backoff, POST and
//! PATCH never are, because the registry happily creates duplicate IP rows
//! for a repeated POST.

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod netbox_trait;
mod retry;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{NetBoxClient, NetBoxClientConfig, RequestObserver};
pub use error::NetBoxError;
pub use models::{family, parse_address, CustomFields, Record, Tag, UidFieldDescriptor, AF_IPV4, AF_IPV6};
pub use netbox_trait::IpamClient;

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockIpamClient;
