//! In-memory [`crate::IpamClient`] used by controller unit tests
//! (`test-util` feature), mirroring the teacher's
//! `crates/netbox-client/src/mock.rs` convention of a feature-gated fake.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::NetBoxError;
use crate::models::{Record, Tag};
use crate::netbox_trait::IpamClient;

#[derive(Debug, Default)]
struct State {
    records: Vec<Record>,
    tags: Vec<Tag>,
    next_id: u64,
    uid_field_installed: bool,
}

/// A fake NetBox backed by an in-memory `Vec`, enforcing the same
/// at-most-one-per-uid invariant the real registry relies on the UID
/// custom field for.
#[derive(Debug, Default)]
pub struct MockIpamClient {
    state: Mutex<State>,
}

impl MockIpamClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total count of records currently stored, for assertions.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).records.len()
    }

    /// Number of outbound calls that would have hit the wire; the mock
    /// does not itself maintain the Prometheus counters, but tests can use
    /// this for an equivalent assertion (S6).
    #[must_use]
    pub fn requests_issued(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).next_id
    }
}

#[async_trait]
impl IpamClient for MockIpamClient {
    async fn upsert_uid_field(&self) -> Result<(), NetBoxError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.uid_field_installed = true;
        Ok(())
    }

    async fn get_tag(&self, name: &str) -> Result<Option<Tag>, NetBoxError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.tags.iter().find(|t| t.name == name).cloned())
    }

    async fn create_tag(&self, name: &str) -> Result<Tag, NetBoxError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.next_id += 1;
        let id = state.next_id;
        let tag = Tag {
            id: Some(id),
            name: name.to_string(),
            slug: name.to_string(),
            kind: None,
        };
        state.tags.push(tag.clone());
        Ok(tag)
    }

    async fn get_ip(&self, uid: &str) -> Result<Option<Record>, NetBoxError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .records
            .iter()
            .find(|r| r.custom_fields.uid == uid)
            .cloned())
    }

    async fn upsert_ip(&self, record: &Record) -> Result<Option<Record>, NetBoxError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let uid = record.custom_fields.uid.clone();
        state.next_id += 1;
        if let Some(existing) = state
            .records
            .iter_mut()
            .find(|r| r.custom_fields.uid == uid)
        {
            if !record.changed_from(existing) {
                return Ok(None);
            }
            let id = existing.id;
            *existing = record.clone();
            existing.id = id;
            return Ok(Some(existing.clone()));
        }
        let mut to_insert = record.clone();
        let id = state.next_id;
        to_insert.id = Some(id);
        state.records.push(to_insert.clone());
        Ok(Some(to_insert))
    }

    async fn delete_ip(&self, uid: &str) -> Result<(), NetBoxError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.records.retain(|r| r.custom_fields.uid != uid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CustomFields;

    fn record(uid: &str, addr: &str) -> Record {
        Record {
            id: None,
            address: addr.parse().unwrap(),
            dns_name: "bar".into(),
            tags: vec![],
            description: String::new(),
            custom_fields: CustomFields { uid: uid.into() },
        }
    }

    #[tokio::test]
    async fn upsert_twice_with_no_change_is_a_single_write() {
        let client = MockIpamClient::new();
        let r = record("uid-1", "192.168.0.1");
        let first = client.upsert_ip(&r).await.unwrap();
        assert!(first.is_some());
        let second = client.upsert_ip(&r).await.unwrap();
        assert!(second.is_none());
        assert_eq!(client.record_count(), 1);
    }

    #[tokio::test]
    async fn delete_missing_is_noop() {
        let client = MockIpamClient::new();
        client.delete_ip("does-not-exist").await.unwrap();
        assert_eq!(client.record_count(), 0);
    }
}
