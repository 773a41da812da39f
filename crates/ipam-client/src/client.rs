//! `NetBoxClient`: the concrete [`crate::IpamClient`] implementation,
//! talking to the real NetBox HTTP API (§6).

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::NetBoxError;
use crate::models::{Record, Tag, UidFieldDescriptor, UID_CUSTOM_FIELD_NAME};
use crate::netbox_trait::IpamClient;
use crate::retry::RetryPolicy;

type Limiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Observes outbound calls for the two Prometheus counters named in §6.
/// The controller binary supplies the real implementation; tests and the
/// default constructor use a no-op.
pub trait RequestObserver: std::fmt::Debug + Send + Sync {
    fn on_request(&self);
    fn on_failure(&self);
}

#[derive(Debug, Default)]
struct NoopObserver;

impl RequestObserver for NoopObserver {
    fn on_request(&self) {}
    fn on_failure(&self) {}
}

/// Construction-time configuration for [`NetBoxClient`], mirroring the
/// `netbox-*` keys in §6.
#[derive(Debug, Clone)]
pub struct NetBoxClientConfig {
    pub base_url: String,
    pub token: String,
    pub qps: f64,
    pub burst: u32,
    pub ca_cert_pem: Option<Vec<u8>>,
}

/// Rate-limited, retrying wrapper over the NetBox HTTP API (C1).
#[derive(Debug)]
pub struct NetBoxClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    limiter: Limiter,
    retry: RetryPolicy,
    observer: Arc<dyn RequestObserver>,
}

impl NetBoxClient {
    /// # Errors
    /// Returns [`NetBoxError::Validation`] if `config.qps`/`config.burst`
    /// are out of range, or if the `reqwest` client cannot be built (e.g.
    /// an invalid CA certificate).
    pub fn new(config: NetBoxClientConfig) -> Result<Self, NetBoxError> {
        Self::with_observer(config, Arc::new(NoopObserver))
    }

    /// As [`NetBoxClient::new`], but reporting every call to `observer`
    /// (used by the controller binary to drive Prometheus counters).
    pub fn with_observer(
        config: NetBoxClientConfig,
        observer: Arc<dyn RequestObserver>,
    ) -> Result<Self, NetBoxError> {
        if !(config.qps > 0.0) {
            return Err(NetBoxError::Validation("netbox-qps must be > 0".into()));
        }
        let burst = NonZeroU32::new(config.burst.max(1))
            .ok_or_else(|| NetBoxError::Validation("netbox-burst must be >= 1".into()))?;
        let period = Duration::from_secs_f64(1.0 / config.qps);
        let quota = Quota::with_period(period)
            .ok_or_else(|| NetBoxError::Validation("netbox-qps yields an invalid quota".into()))?
            .allow_burst(burst);

        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
        if let Some(pem) = &config.ca_cert_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| NetBoxError::Validation(format!("invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| NetBoxError::Validation(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
            limiter: RateLimiter::direct(quota),
            retry: RetryPolicy::default(),
            observer,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, NetBoxError> {
        self.limiter.until_ready().await;
        self.observer.on_request();

        let mut req = self
            .http
            .request(method, self.url(path))
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(err) => {
                self.observer.on_failure();
                return Err(NetBoxError::TransientNetwork(err.to_string()));
            }
        };

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Value::Null);
        }
        if !status.is_success() {
            self.observer.on_failure();
            let body_text = resp.text().await.unwrap_or_default();
            let snippet: String = body_text.chars().take(500).collect();
            if status.is_server_error() {
                return Err(NetBoxError::TransientNetwork(format!(
                    "{status}: {snippet}"
                )));
            }
            return Err(NetBoxError::Remote {
                status: status.as_u16(),
                snippet,
            });
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        resp.json::<Value>().await.map_err(|e| {
            self.observer.on_failure();
            NetBoxError::TransientNetwork(e.to_string())
        })
    }

    async fn get(&self, path: &str) -> Result<Value, NetBoxError> {
        let path = path.to_string();
        self.retry
            .run_idempotent(|| {
                let path = path.clone();
                async move { self.send(Method::GET, &path, None).await }
            })
            .await
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Value, NetBoxError> {
        // POST is never retried (§4.1): a duplicate POST creates a
        // duplicate remote row.
        let body = serde_json::to_value(body)?;
        self.send(Method::POST, path, Some(&body)).await
    }

    async fn put<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Value, NetBoxError> {
        let body = serde_json::to_value(body)?;
        let path = path.to_string();
        self.retry
            .run_idempotent(|| {
                let path = path.clone();
                let body = body.clone();
                async move { self.send(Method::PUT, &path, Some(&body)).await }
            })
            .await
    }

    async fn delete(&self, path: &str) -> Result<(), NetBoxError> {
        let path = path.to_string();
        self.retry
            .run_idempotent(|| {
                let path = path.clone();
                async move { self.send(Method::DELETE, &path, None).await }
            })
            .await?;
        Ok(())
    }

    fn results_array<'a>(body: &'a Value) -> &'a [Value] {
        static EMPTY: [Value; 0] = [];
        body.get("results")
            .and_then(Value::as_array)
            .map_or(EMPTY.as_slice(), Vec::as_slice)
    }
}

#[async_trait]
impl IpamClient for NetBoxClient {
    async fn upsert_uid_field(&self) -> Result<(), NetBoxError> {
        let path = format!(
            "/api/extras/custom-fields/?name={}",
            urlencoding::encode(UID_CUSTOM_FIELD_NAME)
        );
        let body = self.get(&path).await?;
        let results = Self::results_array(&body);
        match results.len() {
            0 => {
                let descriptor = UidFieldDescriptor::default();
                self.post("/api/extras/custom-fields/", &descriptor).await?;
                debug!("installed netbox_ip_controller_uid custom field");
                Ok(())
            }
            1 => Ok(()),
            n => Err(NetBoxError::InvariantViolation(format!(
                "expected at most one custom-field descriptor named {UID_CUSTOM_FIELD_NAME}, found {n}"
            ))),
        }
    }

    async fn get_tag(&self, name: &str) -> Result<Option<Tag>, NetBoxError> {
        let path = format!("/api/extras/tags/?name={}", urlencoding::encode(name));
        let body = self.get(&path).await?;
        let results = Self::results_array(&body);
        match results.len() {
            0 => Ok(None),
            1 => Ok(Some(serde_json::from_value(results[0].clone())?)),
            n => Err(NetBoxError::InvariantViolation(format!(
                "expected at most one tag named {name:?}, found {n}"
            ))),
        }
    }

    async fn create_tag(&self, name: &str) -> Result<Tag, NetBoxError> {
        let body = serde_json::json!({ "name": name, "slug": name });
        let resp = self.post("/api/extras/tags/", &body).await?;
        Ok(serde_json::from_value(resp)?)
    }

    async fn get_ip(&self, uid: &str) -> Result<Option<Record>, NetBoxError> {
        let path = format!(
            "/api/ipam/ip-addresses/?cf_netbox_ip_controller_uid={}",
            urlencoding::encode(uid)
        );
        let body = self.get(&path).await?;
        let results = Self::results_array(&body);
        match results.len() {
            0 => Ok(None),
            1 => Ok(Some(serde_json::from_value(results[0].clone())?)),
            n => Err(NetBoxError::InvariantViolation(format!(
                "expected at most one ip-address with uid {uid:?}, found {n}; the uid field may not be installed"
            ))),
        }
    }

    async fn upsert_ip(&self, record: &Record) -> Result<Option<Record>, NetBoxError> {
        let uid = &record.custom_fields.uid;
        let existing = self.get_ip(uid).await?;
        match existing {
            None => {
                let resp = self.post("/api/ipam/ip-addresses/", record).await?;
                Ok(Some(serde_json::from_value(resp)?))
            }
            Some(current) => {
                if !record.changed_from(&current) {
                    return Ok(None);
                }
                let id = current.id.ok_or_else(|| {
                    NetBoxError::InvariantViolation("existing record has no id".into())
                })?;
                let path = format!("/api/ipam/ip-addresses/{id}/");
                let mut to_write = record.clone();
                to_write.id = Some(id);
                let resp = self.put(&path, &to_write).await?;
                Ok(Some(serde_json::from_value(resp)?))
            }
        }
    }

    async fn delete_ip(&self, uid: &str) -> Result<(), NetBoxError> {
        match self.get_ip(uid).await? {
            None => Ok(()),
            Some(record) => {
                let id = record.id.ok_or_else(|| {
                    NetBoxError::InvariantViolation("existing record has no id".into())
                })?;
                let path = format!("/api/ipam/ip-addresses/{id}/");
                self.delete(&path).await.inspect_err(|err| {
                    warn!(%uid, %err, "failed to delete remote ip record");
                })
            }
        }
    }
}
