//! Metrics & Health (C9): the two Prometheus counters named in §6, plus an
//! `axum` server exposing `/metrics` and a readiness probe. This wires up
//! the `prometheus`/`axum` workspace dependencies the teacher's
//! controllers already declare but never use.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use ipam_client::RequestObserver;
use prometheus::{IntCounter, Registry, TextEncoder};
use tracing::{error, info};

use crate::config::BindAddr;

/// Registers and owns the two first-party counters (§6). Implements
/// [`RequestObserver`] so `NetBoxClient` can report every outbound call
/// directly, with no polling.
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    requests_total: IntCounter,
    failed_requests_total: IntCounter,
}

impl Metrics {
    /// # Panics
    /// Only if the counters collide with an already-registered metric of
    /// the same name, which cannot happen since this is the sole owner of
    /// `registry`.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let registry = Registry::new();
        let requests_total =
            IntCounter::new("netbox_requests_total", "Outbound calls issued to NetBox")
                .expect("valid metric name");
        let failed_requests_total = IntCounter::new(
            "netbox_failed_requests_total",
            "Outbound calls to NetBox that failed",
        )
        .expect("valid metric name");
        registry
            .register(Box::new(requests_total.clone()))
            .expect("unique metric registration");
        registry
            .register(Box::new(failed_requests_total.clone()))
            .expect("unique metric registration");

        Arc::new(Self {
            registry,
            requests_total,
            failed_requests_total,
        })
    }

    /// Starts the `/metrics` and `/readyz` HTTP server on `addr`,
    /// returning once it has bound (the serving future itself is spawned).
    ///
    /// # Errors
    /// Returns an error if `addr` cannot be bound.
    pub async fn serve(self: &Arc<Self>, addr: &BindAddr) -> std::io::Result<()> {
        let app = Router::new()
            .route("/metrics", get(render_metrics))
            .route("/readyz", get(|| async { "ok" }))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind(&addr.0).await?;
        info!(addr = %addr.0, "metrics server listening");
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                error!(%err, "metrics server terminated");
            }
        });
        Ok(())
    }
}

async fn render_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    let families = metrics.registry.gather();
    match TextEncoder::new().encode_to_string(&families) {
        Ok(body) => (axum::http::StatusCode::OK, body),
        Err(err) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        ),
    }
}

impl RequestObserver for Metrics {
    fn on_request(&self) {
        self.requests_total.inc();
    }

    fn on_failure(&self) {
        self.failed_requests_total.inc();
    }
}
