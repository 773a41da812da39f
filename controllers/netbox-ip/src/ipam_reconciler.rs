//! IPAM Reconciler (C5): drives a `NetBoxIP` to a matching remote record,
//! using the finalizer sentinel to sequence delete-then-forget.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use ipam_client::{CustomFields, IpamClient, Record, Tag};
use kube::api::Api;
use kube::ResourceExt;
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::finalizer::{finalizer, Event};
use kube_runtime::{watcher, Controller};
use tracing::{error, info, warn};

use crds::{NetBoxIP, IP_FINALIZER};

use crate::error::ControllerError;

struct Context {
    remote: Arc<dyn IpamClient>,
    api: Api<NetBoxIP>,
}

/// Ensures every tag named by configuration exists remotely with a
/// matching slug (§8 invariant 4). Called once at startup, alongside
/// `upsertUIDField`.
///
/// # Errors
/// Propagates any [`ipam_client::NetBoxError`] from the underlying calls.
pub async fn ensure_tags(remote: &dyn IpamClient, names: &[String]) -> Result<(), ControllerError> {
    for name in names {
        if remote.get_tag(name).await?.is_none() {
            remote.create_tag(name).await?;
        }
    }
    Ok(())
}

fn record_from_spec(desired: &NetBoxIP) -> Result<Record, ControllerError> {
    let uid = desired.uid().unwrap_or_default();
    let address = ipam_client::parse_address(&desired.spec.address)?;
    let tags = desired
        .spec
        .tags
        .iter()
        .map(|t| Tag::named(t.name.clone(), t.slug.clone()))
        .collect();
    Ok(Record {
        id: None,
        address,
        dns_name: desired.spec.dns_name.clone(),
        tags,
        description: desired.spec.description.clone(),
        custom_fields: CustomFields { uid },
    })
}

async fn apply(remote: &Arc<dyn IpamClient>, desired: Arc<NetBoxIP>) -> Result<Action, ControllerError> {
    let record = record_from_spec(&desired)?;
    remote.upsert_ip(&record).await?;
    Ok(Action::await_change())
}

async fn cleanup(remote: &Arc<dyn IpamClient>, desired: Arc<NetBoxIP>) -> Result<Action, ControllerError> {
    let uid = desired.uid().unwrap_or_default();
    remote.delete_ip(&uid).await?;
    Ok(Action::await_change())
}

async fn reconcile(desired: Arc<NetBoxIP>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let remote = ctx.remote.clone();
    finalizer(&ctx.api, IP_FINALIZER, desired, |event| async move {
        match event {
            Event::Apply(desired) => apply(&remote, desired).await,
            Event::Cleanup(desired) => cleanup(&remote, desired).await,
        }
    })
    .await
    .map_err(|e| ControllerError::Finalizer(e.to_string()))
}

fn error_policy(desired: Arc<NetBoxIP>, error: &ControllerError, _ctx: Arc<Context>) -> Action {
    error!(name = %desired.name_any(), %error, "ipam reconcile failed, requeueing");
    Action::requeue(Duration::from_secs(30))
}

/// Runs the IPAM reconcile loop until the process is cancelled.
///
/// Calls `remote.upsertUIDField()` once before entering the loop; failure
/// there is fatal, matching §4.5's startup side-effect.
pub async fn run(
    client: kube::Client,
    remote: Arc<dyn IpamClient>,
    namespace: Option<String>,
) -> Result<(), ControllerError> {
    remote.upsert_uid_field().await?;

    let api: Api<NetBoxIP> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    let ctx = Arc::new(Context {
        remote,
        api: api.clone(),
    });

    info!("starting ipam reconciler");
    let controller_config = ControllerConfig::default().concurrency(1);
    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(err) = res {
                warn!(%err, "ipam controller stream error");
            }
        })
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{IPTag, NetBoxIPSpec};
    use ipam_client::MockIpamClient;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn desired_ip(uid: &str) -> NetBoxIP {
        NetBoxIP {
            metadata: ObjectMeta {
                name: Some("pod-abc-123".into()),
                uid: Some(uid.into()),
                ..Default::default()
            },
            spec: NetBoxIPSpec {
                address: "192.168.0.1".into(),
                dns_name: "bar".into(),
                tags: vec![IPTag::new("kubernetes", "kubernetes")],
                description: "namespace: foo, app: baz".into(),
            },
        }
    }

    #[test]
    fn record_from_spec_uses_the_desired_ip_uid_not_the_workload_uid() {
        let desired = desired_ip("desired-uid-1");
        let record = record_from_spec(&desired).unwrap();
        assert_eq!(record.custom_fields.uid, "desired-uid-1");
        assert_eq!(record.address, "192.168.0.1".parse::<std::net::IpAddr>().unwrap());
        assert_eq!(record.dns_name, "bar");
        assert_eq!(record.tags.len(), 1);
    }

    #[test]
    fn record_from_spec_rejects_an_unparseable_address() {
        let mut desired = desired_ip("desired-uid-1");
        desired.spec.address = "not-an-ip".into();
        assert!(record_from_spec(&desired).is_err());
    }

    #[tokio::test]
    async fn ensure_tags_creates_missing_tags_once() {
        let remote = MockIpamClient::new();
        ensure_tags(&remote, &["kubernetes".to_string(), "k8s-pod".to_string()])
            .await
            .unwrap();
        assert!(remote.get_tag("kubernetes").await.unwrap().is_some());
        assert!(remote.get_tag("k8s-pod").await.unwrap().is_some());

        // Running again must not error and must not duplicate.
        ensure_tags(&remote, &["kubernetes".to_string()]).await.unwrap();
        let tag = remote.get_tag("kubernetes").await.unwrap().unwrap();
        assert_eq!(tag.slug, "kubernetes");
    }
}
