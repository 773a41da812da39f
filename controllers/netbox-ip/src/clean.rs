//! Cleanup Tool (C10): the `clean` subcommand. Tears down every
//! `NetBoxIP`, its remote record, and the CRD itself.

use std::sync::Arc;
use std::time::Duration;

use ipam_client::IpamClient;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::{info, warn};

use crds::NetBoxIP;

use crate::error::ControllerError;

const RETRY_INTERVAL: Duration = Duration::from_secs(1);
const RETRY_STEPS: u32 = 60;
const CRD_NAME: &str = "netboxips.netbox.digitalocean.com";

/// Retries `step` up to [`RETRY_STEPS`] times at a [`RETRY_INTERVAL`]
/// cadence, returning the last error if every attempt fails.
async fn retry<F, Fut, T>(description: &str, mut step: F) -> Result<T, ControllerError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ControllerError>>,
{
    let mut last_err = None;
    for attempt in 0..RETRY_STEPS {
        match step().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(attempt, %description, %err, "cleanup step failed, retrying");
                last_err = Some(err);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        ControllerError::Config(format!("{description}: retries exhausted with no recorded error"))
    }))
}

async fn remove_finalizer(api: &Api<NetBoxIP>, name: &str) -> Result<(), ControllerError> {
    let patch = serde_json::json!({ "metadata": { "finalizers": [] } });
    api.patch(name, &PatchParams::apply("netbox-ip-controller"), &Patch::Merge(patch))
        .await?;
    Ok(())
}

async fn delete_desired_ip(api: &Api<NetBoxIP>, name: &str) -> Result<(), ControllerError> {
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn delete_crd(client: Client) -> Result<(), ControllerError> {
    let api = Api::<CustomResourceDefinition>::all(client);
    match api.delete(CRD_NAME, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Tears down every `NetBoxIP`, its remote record, and the CRD itself,
/// accumulating (rather than discarding) every step's error so a partial
/// failure is fully visible instead of only reporting the last one.
///
/// # Errors
/// Returns a joined [`ControllerError::Config`] describing every object
/// whose cleanup did not fully succeed; the CRD deletion is still
/// attempted regardless of per-object failures.
pub async fn run(client: Client, remote: Arc<dyn IpamClient>) -> Result<(), ControllerError> {
    let api: Api<NetBoxIP> = Api::all(client.clone());
    let desired_ips = api.list(&ListParams::default()).await?;

    let mut failures = Vec::new();

    for desired in desired_ips {
        let name = desired.name_any();
        let uid = desired.uid().unwrap_or_default();
        info!(%name, "cleaning up NetBoxIP");

        let remote = remote.clone();
        let uid_for_delete = uid.clone();
        let deleted_remote = retry(&format!("delete remote record for {name}"), || {
            let remote = remote.clone();
            let uid = uid_for_delete.clone();
            async move { remote.delete_ip(&uid).await.map_err(ControllerError::from) }
        })
        .await;
        if let Err(err) = deleted_remote {
            failures.push(format!("{name}: remote delete failed: {err}"));
            continue;
        }

        let cleared = retry(&format!("remove finalizer on {name}"), || {
            remove_finalizer(&api, &name)
        })
        .await;
        if let Err(err) = cleared {
            failures.push(format!("{name}: finalizer removal failed: {err}"));
            continue;
        }

        let deleted = retry(&format!("delete {name}"), || delete_desired_ip(&api, &name)).await;
        if let Err(err) = deleted {
            failures.push(format!("{name}: object delete failed: {err}"));
        }
    }

    if let Err(err) = retry("delete NetBoxIP CRD", || delete_crd(client.clone())).await {
        failures.push(format!("CRD delete failed: {err}"));
    }

    if failures.is_empty() {
        info!("cleanup complete");
        Ok(())
    } else {
        Err(ControllerError::Config(format!(
            "cleanup completed with {} failure(s): {}",
            failures.len(),
            failures.join("; ")
        )))
    }
}
