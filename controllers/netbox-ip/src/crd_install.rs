//! CRD Installer (C8): idempotent apply-and-await-established of the
//! `NetBoxIP` CustomResourceDefinition at startup (§6), grounded on the
//! `register_eip_custom_resource` pattern in `necaris-k8s-eip-operator`.

use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};
use kube_runtime::wait::{await_condition, conditions};
use tracing::info;

use crds::NetBoxIP;

use crate::error::ControllerError;

const FIELD_MANAGER: &str = "netbox-ip-controller";
const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(60);

/// Applies the `NetBoxIP` CRD and waits for the API server to report
/// `Established=True`. Fatal if the CRD never establishes (e.g.
/// `NamesAccepted=False`).
pub async fn install_and_await(client: Client) -> Result<(), ControllerError> {
    let crd = NetBoxIP::crd();
    let name = crd
        .metadata
        .name
        .clone()
        .unwrap_or_else(|| "netboxips.netbox.digitalocean.com".to_string());

    let api = Api::<CustomResourceDefinition>::all(client);
    let crd_json = serde_json::to_value(&crd)
        .map_err(|e| ControllerError::Config(format!("failed to serialize CRD: {e}")))?;
    let patch = Patch::Apply(crd_json);
    api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &patch)
        .await?;
    info!(crd = %name, "applied NetBoxIP CustomResourceDefinition");

    let establish = await_condition(api.clone(), &name, conditions::is_crd_established());
    tokio::time::timeout(ESTABLISH_TIMEOUT, establish)
        .await
        .map_err(|_| {
            ControllerError::Config(format!(
                "timed out after {ESTABLISH_TIMEOUT:?} waiting for {name} to become Established"
            ))
        })?
        .map_err(|e| ControllerError::Config(format!("{name} failed to establish: {e}")))?;

    info!(crd = %name, "NetBoxIP CustomResourceDefinition established");
    Ok(())
}
