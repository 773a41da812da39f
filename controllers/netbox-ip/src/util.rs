//! Shared Reconciler Utilities (C6): naming, owner-reference attachment,
//! idempotent upsert with conflict retry, event filtering, and the
//! publish-labels predicate.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Resource, ResourceExt};
use kube_runtime::watcher;
use tracing::debug;

use crds::{NetBoxIP, NetBoxIPSpec, IP_FINALIZER, WORKLOAD_NAME_LABEL};

use crate::error::ControllerError;

/// `deriveName(obj, familySuffix)` (§3/§4.4): `<lower(kind)>-<uid>`, with
/// an optional `-ipv4`/`-ipv6` suffix under dual-stack.
#[must_use]
pub fn derive_name(kind: &str, workload_uid: &str, family_suffix: Option<&str>) -> String {
    match family_suffix {
        Some(family) => format!("{}-{workload_uid}-{family}", kind.to_ascii_lowercase()),
        None => format!("{}-{workload_uid}", kind.to_ascii_lowercase()),
    }
}

/// `attachOwner(desired, owner)`: a controller owner reference with
/// `blockOwnerDeletion=true`, built from any workload resource that
/// carries standard object metadata.
#[must_use]
pub fn owner_reference<K>(workload: &K) -> OwnerReference
where
    K: Resource<DynamicType = ()>,
{
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: workload.name_any(),
        uid: workload.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// `hasPublishLabels(set, actual)`: true iff at least one key in `set`
/// appears in `actual`.
#[must_use]
pub fn has_publish_labels(set: &HashSet<String>, actual: &BTreeMap<String, String>) -> bool {
    set.iter().any(|label| actual.contains_key(label))
}

/// `description` projection (§4.4): `"namespace: <ns>"` followed by each
/// selected label in lexicographic key order. `selected` must already be
/// filtered to the configured publish-labels set.
#[must_use]
pub fn build_description(namespace: &str, selected: &BTreeMap<String, String>) -> String {
    let mut out = format!("namespace: {namespace}");
    for (key, value) in selected {
        out.push_str(&format!(", {key}: {value}"));
    }
    out
}

/// `upsertDesiredIP(client, desired)` (§4.6): GET-by-name; if absent,
/// CREATE; if present and the spec differs, copy `spec`, owner
/// references, finalizers, and labels into the existing object and
/// UPDATE. Retries on HTTP 409 conflict with exponential backoff.
pub async fn upsert_desired_ip(
    api: &Api<NetBoxIP>,
    desired: NetBoxIP,
) -> Result<(), ControllerError> {
    const MAX_ATTEMPTS: u32 = 5;
    let mut attempt = 0;
    loop {
        match try_upsert_once(api, &desired).await {
            Ok(()) => return Ok(()),
            Err(ControllerError::Kube(kube::Error::Api(ref e)))
                if e.code == 409 && attempt + 1 < MAX_ATTEMPTS =>
            {
                let delay = Duration::from_millis(100 * 2u64.pow(attempt));
                debug!(name = %desired.name_any(), attempt, "conflict upserting NetBoxIP, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn try_upsert_once(api: &Api<NetBoxIP>, desired: &NetBoxIP) -> Result<(), ControllerError> {
    let name = desired.name_any();
    match api.get_opt(&name).await? {
        None => {
            api.create(&PostParams::default(), desired).await?;
        }
        Some(existing) => {
            if spec_and_metadata_unchanged(&existing, desired) {
                return Ok(());
            }
            let mut updated = existing.clone();
            updated.spec = desired.spec.clone();
            updated.meta_mut().owner_references = desired.owner_references().to_vec().into();
            updated.meta_mut().finalizers = desired.meta().finalizers.clone();
            updated.meta_mut().labels = desired.meta().labels.clone();
            let patch = serde_json::json!({
                "metadata": {
                    "ownerReferences": updated.meta().owner_references,
                    "finalizers": updated.meta().finalizers,
                    "labels": updated.meta().labels,
                },
                "spec": updated.spec,
            });
            api.patch(
                &name,
                &PatchParams::apply("netbox-ip-controller"),
                &Patch::Apply(patch),
            )
            .await?;
        }
    }
    Ok(())
}

fn spec_and_metadata_unchanged(existing: &NetBoxIP, desired: &NetBoxIP) -> bool {
    !existing.spec.differs_from(&desired.spec)
        && existing.meta().owner_references == desired.meta().owner_references
        && existing.meta().finalizers == desired.meta().finalizers
        && existing.meta().labels == desired.meta().labels
}

/// Deletes a `NetBoxIP` by name if it exists; a missing object is a no-op,
/// matching §4.4 step 4's "issues a Kubernetes delete" (actual remote
/// cleanup happens later, driven by the finalizer).
pub async fn delete_desired_ip(api: &Api<NetBoxIP>, name: &str) -> Result<(), ControllerError> {
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Builds a fresh `NetBoxIP` carrying the finalizer sentinel from §3 —
/// used only by tests and the cleanup tool; in steady state C4 never
/// writes the finalizer, only C5 does (§4.5 step 3).
#[must_use]
pub fn with_finalizer(mut ip: NetBoxIP) -> NetBoxIP {
    let finalizers = ip.meta_mut().finalizers.get_or_insert_with(Vec::new);
    if !finalizers.iter().any(|f| f == IP_FINALIZER) {
        finalizers.push(IP_FINALIZER.to_string());
    }
    ip
}

/// `{"netbox-ip-controller/name": workload.name}` label set.
#[must_use]
pub fn workload_name_label(workload_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(WORKLOAD_NAME_LABEL.to_string(), workload_name.to_string())])
}

/// `eventFilter`: accept creates/updates with a present object, drop all
/// deletes. Delete events for the watched workload kind carry no useful
/// information here — the owner reference on the `NetBoxIP` drives
/// garbage collection, which in turn notifies C5 via an update event with
/// `deletionTimestamp` set (§4.4 Filter).
#[must_use]
pub fn event_filter<K>(event: &watcher::Event<K>) -> bool {
    !matches!(event, watcher::Event::Delete(_))
}
