//! Pod reconciler (C4).

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use futures::TryStreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::ResourceExt;
use kube_runtime::watcher::{self, watcher};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::ControllerError;
use crate::util::{build_description, delete_desired_ip, event_filter, has_publish_labels, upsert_desired_ip};
use crate::workload::{project, Candidate};

const KIND: &str = "Pod";

/// Pod is eligible iff observed AND has at least one publish label AND is
/// NOT on host network AND has at least one assigned address AND is not
/// in a terminal phase (§4.4).
fn is_eligible(pod: &Pod, publish_labels: &std::collections::HashSet<String>) -> bool {
    let labels: BTreeMap<String, String> = pod.labels().clone().into_iter().collect();
    if !has_publish_labels(publish_labels, &labels) {
        return false;
    }
    if pod
        .spec
        .as_ref()
        .and_then(|s| s.host_network)
        .unwrap_or(false)
    {
        return false;
    }
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if matches!(status.phase.as_deref(), Some("Succeeded") | Some("Failed")) {
        return false;
    }
    status
        .pod_ips
        .as_ref()
        .is_some_and(|ips| !ips.is_empty())
}

fn addresses(pod: &Pod) -> Vec<IpAddr> {
    pod.status
        .as_ref()
        .and_then(|s| s.pod_ips.as_ref())
        .map(|ips| {
            ips.iter()
                .filter_map(|ip| ip.ip.as_deref())
                .filter_map(|raw| raw.parse::<IpAddr>().ok())
                .collect()
        })
        .unwrap_or_default()
}

fn selected_labels(pod: &Pod, publish_labels: &std::collections::HashSet<String>) -> BTreeMap<String, String> {
    pod.labels()
        .iter()
        .filter(|(k, _)| publish_labels.contains(k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

async fn reconcile_one(
    api: &Api<Pod>,
    desired_ip_api: &Api<crds::NetBoxIP>,
    config: &Config,
    namespace: &str,
    name: &str,
) -> Result<(), ControllerError> {
    let publish_labels: std::collections::HashSet<String> =
        config.pod_publish_labels.iter().cloned().collect();

    let pod = match api.get_opt(name).await? {
        Some(pod) => pod,
        None => return Ok(()), // not found: a later event delivers the DesiredIP delete (§4.4 step 1)
    };

    let uid = pod.uid().unwrap_or_default();
    let eligible = is_eligible(&pod, &publish_labels);

    let candidates = if eligible {
        let mut addrs = addresses(&pod);
        if !config.dual_stack_ip {
            addrs.truncate(1);
        }
        let description = build_description(namespace, &selected_labels(&pod, &publish_labels));
        addrs
            .into_iter()
            .map(|address| Candidate {
                address,
                dns_name: pod.name_any(),
                description: description.clone(),
            })
            .collect::<Vec<_>>()
    } else {
        Vec::new()
    };

    let projection = project(
        &pod,
        KIND,
        &uid,
        config.dual_stack_ip,
        &candidates,
        &config.pod_ip_tags,
    );

    for ip in projection.desired {
        upsert_desired_ip(desired_ip_api, ip).await?;
    }
    for stale in projection.stale_names {
        delete_desired_ip(desired_ip_api, &stale).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodIP, PodSpec, PodStatus};
    use std::collections::BTreeMap as Map;

    fn labels(set: &[&str]) -> std::collections::HashSet<String> {
        set.iter().map(|s| (*s).to_string()).collect()
    }

    fn base_pod() -> Pod {
        Pod {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some("bar".into()),
                labels: Some(Map::from([("app".to_string(), "baz".to_string())])),
                ..Default::default()
            },
            spec: Some(PodSpec::default()),
            status: Some(PodStatus {
                phase: Some("Running".into()),
                pod_ips: Some(vec![PodIP {
                    ip: Some("192.168.0.1".into()),
                }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn eligible_pod_with_publish_label_and_address() {
        let pod = base_pod();
        assert!(is_eligible(&pod, &labels(&["app"])));
    }

    #[test]
    fn pod_without_publish_labels_is_ineligible() {
        let pod = base_pod();
        assert!(!is_eligible(&pod, &labels(&["other"])));
    }

    #[test]
    fn host_network_pod_is_ineligible() {
        let mut pod = base_pod();
        pod.spec.as_mut().unwrap().host_network = Some(true);
        assert!(!is_eligible(&pod, &labels(&["app"])));
    }

    #[test]
    fn pod_with_no_addresses_is_ineligible() {
        let mut pod = base_pod();
        pod.status.as_mut().unwrap().pod_ips = None;
        assert!(!is_eligible(&pod, &labels(&["app"])));
    }

    #[test]
    fn terminal_phase_flips_eligibility_even_with_address_present() {
        let mut pod = base_pod();
        assert!(is_eligible(&pod, &labels(&["app"])));
        pod.status.as_mut().unwrap().phase = Some("Succeeded".into());
        assert!(!is_eligible(&pod, &labels(&["app"])));
        pod.status.as_mut().unwrap().phase = Some("Failed".into());
        assert!(!is_eligible(&pod, &labels(&["app"])));
    }

    #[test]
    fn selected_labels_excludes_non_publish_labels() {
        let mut pod = base_pod();
        pod.metadata.labels = Some(Map::from([
            ("app".to_string(), "baz".to_string()),
            ("other".to_string(), "ignored".to_string()),
        ]));
        let selected = selected_labels(&pod, &labels(&["app"]));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected.get("app"), Some(&"baz".to_string()));
    }

    #[test]
    fn addresses_parses_every_pod_ip() {
        let mut pod = base_pod();
        pod.status.as_mut().unwrap().pod_ips = Some(vec![
            PodIP { ip: Some("192.168.0.1".into()) },
            PodIP { ip: Some("1:2::3".into()) },
        ]);
        assert_eq!(addresses(&pod).len(), 2);
    }
}

/// Runs the Pod watch loop until the process is cancelled.
pub async fn run(
    client: kube::Client,
    config: Arc<Config>,
    namespace: Option<String>,
) -> Result<(), ControllerError> {
    let api: Api<Pod> = match &namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let desired_ip_api: Api<crds::NetBoxIP> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    info!("starting pod watcher");
    let mut stream = Box::pin(watcher(api.clone(), watcher::Config::default()));
    while let Some(event) = stream
        .try_next()
        .await
        .map_err(|e| ControllerError::Watch(format!("pod watcher stream error: {e}")))?
    {
        if !event_filter(&event) {
            continue;
        }
        let objs: Vec<Pod> = match event {
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => vec![obj],
            watcher::Event::Init | watcher::Event::InitDone => Vec::new(),
            watcher::Event::Delete(_) => Vec::new(),
        };
        for pod in objs {
            let ns = pod.namespace().unwrap_or_default();
            let name = pod.name_any();
            debug!(%ns, %name, "reconciling pod");
            if let Err(err) = reconcile_one(&api, &desired_ip_api, &config, &ns, &name).await {
                error!(%ns, %name, %err, "pod reconcile failed");
            }
        }
    }
    Ok(())
}
