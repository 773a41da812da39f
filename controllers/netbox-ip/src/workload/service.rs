//! Service reconciler (C4).

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use futures::TryStreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::api::Api;
use kube::ResourceExt;
use kube_runtime::watcher::{self, watcher};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::ControllerError;
use crate::util::{build_description, delete_desired_ip, event_filter, upsert_desired_ip};
use crate::workload::{project, Candidate};

const KIND: &str = "Service";

/// Service is eligible iff observed AND has a non-empty primary cluster
/// address that is not the headless sentinel `"None"` (§4.4). Tags and
/// labels apply independently of eligibility.
fn is_eligible(svc: &Service) -> bool {
    primary_cluster_ip(svc).is_some()
}

fn primary_cluster_ip(svc: &Service) -> Option<&str> {
    let cluster_ip = svc.spec.as_ref()?.cluster_ip.as_deref()?;
    if cluster_ip.is_empty() || cluster_ip == "None" {
        return None;
    }
    Some(cluster_ip)
}

fn addresses(svc: &Service, dual_stack: bool) -> Vec<IpAddr> {
    let Some(spec) = svc.spec.as_ref() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    if let Some(primary) = primary_cluster_ip(svc) {
        if let Ok(addr) = primary.parse::<IpAddr>() {
            out.push(addr);
        }
    }
    if dual_stack {
        if let Some(cluster_ips) = &spec.cluster_ips {
            for raw in cluster_ips.iter().skip(1) {
                if raw.is_empty() || raw == "None" {
                    continue;
                }
                if let Ok(addr) = raw.parse::<IpAddr>() {
                    out.push(addr);
                }
            }
        }
    }
    out
}

fn selected_labels(svc: &Service, publish_labels: &std::collections::HashSet<String>) -> BTreeMap<String, String> {
    svc.labels()
        .iter()
        .filter(|(k, _)| publish_labels.contains(k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

async fn reconcile_one(
    api: &Api<Service>,
    desired_ip_api: &Api<crds::NetBoxIP>,
    config: &Config,
    namespace: &str,
    name: &str,
) -> Result<(), ControllerError> {
    let publish_labels: std::collections::HashSet<String> =
        config.service_publish_labels.iter().cloned().collect();

    let svc = match api.get_opt(name).await? {
        Some(svc) => svc,
        None => return Ok(()),
    };

    let uid = svc.uid().unwrap_or_default();
    let eligible = is_eligible(&svc);

    let candidates = if eligible {
        let dns_name = format!("{name}.{namespace}.svc.{}", config.cluster_domain);
        let description = build_description(namespace, &selected_labels(&svc, &publish_labels));
        addresses(&svc, config.dual_stack_ip)
            .into_iter()
            .map(|address| Candidate {
                address,
                dns_name: dns_name.clone(),
                description: description.clone(),
            })
            .collect::<Vec<_>>()
    } else {
        Vec::new()
    };

    let projection = project(
        &svc,
        KIND,
        &uid,
        config.dual_stack_ip,
        &candidates,
        &config.service_ip_tags,
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
    use k8s_openapi::api::core::v1::ServiceSpec;

    fn svc_with_cluster_ip(cluster_ip: Option<&str>) -> Service {
        Service {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some("x".into()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: cluster_ip.map(str::to_string),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn eligible_service_has_a_non_headless_cluster_ip() {
        assert!(is_eligible(&svc_with_cluster_ip(Some("192.168.0.5"))));
    }

    #[test]
    fn empty_cluster_ip_is_ineligible() {
        assert!(!is_eligible(&svc_with_cluster_ip(Some(""))));
    }

    #[test]
    fn headless_none_sentinel_is_ineligible() {
        assert!(!is_eligible(&svc_with_cluster_ip(Some("None"))));
    }

    #[test]
    fn absent_cluster_ip_is_ineligible() {
        assert!(!is_eligible(&svc_with_cluster_ip(None)));
    }

    #[test]
    fn headless_transition_flips_eligibility() {
        let mut svc = svc_with_cluster_ip(Some("192.168.0.5"));
        assert!(is_eligible(&svc));
        svc.spec.as_mut().unwrap().cluster_ip = Some("None".into());
        assert!(!is_eligible(&svc));
    }

    #[test]
    fn dual_stack_appends_secondary_cluster_ip() {
        let mut svc = svc_with_cluster_ip(Some("192.168.0.5"));
        svc.spec.as_mut().unwrap().cluster_ips =
            Some(vec!["192.168.0.5".into(), "1:2::3".into()]);
        let addrs = addresses(&svc, true);
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[1], "1:2::3".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn single_stack_ignores_secondary_cluster_ip() {
        let mut svc = svc_with_cluster_ip(Some("192.168.0.5"));
        svc.spec.as_mut().unwrap().cluster_ips =
            Some(vec!["192.168.0.5".into(), "1:2::3".into()]);
        let addrs = addresses(&svc, false);
        assert_eq!(addrs.len(), 1);
    }

    #[test]
    fn dns_name_follows_template() {
        let dns_name = format!("{}.{}.svc.{}", "x", "default", "cluster.local");
        assert_eq!(dns_name, "x.default.svc.cluster.local");
    }
}

/// Runs the Service watch loop until the process is cancelled.
pub async fn run(
    client: kube::Client,
    config: Arc<Config>,
    namespace: Option<String>,
) -> Result<(), ControllerError> {
    let api: Api<Service> = match &namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let desired_ip_api: Api<crds::NetBoxIP> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    info!("starting service watcher");
    let mut stream = Box::pin(watcher(api.clone(), watcher::Config::default()));
    while let Some(event) = stream
        .try_next()
        .await
        .map_err(|e| ControllerError::Watch(format!("service watcher stream error: {e}")))?
    {
        if !event_filter(&event) {
            continue;
        }
        let objs: Vec<Service> = match event {
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => vec![obj],
            watcher::Event::Init | watcher::Event::InitDone => Vec::new(),
            watcher::Event::Delete(_) => Vec::new(),
        };
        for svc in objs {
            let ns = svc.namespace().unwrap_or_default();
            let name = svc.name_any();
            debug!(%ns, %name, "reconciling service");
            if let Err(err) = reconcile_one(&api, &desired_ip_api, &config, &ns, &name).await {
                error!(%ns, %name, %err, "service reconcile failed");
            }
        }
    }
    Ok(())
}
