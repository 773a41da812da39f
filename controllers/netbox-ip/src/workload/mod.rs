//! Workload Reconcilers (C4): Pod and Service reconcilers that project
//! workload state into `NetBoxIP` desired-state objects.

pub mod pod;
pub mod service;

use std::collections::BTreeMap;
use std::net::IpAddr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;

use crds::{IPTag, NetBoxIP, NetBoxIPSpec};

use crate::util::{build_description, derive_name, owner_reference, workload_name_label};

/// A single address candidate produced by eligibility + projection,
/// independent of whether it originated from a Pod or a Service.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub address: IpAddr,
    pub dns_name: String,
    pub description: String,
}

/// Shared projection shape common to both workload reconcilers: given the
/// candidates computed by the kind-specific logic plus the workload's
/// identity, builds the full set of `NetBoxIP` objects a reconcile should
/// ensure exist, and the complementary set of names whose objects should
/// be deleted.
pub struct Projection {
    pub desired: Vec<NetBoxIP>,
    pub stale_names: Vec<String>,
}

#[allow(clippy::too_many_arguments)]
pub fn project<K>(
    workload: &K,
    kind: &str,
    uid: &str,
    dual_stack: bool,
    candidates: &[Candidate],
    tags: &[String],
) -> Projection
where
    K: Resource<DynamicType = ()>,
{
    // Callers already restrict `candidates` to the primary address only
    // when `dual_stack` is false, so at most one entry per family is ever
    // possible here regardless of mode (§4.4 "at most one per family").
    let mut by_family: BTreeMap<&'static str, &Candidate> = BTreeMap::new();
    for candidate in candidates {
        let family = ipam_client::family(&candidate.address);
        by_family.entry(family).or_insert(candidate);
    }

    let mut tag_objs: Vec<IPTag> = tags.iter().map(|t| IPTag::new(t, t)).collect();
    tag_objs.sort_by(|a, b| a.name.cmp(&b.name));

    let owner = owner_reference(workload);
    let labels = workload_name_label(&workload.meta().name.clone().unwrap_or_default());

    let mut desired = Vec::new();
    let mut stale_names = Vec::new();

    let families: Vec<(&'static str, Option<&'static str>)> = if dual_stack {
        vec![
            (ipam_client::AF_IPV4, Some(ipam_client::AF_IPV4)),
            (ipam_client::AF_IPV6, Some(ipam_client::AF_IPV6)),
        ]
    } else {
        // Single-stack: exactly one unsuffixed name, keyed on whichever
        // family the lone candidate (if any) belongs to.
        let family = by_family.keys().next().copied().unwrap_or(ipam_client::AF_IPV4);
        vec![(family, None)]
    };

    for (family, suffix) in families {
        let name = derive_name(kind, uid, suffix);
        match by_family.get(family) {
            Some(candidate) => {
                let spec = NetBoxIPSpec {
                    address: candidate.address.to_string(),
                    dns_name: candidate.dns_name.clone(),
                    tags: tag_objs.clone(),
                    description: candidate.description.clone(),
                };
                desired.push(NetBoxIP {
                    metadata: ObjectMeta {
                        name: Some(name),
                        owner_references: Some(vec![owner.clone()]),
                        labels: Some(labels.clone()),
                        ..Default::default()
                    },
                    spec,
                });
            }
            None => stale_names.push(name),
        }
    }

    Projection { desired, stale_names }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;

    fn workload(uid: &str, name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                uid: Some(uid.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn single_stack_produces_one_unsuffixed_desired_ip() {
        let pod = workload("abc-123", "bar");
        let candidates = vec![Candidate {
            address: "192.168.0.1".parse().unwrap(),
            dns_name: "bar".into(),
            description: "namespace: foo, app: baz".into(),
        }];
        let projection = project(
            &pod,
            "Pod",
            "abc-123",
            false,
            &candidates,
            &["kubernetes".to_string(), "pod".to_string()],
        );
        assert_eq!(projection.desired.len(), 1);
        assert!(projection.stale_names.is_empty());
        let ip = &projection.desired[0];
        assert_eq!(ip.metadata.name.as_deref(), Some("pod-abc-123"));
        assert_eq!(ip.spec.address, "192.168.0.1");
        assert_eq!(ip.spec.tags.len(), 2);
        assert_eq!(ip.spec.tags[0].name, "kubernetes");
        assert_eq!(ip.spec.tags[1].name, "pod");
        let owner = &ip.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.uid, "abc-123");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.block_owner_deletion, Some(true));
    }

    #[test]
    fn dual_stack_produces_two_suffixed_desired_ips() {
        let pod = workload("abc-123", "bar");
        let candidates = vec![
            Candidate {
                address: "192.168.0.1".parse().unwrap(),
                dns_name: "bar".into(),
                description: "namespace: foo".into(),
            },
            Candidate {
                address: "1:2::3".parse().unwrap(),
                dns_name: "bar".into(),
                description: "namespace: foo".into(),
            },
        ];
        let projection = project(&pod, "Pod", "abc-123", true, &candidates, &[]);
        let mut names: Vec<&str> = projection
            .desired
            .iter()
            .filter_map(|ip| ip.metadata.name.as_deref())
            .collect();
        names.sort_unstable();
        assert_eq!(names, vec!["pod-abc-123-ipv4", "pod-abc-123-ipv6"]);
        assert!(projection.stale_names.is_empty());
    }

    #[test]
    fn dual_stack_with_one_family_missing_marks_the_other_stale() {
        let pod = workload("abc-123", "bar");
        let candidates = vec![Candidate {
            address: "192.168.0.1".parse().unwrap(),
            dns_name: "bar".into(),
            description: String::new(),
        }];
        let projection = project(&pod, "Pod", "abc-123", true, &candidates, &[]);
        assert_eq!(projection.desired.len(), 1);
        assert_eq!(
            projection.desired[0].metadata.name.as_deref(),
            Some("pod-abc-123-ipv4")
        );
        assert_eq!(projection.stale_names, vec!["pod-abc-123-ipv6"]);
    }

    #[test]
    fn no_candidates_marks_single_stack_name_stale() {
        let pod = workload("abc-123", "bar");
        let projection = project(&pod, "Pod", "abc-123", false, &[], &[]);
        assert!(projection.desired.is_empty());
        assert_eq!(projection.stale_names, vec!["pod-abc-123"]);
    }
}
