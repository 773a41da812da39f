//! Flag-first, environment-second configuration (§6), resolved with
//! `clap`'s derive + `env` features — the same idiom this pack's other
//! Kubernetes operators use, generalizing the raw `env::var` calls the
//! teacher's controllers use today.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::ControllerError;

#[derive(Debug, Parser)]
#[command(name = "netbox-ip-controller", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub args: ConfigArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Tears down every `NetBoxIP`, its remote record, and the CRD itself.
    Clean,
}

#[derive(Debug, Parser, Clone)]
pub struct ConfigArgs {
    #[arg(long, env = "NETBOX_API_URL")]
    pub netbox_api_url: String,

    #[arg(long, env = "NETBOX_TOKEN")]
    pub netbox_token: String,

    #[arg(long, env = "NETBOX_QPS", default_value_t = 100.0)]
    pub netbox_qps: f64,

    #[arg(long, env = "NETBOX_BURST", default_value_t = 1)]
    pub netbox_burst: u32,

    #[arg(long, env = "NETBOX_CA_CERT_PATH")]
    pub netbox_ca_cert_path: Option<PathBuf>,

    #[arg(long, env = "KUBE_CONFIG")]
    pub kube_config: Option<String>,

    #[arg(long, env = "KUBE_QPS", default_value_t = 20.0)]
    pub kube_qps: f32,

    #[arg(long, env = "KUBE_BURST", default_value_t = 30)]
    pub kube_burst: u32,

    #[arg(long, env = "POD_IP_TAGS", default_value = "kubernetes,k8s-pod")]
    pub pod_ip_tags: String,

    #[arg(long, env = "SERVICE_IP_TAGS", default_value = "kubernetes,k8s-service")]
    pub service_ip_tags: String,

    #[arg(long, env = "POD_PUBLISH_LABELS", default_value = "app")]
    pub pod_publish_labels: String,

    #[arg(long, env = "SERVICE_PUBLISH_LABELS", default_value = "app")]
    pub service_publish_labels: String,

    #[arg(long, env = "CLUSTER_DOMAIN", default_value = "cluster.local")]
    pub cluster_domain: String,

    #[arg(long, env = "DUAL_STACK_IP", default_value_t = false)]
    pub dual_stack_ip: bool,

    #[arg(long, env = "METRICS_ADDR", default_value = ":8001")]
    pub metrics_addr: String,

    #[arg(long, env = "READY_CHECK_ADDR", default_value = ":5001")]
    pub ready_check_addr: String,

    #[arg(long, env = "DEBUG", default_value_t = false)]
    pub debug: bool,
}

/// Comma-separated list parsed per §6: whitespace-trimmed, empty entries
/// dropped.
fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// A valid Kubernetes label-value-shaped qualified name:
/// `[A-Za-z0-9]([-A-Za-z0-9_.]{0,61}[A-Za-z0-9])?`.
fn is_qualified_name(s: &str) -> bool {
    if s.is_empty() || s.len() > 63 {
        return false;
    }
    let mut chars = s.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_alphanumeric() {
        return false;
    }
    if s.len() == 1 {
        return true;
    }
    let last = s.chars().next_back().unwrap();
    if !last.is_ascii_alphanumeric() {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Host/port binding address for the metrics and readiness servers. A
/// leading `:` (as in `:8001`) binds every interface, matching the Go-ism
/// the spec's default values are written in.
#[derive(Debug, Clone)]
pub struct BindAddr(pub String);

impl BindAddr {
    fn parse(raw: &str) -> Result<Self, ControllerError> {
        let normalized = if let Some(port) = raw.strip_prefix(':') {
            format!("0.0.0.0:{port}")
        } else {
            raw.to_string()
        };
        normalized
            .parse::<std::net::SocketAddr>()
            .map_err(|e| ControllerError::Config(format!("invalid bind address {raw:?}: {e}")))?;
        Ok(Self(normalized))
    }
}

/// Fully validated, resolved configuration. Construct via
/// [`Config::try_from_args`]; never construct fields directly so every
/// value is known-valid once a `Config` exists.
#[derive(Debug, Clone)]
pub struct Config {
    pub netbox_api_url: String,
    pub netbox_token: String,
    pub netbox_qps: f64,
    pub netbox_burst: u32,
    pub netbox_ca_cert_path: Option<PathBuf>,
    pub kube_config: Option<String>,
    pub kube_qps: f32,
    pub kube_burst: u32,
    pub pod_ip_tags: Vec<String>,
    pub service_ip_tags: Vec<String>,
    pub pod_publish_labels: Vec<String>,
    pub service_publish_labels: Vec<String>,
    pub cluster_domain: String,
    pub dual_stack_ip: bool,
    pub metrics_addr: BindAddr,
    pub ready_check_addr: BindAddr,
    pub debug: bool,
}

impl Config {
    pub fn try_from_args(args: ConfigArgs) -> Result<Self, ControllerError> {
        let url = url::Url::parse(&args.netbox_api_url).map_err(|e| {
            ControllerError::Config(format!("netbox-api-url is not a valid URL: {e}"))
        })?;
        if url.host().is_none() {
            return Err(ControllerError::Config(
                "netbox-api-url must be an absolute URL with a host".into(),
            ));
        }
        if args.netbox_token.trim().is_empty() {
            return Err(ControllerError::Config("netbox-token is required".into()));
        }
        if !(args.netbox_qps > 0.0) {
            return Err(ControllerError::Config("netbox-qps must be > 0".into()));
        }
        if args.netbox_burst < 1 {
            return Err(ControllerError::Config("netbox-burst must be >= 1".into()));
        }

        let pod_publish_labels = parse_csv(&args.pod_publish_labels);
        let service_publish_labels = parse_csv(&args.service_publish_labels);
        for label in pod_publish_labels.iter().chain(service_publish_labels.iter()) {
            if !is_qualified_name(label) {
                return Err(ControllerError::Config(format!(
                    "publish label {label:?} is not a valid Kubernetes qualified name"
                )));
            }
        }

        Ok(Self {
            netbox_api_url: args.netbox_api_url,
            netbox_token: args.netbox_token,
            netbox_qps: args.netbox_qps,
            netbox_burst: args.netbox_burst,
            netbox_ca_cert_path: args.netbox_ca_cert_path,
            kube_config: args.kube_config,
            kube_qps: args.kube_qps,
            kube_burst: args.kube_burst,
            pod_ip_tags: parse_csv(&args.pod_ip_tags),
            service_ip_tags: parse_csv(&args.service_ip_tags),
            pod_publish_labels,
            service_publish_labels,
            cluster_domain: args.cluster_domain,
            dual_stack_ip: args.dual_stack_ip,
            metrics_addr: BindAddr::parse(&args.metrics_addr)?,
            ready_check_addr: BindAddr::parse(&args.ready_check_addr)?,
            debug: args.debug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> ConfigArgs {
        ConfigArgs {
            netbox_api_url: "http://netbox.netbox:80".into(),
            netbox_token: "secret".into(),
            netbox_qps: 100.0,
            netbox_burst: 1,
            netbox_ca_cert_path: None,
            kube_config: None,
            kube_qps: 20.0,
            kube_burst: 30,
            pod_ip_tags: "kubernetes,k8s-pod".into(),
            service_ip_tags: "kubernetes,k8s-service".into(),
            pod_publish_labels: "app".into(),
            service_publish_labels: "app".into(),
            cluster_domain: "cluster.local".into(),
            dual_stack_ip: false,
            metrics_addr: ":8001".into(),
            ready_check_addr: ":5001".into(),
            debug: false,
        }
    }

    #[test]
    fn valid_config_resolves() {
        let cfg = Config::try_from_args(base_args()).unwrap();
        assert_eq!(cfg.pod_ip_tags, vec!["kubernetes", "k8s-pod"]);
        assert_eq!(cfg.metrics_addr.0, "0.0.0.0:8001");
    }

    #[test]
    fn missing_host_is_rejected() {
        let mut args = base_args();
        args.netbox_api_url = "not-a-url".into();
        assert!(Config::try_from_args(args).is_err());
    }

    #[test]
    fn zero_qps_is_rejected() {
        let mut args = base_args();
        args.netbox_qps = 0.0;
        assert!(Config::try_from_args(args).is_err());
    }

    #[test]
    fn invalid_publish_label_is_rejected() {
        let mut args = base_args();
        args.pod_publish_labels = "not valid!".into();
        assert!(Config::try_from_args(args).is_err());
    }

    #[test]
    fn csv_trims_and_drops_empties() {
        assert_eq!(
            parse_csv(" kubernetes , , k8s-pod ,"),
            vec!["kubernetes", "k8s-pod"]
        );
    }
}
