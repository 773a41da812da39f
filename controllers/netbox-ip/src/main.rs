//! netbox-ip-controller: mirrors Pod and Service IP addresses into NetBox
//! IPAM via an intermediate `NetBoxIP` custom resource.

mod clean;
mod config;
mod crd_install;
mod error;
mod ipam_reconciler;
mod metrics;
mod util;
mod workload;

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tracing::{error, info};

use crate::config::{Cli, Command, Config};
use crate::error::ControllerError;
use crate::metrics::Metrics;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let cli = Cli::parse();
    let config = Config::try_from_args(cli.args)?;

    let filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    info!("starting netbox-ip-controller");

    let kube_client = match &config.kube_config {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)
                .map_err(|e| ControllerError::Config(format!("failed to read kube-config {path}: {e}")))?;
            let options = kube::config::KubeConfigOptions::default();
            let client_config = kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| ControllerError::Config(format!("invalid kube-config {path}: {e}")))?;
            Client::try_from(client_config)?
        }
        None => Client::try_default().await?,
    };

    let metrics = Metrics::new();
    metrics.serve(&config.metrics_addr).await.map_err(|e| {
        ControllerError::Config(format!("failed to bind metrics server: {e}"))
    })?;

    let ca_cert_pem = match &config.netbox_ca_cert_path {
        Some(path) => Some(std::fs::read(path).map_err(|e| {
            ControllerError::Config(format!("failed to read netbox-ca-cert-path {path:?}: {e}"))
        })?),
        None => None,
    };
    let netbox_client = ipam_client::NetBoxClient::with_observer(
        ipam_client::NetBoxClientConfig {
            base_url: config.netbox_api_url.clone(),
            token: config.netbox_token.clone(),
            qps: config.netbox_qps,
            burst: config.netbox_burst,
            ca_cert_pem,
        },
        metrics.clone(),
    )?;
    let remote: Arc<dyn ipam_client::IpamClient> = Arc::new(netbox_client);

    if let Some(Command::Clean) = cli.command {
        return clean::run(kube_client, remote).await;
    }

    crd_install::install_and_await(kube_client.clone()).await?;

    let all_tags: Vec<String> = config
        .pod_ip_tags
        .iter()
        .chain(config.service_ip_tags.iter())
        .cloned()
        .collect();
    ipam_reconciler::ensure_tags(remote.as_ref(), &all_tags).await?;

    let config = Arc::new(config);

    let pod_handle = tokio::spawn(workload::pod::run(kube_client.clone(), config.clone(), None));
    let service_handle = tokio::spawn(workload::service::run(kube_client.clone(), config.clone(), None));
    let ipam_handle = tokio::spawn(ipam_reconciler::run(kube_client.clone(), remote.clone(), None));

    tokio::select! {
        () = wait_for_shutdown_signal() => {
            info!("shutdown signal received");
            Ok(())
        }
        result = pod_handle => join_result(result, "pod watcher"),
        result = service_handle => join_result(result, "service watcher"),
        result = ipam_handle => join_result(result, "ipam reconciler"),
    }
}

fn join_result(
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
    task: &str,
) -> Result<(), ControllerError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            error!(%task, %err, "task exited with error");
            Err(err)
        }
        Err(join_err) => {
            error!(%task, %join_err, "task panicked");
            Err(ControllerError::Watch(format!("{task} panicked: {join_err}")))
        }
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(%err, "failed to install SIGTERM handler");
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
