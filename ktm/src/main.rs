mod admin;
mod errors;

use std::collections::HashSet;
use std::sync::Arc;

use clap::Parser;
use kube::Client;
use kube::config::{
    Kubeconfig,
    KubeConfigOptions,
};
use ktm_collector::{
    CollectorConfig,
    ImagePullCollectorFleet,
    PodCollector,
};
use ktm_core::errors::*;
use ktm_core::logging;
use ktm_core::prelude::*;
use ktm_state::{
    ImagePullEventLoop,
    MultiSink,
    PodEventLoop,
};
use tracing::*;

#[derive(Parser, Debug)]
struct Options {
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen_address: String,

    #[arg(long, default_value = "")]
    kubeconfig_path: String,

    #[arg(long, default_value_t = 3)]
    image_pull_cancel_delay: u32,

    #[arg(long, default_value_t = 60)]
    kube_watch_timeout: u32,

    #[arg(long, default_value_t = 100)]
    kube_watch_max_events: u32,

    #[arg(long, default_value_t = 1000)]
    statistic_event_queue_length: u32,

    #[arg(long, default_value_t = false)]
    emit_partial: bool,

    #[arg(long, default_value = "INFO")]
    log_level: String,
}

/// Builds the Kubernetes client per the documented precedence: an explicit `--kubeconfig-path`
/// wins, otherwise `Client::try_default` already implements `$KUBECONFIG` / `$HOME/.kube/config`
/// / in-cluster resolution.
async fn build_client(kubeconfig_path: &str) -> anyhow::Result<Client> {
    if kubeconfig_path.is_empty() {
        return Client::try_default().await.map_err(|err| errors::StartupError::client_build_failed(&err.to_string()));
    }

    let Ok(kubeconfig) = Kubeconfig::read_from(kubeconfig_path) else {
        bail!(errors::StartupError::kubeconfig_unreadable(kubeconfig_path));
    };
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|err| errors::StartupError::client_build_failed(&err.to_string()))?;
    Client::try_from(config).map_err(|err| errors::StartupError::client_build_failed(&err.to_string()))
}

#[instrument(ret, err)]
async fn run(args: Options) -> EmptyResult {
    ktm_core::metrics::register();
    let client = build_client(&args.kubeconfig_path).await?;

    let sink = Arc::new(MultiSink::standard()?);
    let collector_config = CollectorConfig {
        kube_watch_timeout_secs: args.kube_watch_timeout,
        kube_watch_max_events: args.kube_watch_max_events,
        image_pull_cancel_delay_secs: args.image_pull_cancel_delay,
    };

    let pod_loop = Arc::new(PodEventLoop::start(
        args.statistic_event_queue_length as usize,
        args.emit_partial,
        sink.clone(),
        HashSet::new(),
    ));
    let image_pull_loop =
        Arc::new(ImagePullEventLoop::start(args.statistic_event_queue_length as usize, args.emit_partial, sink));

    let fleet = Arc::new(ImagePullCollectorFleet::new(client.clone(), image_pull_loop, collector_config));
    let pod_collector = PodCollector::new(client, pod_loop, fleet, collector_config);

    let server = admin::serve(&args.listen_address)?;

    tokio::select! {
        res = pod_collector.run() => res,
        res = tokio::spawn(server.launch()) => match res {
            Ok(r) => r.map(|_| ()).map_err(|err| err.into()),
            Err(err) => Err(err.into()),
        },
    }
}

#[tokio::main]
async fn main() -> EmptyResult {
    let args = Options::parse();
    logging::setup(&args.log_level);
    run(args).await
}
