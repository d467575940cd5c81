use std::collections::HashSet;
use std::sync::Arc;

use ktm_core::time::{
    Clockable,
    UtcClock,
};
use futures::StreamExt;
use kube::Api;
use kube::api::{
    ListParams,
    WatchEvent,
};
use ktm_core::constants::{
    CANCEL_REASON_MISSED_DELETE,
    CANCEL_REASON_POD_ALREADY_RUNNING,
    CANCEL_REASON_POD_DELETED,
    HTTP_GONE,
};
use ktm_core::metrics;
use ktm_core::prelude::*;
use ktm_state::PodEventLoop;
use tracing::{
    info,
    warn,
};

use crate::CollectorConfig;
use crate::fleet::ImagePullCollectorFleet;

/// Drives the cluster-wide Pod watch: list-to-resync, then watch from the listed resource
/// version, restarting the whole cycle on resource-version expiry (HTTP 410) or a closed stream.
pub struct PodCollector {
    api: Api<corev1::Pod>,
    pod_loop: Arc<PodEventLoop>,
    fleet: Arc<ImagePullCollectorFleet>,
    config: CollectorConfig,
    clock: Box<dyn Clockable + Send + Sync>,
}

impl PodCollector {
    pub fn new(
        client: kube::Client,
        pod_loop: Arc<PodEventLoop>,
        fleet: Arc<ImagePullCollectorFleet>,
        config: CollectorConfig,
    ) -> Self {
        PodCollector { api: Api::all(client), pod_loop, fleet, config, clock: Box::new(UtcClock) }
    }

    /// Runs forever, alternating list-to-resync and watch-from-resource-version. Returns only on
    /// an unrecoverable error (pod list failed outright).
    pub async fn run(&self) -> anyhow::Result<()> {
        loop {
            let resource_version = self.resync().await?;
            self.watch_from(&resource_version).await;
            metrics::POD_COLLECTOR_RESTARTS.inc();
        }
    }

    /// Paginates the full Pod list, computes the resync set, and blocks until the pod event
    /// loop's `resync` has been applied before returning the list's resource version.
    async fn resync(&self) -> anyhow::Result<String> {
        let mut uids = HashSet::new();
        let mut resource_version = String::new();
        let mut continue_token: Option<String> = None;

        loop {
            let lp = ListParams {
                limit: Some(self.config.kube_watch_max_events),
                continue_token: continue_token.clone(),
                ..Default::default()
            };
            let list = self.api.list(&lp).await?;
            resource_version = list.metadata.resource_version.clone().unwrap_or_default();
            for pod in &list.items {
                if let Some(uid) = pod.uid() {
                    uids.insert(uid);
                }
            }
            continue_token = list.metadata.continue_.clone();
            if continue_token.is_none() {
                break;
            }
        }

        let generation = self.pod_loop.resync(uids.clone()).await?;
        self.pod_loop.wait_for_generation(generation).await?;
        self.fleet.cancel_missing(&uids, CANCEL_REASON_MISSED_DELETE);

        Ok(resource_version)
    }

    async fn watch_from(&self, resource_version: &str) {
        let lp = ListParams { timeout: Some(self.config.kube_watch_timeout_secs), ..Default::default() };
        let mut stream = match self.api.watch(&lp, resource_version).await {
            Ok(stream) => stream.boxed(),
            Err(error) => {
                metrics::POD_COLLECTOR_ERRORS.inc();
                warn!(%error, "failed to start pod watch");
                return;
            },
        };

        while let Some(event) = stream.next().await {
            match event {
                Ok(WatchEvent::Added(pod)) => {
                    metrics::POD_WATCH_EVENTS.with_label_values(&["Added"]).inc();
                    self.fleet.add(pod.clone());
                    self.send_pod_update(pod).await;
                },
                Ok(WatchEvent::Modified(pod)) => {
                    metrics::POD_WATCH_EVENTS.with_label_values(&["Modified"]).inc();
                    let running = pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running");
                    let uid = pod.uid().unwrap_or_default();
                    self.send_pod_update(pod).await;
                    if running {
                        self.fleet.cancel(&uid, CANCEL_REASON_POD_ALREADY_RUNNING);
                    }
                },
                Ok(WatchEvent::Deleted(pod)) => {
                    metrics::POD_WATCH_EVENTS.with_label_values(&["Deleted"]).inc();
                    let uid = pod.uid().unwrap_or_default();
                    if let Err(error) = self.pod_loop.pod_delete(pod).await {
                        warn!(%error, "failed to send pod delete");
                    }
                    self.fleet.cancel(&uid, CANCEL_REASON_POD_DELETED);
                },
                Ok(WatchEvent::Bookmark(_)) => {
                    metrics::POD_WATCH_EVENTS.with_label_values(&["Bookmark"]).inc();
                },
                Ok(WatchEvent::Error(error)) => {
                    metrics::POD_COLLECTOR_ERRORS.inc();
                    if error.code == HTTP_GONE {
                        info!("pod watch resource version expired, resyncing");
                        return;
                    }
                    warn!(%error, "pod watch error");
                },
                Err(error) => {
                    metrics::POD_COLLECTOR_ERRORS.inc();
                    warn!(%error, "pod watch stream error");
                },
            }
        }
    }

    async fn send_pod_update(&self, pod: corev1::Pod) {
        if let Err(error) = self.pod_loop.pod_update(pod, self.clock.now()).await {
            warn!(%error, "failed to send pod update");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::client::Body;
    use ktm_state::{
        ImagePullEventLoop,
        MultiSink,
        PodEventLoop,
    };
    use serde_json::json;
    use tower_test::mock;

    use super::*;
    use crate::fleet::ImagePullCollectorFleet;

    fn listed_pod(uid: &str) -> serde_json::Value {
        json!({
            "metadata": {"uid": uid, "name": "p", "namespace": "ns"},
            "spec": {"containers": []},
        })
    }

    fn collector(client: kube::Client) -> (PodCollector, Arc<PodEventLoop>) {
        let pod_loop = Arc::new(PodEventLoop::start(8, false, Arc::new(MultiSink::new(vec![])), HashSet::new()));
        let image_pull_loop = Arc::new(ImagePullEventLoop::start(8, false, Arc::new(MultiSink::new(vec![]))));
        let fleet = Arc::new(ImagePullCollectorFleet::new(client.clone(), image_pull_loop, CollectorConfig::default()));
        let collector = PodCollector::new(client, pod_loop.clone(), fleet, CollectorConfig::default());
        (collector, pod_loop)
    }

    #[tokio::test]
    async fn resync_blacklists_newly_seen_pods_and_reports_resource_version() {
        let (mock_service, mut handle) = mock::pair::<http::Request<Body>, http::Response<Body>>();
        let client = kube::Client::new(mock_service, "default");
        let (collector, pod_loop) = collector(client);

        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("pod list request");
            assert_eq!(request.method(), http::Method::GET);
            let body = json!({
                "kind": "PodList",
                "apiVersion": "v1",
                "metadata": {"resourceVersion": "42"},
                "items": [listed_pod("u1")],
            });
            send.send_response(http::Response::builder().body(Body::from(serde_json::to_vec(&body).unwrap())).unwrap());
        });

        let resource_version = collector.resync().await.unwrap();
        server.await.unwrap();

        assert_eq!(resource_version, "42");
        // First sighting of a pod during resync is unmeasurable history, so it's blacklisted
        // rather than tracked.
        assert!(pod_loop.current().is_blacklisted("u1"));
    }
}
