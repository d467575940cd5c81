use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{
    AtomicU64,
    Ordering,
};

use dashmap::DashMap;
use ktm_core::prelude::*;
use ktm_state::ImagePullEventLoop;
use tracing::debug;

use crate::CollectorConfig;
use crate::image_pull::ImagePullCollectorHandle;

/// The image-pull collector fleet: a concurrent map from Pod UID to that pod's running
/// image-pull collector. The only widely shared mutable structure outside the event loops.
///
/// Entries carry a generation counter alongside the handle so a collector's own completion can
/// remove its entry via compare-and-delete, without clobbering a replacement collector that was
/// installed for the same UID in the meantime.
pub struct ImagePullCollectorFleet {
    collectors: Arc<DashMap<String, (u64, Arc<ImagePullCollectorHandle>)>>,
    next_generation: AtomicU64,
    client: kube::Client,
    event_loop: Arc<ImagePullEventLoop>,
    config: CollectorConfig,
}

impl ImagePullCollectorFleet {
    pub fn new(client: kube::Client, event_loop: Arc<ImagePullEventLoop>, config: CollectorConfig) -> Self {
        ImagePullCollectorFleet {
            collectors: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
            client,
            event_loop,
            config,
        }
    }

    /// Constructs and launches a collector for `pod`. If one already exists for the same UID it
    /// is cancelled with `"pod replaced"` first.
    pub fn add(&self, pod: corev1::Pod) {
        let uid = pod.uid().unwrap_or_default();

        if let Some((_, (_, previous))) = self.collectors.remove(&uid) {
            previous.cancel(ktm_core::constants::CANCEL_REASON_POD_REPLACED);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = Arc::new(ImagePullCollectorHandle::spawn(pod, self.client.clone(), self.event_loop.clone(), self.config));
        let completion = handle.take_completion().expect("freshly spawned handle owns its completion receiver");

        self.collectors.insert(uid.clone(), (generation, handle));

        let collectors = self.collectors.clone();
        tokio::spawn(async move {
            let _ = completion.await;
            collectors.remove_if(&uid, |_, (g, _)| *g == generation);
            debug!(uid, "image-pull collector reaped from fleet");
        });
    }

    pub fn cancel(&self, uid: &str, reason: &'static str) {
        if let Some(entry) = self.collectors.get(uid) {
            entry.value().1.cancel(reason);
        }
    }

    /// Cancels every tracked collector whose UID is absent from `current_uids` -- pods whose
    /// `Deleted` event was missed across a resync.
    pub fn cancel_missing(&self, current_uids: &HashSet<String>, reason: &'static str) {
        for entry in self.collectors.iter() {
            if !current_uids.contains(entry.key()) {
                entry.value().1.cancel(reason);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use ktm_state::MultiSink;

    use super::*;

    fn pod(uid: &str) -> corev1::Pod {
        corev1::Pod {
            metadata: ObjectMeta { uid: Some(uid.into()), name: Some("p".into()), namespace: Some("ns".into()), ..Default::default() },
            spec: Some(corev1::PodSpec::default()),
            status: None,
        }
    }

    // The mock service's handle is dropped immediately, so any request a spawned collector makes
    // fails fast with a closed-connection error rather than hanging -- fine here, since these
    // tests only assert on fleet bookkeeping, not collector behavior.
    fn fleet() -> ImagePullCollectorFleet {
        let (mock_service, _handle) = tower_test::mock::pair::<http::Request<kube::client::Body>, http::Response<kube::client::Body>>();
        let client = kube::Client::new(mock_service, "default");
        let event_loop = Arc::new(ImagePullEventLoop::start(8, false, Arc::new(MultiSink::new(vec![]))));
        ImagePullCollectorFleet::new(client, event_loop, CollectorConfig::default())
    }

    #[tokio::test]
    async fn add_replaces_existing_collector_for_same_uid() {
        let fleet = fleet();
        fleet.add(pod("u1"));
        assert_eq!(fleet.len(), 1);

        fleet.add(pod("u1"));
        assert_eq!(fleet.len(), 1, "replacing a collector for the same UID must not grow the fleet");
    }

    #[tokio::test]
    async fn cancel_missing_only_targets_absent_uids() {
        let fleet = fleet();
        fleet.add(pod("keep"));
        fleet.add(pod("drop"));

        fleet.cancel_missing(&HashSet::from(["keep".to_string()]), "test");
        // Cancellation is async (two-phase); this only asserts the call doesn't panic or touch
        // `keep`'s entry synchronously.
        assert_eq!(fleet.len(), 2);
    }
}
