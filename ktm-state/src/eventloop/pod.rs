use std::collections::HashSet;
use std::sync::Arc;

use chrono::{
    DateTime,
    Utc,
};
use ktm_core::metrics;
use ktm_core::prelude::*;
use tracing::warn;

use crate::eventloop::{
    EventLoop,
    Generation,
};
use crate::output::MultiSink;
use crate::statistic::{
    PodStatistic,
    PodStatistics,
};

/// Owns the pod-tracking state and applies `podUpdate` / `podDelete` / `resync` as functional
/// transitions over [`PodStatistics`]. Every transition emits records as a side effect of the
/// closure the consumer task runs, so a record is never emitted for a generation that doesn't
/// also get published.
pub struct PodEventLoop {
    inner: EventLoop<PodStatistics>,
    sink: Arc<MultiSink>,
    emit_partial: bool,
}

impl PodEventLoop {
    pub fn start(queue_length: usize, emit_partial: bool, sink: Arc<MultiSink>, blacklist: HashSet<String>) -> Self {
        let inner = EventLoop::start(ktm_core::constants::EVENT_LOOP_POD, queue_length, PodStatistics::new(blacklist));
        // The watcher task runs for the life of the process; there is nothing useful to do with
        // its handle, so it's dropped rather than held.
        drop(inner.watch_state(|state| {
            metrics::PODS_TRACKED.set(state.len() as f64);
            true
        }));
        PodEventLoop { inner, sink, emit_partial }
    }

    /// Get-or-create the pod's statistic and apply `Update(now, pod)`. Blacklisted and
    /// already-complete statistics are left untouched (idempotence).
    pub async fn pod_update(&self, pod: corev1::Pod, now: DateTime<Utc>) -> anyhow::Result<Generation> {
        let sink = self.sink.clone();
        let emit_partial = self.emit_partial;
        self.inner
            .send(move |state| {
                let uid = pod.uid().unwrap_or_default();
                let mut next = state.clone();

                if next.is_blacklisted(&uid) {
                    return next;
                }
                if next.statistics.get(&uid).is_some_and(|s| !s.is_partial()) {
                    return next;
                }

                let updated = match next.statistics.get(&uid) {
                    Some(existing) => existing.update(now, &pod),
                    None => match PodStatistic::new(now, &pod) {
                        Ok(stat) => stat,
                        Err(error) => {
                            warn!(%error, pod = %pod.name_any(), "failed to build pod statistic");
                            return next;
                        },
                    },
                };

                if emit_partial || !updated.is_partial() {
                    sink.emit_all(updated.records());
                }
                next.statistics.insert(uid, updated);
                next
            })
            .await
    }

    /// Removes the pod's statistic, emitting a final record set first if it never completed.
    pub async fn pod_delete(&self, pod: corev1::Pod) -> anyhow::Result<Generation> {
        let sink = self.sink.clone();
        self.inner
            .send(move |state| {
                let uid = pod.uid().unwrap_or_default();
                let mut next = state.clone();
                if let Some(stat) = next.statistics.shift_remove(&uid)
                    && stat.is_partial()
                {
                    sink.emit_all(stat.records());
                }
                next
            })
            .await
    }

    /// Reconciles tracked state against a freshly-listed set of pod UIDs. Pods seen in the cluster
    /// for the first time are blacklisted (we cannot have correctly measured their latencies);
    /// pods we were tracking that vanished from the list lose their statistic, emitting a final
    /// record first if it was still partial.
    pub async fn resync(&self, current_uids: HashSet<String>) -> anyhow::Result<Generation> {
        let sink = self.sink.clone();
        self.inner
            .send(move |state| {
                let mut next = state.clone();

                let previously_seen: HashSet<String> =
                    next.statistics.keys().cloned().chain(next.blacklist.iter().cloned()).collect();
                let newly_seen_without_history: Vec<String> =
                    current_uids.difference(&previously_seen).cloned().collect();
                next.blacklist.extend(newly_seen_without_history);

                let missing: Vec<String> =
                    next.statistics.keys().filter(|uid| !current_uids.contains(*uid)).cloned().collect();
                for uid in missing {
                    let Some(stat) = next.statistics.shift_remove(&uid) else { continue };
                    if stat.is_partial() {
                        warn!(namespace = %stat.namespace, pod = %stat.name, "statistics have been lost");
                        sink.emit_all(stat.records_with_message(ktm_core::constants::LOST_STATISTICS_MESSAGE));
                    }
                }

                next
            })
            .await
    }

    pub async fn wait_for_generation(&self, id: Generation) -> anyhow::Result<PodStatistics> {
        self.inner.wait_for_generation(id).await
    }

    pub fn current(&self) -> PodStatistics {
        self.inner.current()
    }

    pub async fn close(self) {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn pod(uid: &str) -> corev1::Pod {
        corev1::Pod {
            metadata: ObjectMeta { uid: Some(uid.into()), name: Some("p".into()), ..Default::default() },
            spec: Some(corev1::PodSpec::default()),
            status: None,
        }
    }

    #[tokio::test]
    async fn cold_start_blacklist_suppresses_emission() {
        let sink = Arc::new(MultiSink::new(vec![]));
        let eventloop = PodEventLoop::start(8, false, sink, HashSet::new());

        let gen = eventloop.resync(HashSet::from(["ua".to_string()])).await.unwrap();
        let state = eventloop.wait_for_generation(gen).await.unwrap();
        assert!(state.is_blacklisted("ua"));
        assert!(state.is_empty());

        let gen2 = eventloop.pod_update(pod("ua"), Utc::now()).await.unwrap();
        let state2 = eventloop.wait_for_generation(gen2).await.unwrap();
        assert!(state2.is_empty(), "blacklisted pod must never accrue a tracked statistic");

        eventloop.close().await;
    }

    #[tokio::test]
    async fn delete_before_ready_emits_and_removes() {
        let sink = Arc::new(MultiSink::new(vec![]));
        let eventloop = PodEventLoop::start(8, false, sink, HashSet::new());

        let gen = eventloop.pod_update(pod("ub"), Utc::now()).await.unwrap();
        let state = eventloop.wait_for_generation(gen).await.unwrap();
        assert_eq!(state.len(), 1);

        let gen2 = eventloop.pod_delete(pod("ub")).await.unwrap();
        let state2 = eventloop.wait_for_generation(gen2).await.unwrap();
        assert!(state2.is_empty());

        eventloop.close().await;
    }

    #[tokio::test]
    async fn resync_drops_missing_uids_and_keeps_present_ones() {
        let sink = Arc::new(MultiSink::new(vec![]));
        let eventloop = PodEventLoop::start(8, false, sink, HashSet::new());

        eventloop.pod_update(pod("keep"), Utc::now()).await.unwrap();
        let gen = eventloop.pod_update(pod("drop"), Utc::now()).await.unwrap();
        eventloop.wait_for_generation(gen).await.unwrap();

        let gen2 = eventloop.resync(HashSet::from(["keep".to_string()])).await.unwrap();
        let state = eventloop.wait_for_generation(gen2).await.unwrap();

        assert!(state.statistics.contains_key("keep"));
        assert!(!state.statistics.contains_key("drop"));

        eventloop.close().await;
    }
}
