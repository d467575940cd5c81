use std::sync::Arc;

use chrono::{
    DateTime,
    Utc,
};
use ktm_core::errors::*;
use ktm_core::metrics;
use ktm_core::prelude::*;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

use crate::eventloop::{
    EventLoop,
    Generation,
};
use crate::output::MultiSink;
use crate::statistic::{
    ContainerImagePullStatistic,
    ImagePullStatistics,
    PodImagePullStatistic,
};

err_impl! {ImagePullFieldPathError,
    #[error("malformed image pull event field path: {0}")]
    MalformedFieldPath(String),
}

lazy_static! {
    /// Matches the `involvedObject.fieldPath` an Event carries for a container, capturing the
    /// container name regardless of whether it's an init container or a regular one.
    static ref CONTAINER_FIELD_PATH: Regex = Regex::new(r"^spec\.(?:initC|c)ontainers\{(.*)\}$").unwrap();
}

pub struct ImagePullEventLoop {
    inner: EventLoop<ImagePullStatistics>,
    sink: Arc<MultiSink>,
    emit_partial: bool,
}

impl ImagePullEventLoop {
    pub fn start(queue_length: usize, emit_partial: bool, sink: Arc<MultiSink>) -> Self {
        let inner = EventLoop::start(ktm_core::constants::EVENT_LOOP_IMAGE_PULL, queue_length, ImagePullStatistics::new());
        drop(inner.watch_state(|state| {
            metrics::IMAGE_PULL_TRACKED.set(state.len() as f64);
            true
        }));
        ImagePullEventLoop { inner, sink, emit_partial }
    }

    /// Applies a `Pulling`/`Pulled` container Event to the pod's image-pull state. `field_path` is
    /// the source Event's `involvedObject.fieldPath`; `reason` is the Event's reason.
    pub async fn image_pull_update(
        &self,
        pod: corev1::Pod,
        field_path: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Generation> {
        let Some(captures) = CONTAINER_FIELD_PATH.captures(field_path) else {
            let error = ImagePullFieldPathError::malformed_field_path(field_path);
            warn!(%error, "event field path does not name a container, ignoring");
            metrics::IMAGE_PULL_COLLECTOR_ERRORS.inc();
            return Ok(self.inner.current_generation());
        };
        let container_name = captures[1].to_string();
        let reason = reason.to_string();

        let sink = self.sink.clone();
        let emit_partial = self.emit_partial;
        self.inner
            .send(move |state| {
                let uid = pod.uid().unwrap_or_default();
                let mut next = state.clone();

                let pod_stat = match next.statistics.get(&uid) {
                    Some(existing) => existing.clone(),
                    None => match PodImagePullStatistic::new(&pod) {
                        Ok(stat) => stat,
                        Err(error) => {
                            warn!(%error, pod = %pod.name_any(), "failed to build image pull statistic");
                            return next;
                        },
                    },
                };

                let Some(container_stat) = pod_stat.containers.get(&container_name).cloned() else {
                    warn!(container = %container_name, "image pull event names a container with no spec entry, ignoring");
                    next.statistics.insert(uid, pod_stat);
                    return next;
                };
                let mut pod_stat = pod_stat;
                if !container_stat.is_partial() {
                    next.statistics.insert(uid, pod_stat);
                    return next;
                }

                let updated = container_stat.update(&reason, at);
                if emit_partial || !updated.is_partial() {
                    sink.emit(updated.record());
                }
                pod_stat.containers.insert(container_name.clone(), updated);
                next.statistics.insert(uid, pod_stat);
                next
            })
            .await
    }

    /// Removes the pod's image-pull tracking, emitting a premature-deletion record for every
    /// container whose pull never completed.
    pub async fn image_pull_delete(&self, pod: corev1::Pod) -> anyhow::Result<Generation> {
        let sink = self.sink.clone();
        self.inner
            .send(move |state| {
                let uid = pod.uid().unwrap_or_default();
                let mut next = state.clone();
                if let Some(pod_stat) = next.statistics.shift_remove(&uid) {
                    for container_stat in pod_stat.containers.values() {
                        if container_stat.is_partial() {
                            sink.emit(
                                container_stat.record_with_message(ktm_core::constants::PREMATURE_DELETION_MESSAGE),
                            );
                        }
                    }
                }
                next
            })
            .await
    }

    pub async fn wait_for_generation(&self, id: Generation) -> anyhow::Result<ImagePullStatistics> {
        self.inner.wait_for_generation(id).await
    }

    pub fn current(&self) -> ImagePullStatistics {
        self.inner.current()
    }

    pub async fn close(self) {
        self.inner.close().await
    }
}
