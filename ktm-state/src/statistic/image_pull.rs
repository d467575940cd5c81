use chrono::{
    DateTime,
    Utc,
};
use indexmap::IndexMap;
use ktm_core::k8s::common_container_labels;
use ktm_core::prelude::*;
use serde_json::{
    Value,
    json,
};

/// Tracks whether and when one container's image was pulled. A `Pulling` event latches
/// `started_timestamp`; a `Pulled` event latches `finished_timestamp`, and -- if no `Pulling` was
/// ever observed -- also backfills `started_timestamp` to the same instant and marks the image as
/// already present.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerImagePullStatistic {
    pub pod_namespace: String,
    pub pod_name: String,
    pub container_name: String,
    pub image: String,
    pub init_container: bool,
    pub already_present: bool,
    pub started_timestamp: Option<DateTime<Utc>>,
    pub finished_timestamp: Option<DateTime<Utc>>,
}

impl ContainerImagePullStatistic {
    pub fn new(pod: &corev1::Pod, container_name: &str, image: &str, init_container: bool) -> Self {
        let (pod_namespace, pod_name) = pod.namespaced_name();
        ContainerImagePullStatistic {
            pod_namespace,
            pod_name,
            container_name: container_name.into(),
            image: image.into(),
            init_container,
            already_present: false,
            started_timestamp: None,
            finished_timestamp: None,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.started_timestamp.is_none() || self.finished_timestamp.is_none()
    }

    pub fn update(&self, reason: &str, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();

        if reason == ktm_core::constants::EVENT_REASON_PULLED {
            if next.finished_timestamp.is_none() {
                next.finished_timestamp = Some(at);
            }
            if next.started_timestamp.is_none() {
                next.already_present = true;
            }
        }

        // "Pulling" latches started_timestamp directly; "Pulled" without a prior "Pulling" also
        // falls through to latch it here, to the same instant as finished_timestamp.
        if next.started_timestamp.is_none() {
            next.started_timestamp = Some(at);
        }

        next
    }

    pub fn record(&self) -> Value {
        let mut fields = common_container_labels(&self.container_name, &self.image);
        fields.insert("already_present".into(), json!(self.already_present));
        if let Some(started) = self.started_timestamp {
            fields.insert("started_timestamp".into(), json!(started.to_rfc3339()));
        }
        if let Some(finished) = self.finished_timestamp {
            fields.insert("finished_timestamp".into(), json!(finished.to_rfc3339()));
            if let Some(started) = self.started_timestamp {
                fields.insert(
                    "duration_seconds".into(),
                    json!((finished - started).num_milliseconds() as f64 / 1000.0),
                );
            }
        }
        fields.insert("partial".into(), json!(self.is_partial()));
        crate::output::envelope("image_pull", fields, None)
    }

    pub fn record_with_message(&self, message: &str) -> Value {
        let mut fields = common_container_labels(&self.container_name, &self.image);
        fields.insert("already_present".into(), json!(self.already_present));
        if let Some(started) = self.started_timestamp {
            fields.insert("started_timestamp".into(), json!(started.to_rfc3339()));
        }
        if let Some(finished) = self.finished_timestamp {
            fields.insert("finished_timestamp".into(), json!(finished.to_rfc3339()));
        }
        fields.insert("partial".into(), json!(self.is_partial()));
        crate::output::envelope("image_pull", fields, Some(message))
    }
}

/// One pod's image-pull statistics, one entry per container (init and non-init alike).
#[derive(Clone, Debug, Default)]
pub struct PodImagePullStatistic {
    pub pod_namespace: String,
    pub pod_name: String,
    pub containers: IndexMap<String, ContainerImagePullStatistic>,
}

impl PodImagePullStatistic {
    pub fn new(pod: &corev1::Pod) -> anyhow::Result<Self> {
        let spec = pod.spec()?;
        let mut containers = IndexMap::new();
        for c in spec.init_containers.iter().flatten() {
            containers.insert(
                c.name.clone(),
                ContainerImagePullStatistic::new(pod, &c.name, c.image.as_deref().unwrap_or_default(), true),
            );
        }
        for c in &spec.containers {
            containers.insert(
                c.name.clone(),
                ContainerImagePullStatistic::new(pod, &c.name, c.image.as_deref().unwrap_or_default(), false),
            );
        }

        let (pod_namespace, pod_name) = pod.namespaced_name();
        Ok(PodImagePullStatistic { pod_namespace, pod_name, containers })
    }
}

/// Top-level state owned by the image-pull event loop: map pod UID -> per-pod image-pull state.
#[derive(Clone, Debug, Default)]
pub struct ImagePullStatistics {
    pub statistics: IndexMap<String, PodImagePullStatistic>,
}

impl ImagePullStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.statistics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statistics.is_empty()
    }
}
