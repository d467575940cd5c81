use std::collections::HashSet;

use chrono::{
    DateTime,
    Utc,
};
use indexmap::IndexMap;
use ktm_core::constants::*;
use ktm_core::k8s::{
    common_container_labels,
    common_pod_labels,
    condition_transition_time,
};
use ktm_core::prelude::*;
use serde_json::{
    Map,
    Value,
    json,
};
use tracing::warn;

use crate::statistic::container::{
    InitContainerStatistic,
    NonInitContainerStatistic,
};

/// One pod's lifecycle-transition statistics. Phase timestamps are latched on first observation
/// and never moved; `last_pod` is the most recently observed pod object, retained so that a
/// statistic dropped mid-flight (on resync, or on delete) can still be reported.
#[derive(Clone, Debug)]
pub struct PodStatistic {
    pub namespace: String,
    pub name: String,
    pub creation: Option<DateTime<Utc>>,
    pub scheduled: Option<DateTime<Utc>>,
    pub initialized: Option<DateTime<Utc>>,
    pub ready: Option<DateTime<Utc>>,
    pub init_containers: IndexMap<String, InitContainerStatistic>,
    pub containers: IndexMap<String, NonInitContainerStatistic>,
    pub last_pod: corev1::Pod,
}

impl PodStatistic {
    pub fn new(now: DateTime<Utc>, pod: &corev1::Pod) -> anyhow::Result<Self> {
        let spec = pod.spec()?;
        let init_containers = spec
            .init_containers
            .iter()
            .flatten()
            .map(|c| (c.name.clone(), InitContainerStatistic::new(c.name.clone())))
            .collect();
        let containers =
            spec.containers.iter().map(|c| (c.name.clone(), NonInitContainerStatistic::new(c.name.clone()))).collect();

        let (namespace, name) = pod.namespaced_name();
        let stat = PodStatistic {
            namespace,
            name,
            creation: None,
            scheduled: None,
            initialized: None,
            ready: None,
            init_containers,
            containers,
            last_pod: pod.clone(),
        };
        Ok(stat.update(now, pod))
    }

    pub fn is_partial(&self) -> bool {
        self.creation.is_none()
            || self.scheduled.is_none()
            || self.initialized.is_none()
            || self.ready.is_none()
            || self.init_containers.values().any(|c| c.is_partial())
            || self.containers.values().any(|c| c.is_partial())
    }

    pub fn update(&self, now: DateTime<Utc>, pod: &corev1::Pod) -> Self {
        let mut next = self.clone();
        next.last_pod = pod.clone();

        if next.creation.is_none() {
            next.creation = Some(pod.creation_timestamp().map(|t| t.0).unwrap_or(now));
        }

        let Ok(status) = pod.status() else {
            return next;
        };

        if next.scheduled.is_none() {
            next.scheduled = condition_transition_time(status, POD_SCHEDULED_CONDITION);
        }
        if next.initialized.is_none() {
            next.initialized = condition_transition_time(status, POD_INITIALIZED_CONDITION);
        }
        if next.ready.is_none() {
            next.ready = condition_transition_time(status, POD_READY_CONDITION);
        }

        next.update_containers(now, status);
        next
    }

    fn update_containers(&mut self, now: DateTime<Utc>, status: &corev1::PodStatus) {
        for cs in status.init_container_statuses.iter().flatten() {
            match self.init_containers.get(&cs.name) {
                Some(stat) => {
                    let updated = stat.update(now, cs);
                    self.init_containers.insert(cs.name.clone(), updated);
                },
                None => warn!(container = %cs.name, "init container status has no matching spec entry, ignoring"),
            }
        }
        for cs in status.container_statuses.iter().flatten() {
            match self.containers.get(&cs.name) {
                Some(stat) => {
                    let updated = stat.update(now, cs);
                    self.containers.insert(cs.name.clone(), updated);
                },
                None => warn!(container = %cs.name, "container status has no matching spec entry, ignoring"),
            }
        }
    }

    /// Builds one pod record and one record per (init/non-init) container, newest-populated
    /// fields only -- callers decide whether to actually emit these (idempotence / emit-partial
    /// gating lives in the event dispatch functions, not here).
    pub fn records(&self) -> Vec<Value> {
        self.records_impl(None)
    }

    /// Same record set as [`Self::records`], but every record carries `message` -- used when a
    /// statistic is dropped before completion (resync, premature deletion) and the final, partial
    /// record still needs to be emitted.
    pub fn records_with_message(&self, message: &str) -> Vec<Value> {
        self.records_impl(Some(message))
    }

    fn records_impl(&self, message: Option<&str>) -> Vec<Value> {
        let mut records = vec![self.pod_record(message)];
        records.extend(self.container_records(message));
        records
    }

    fn pod_record(&self, message: Option<&str>) -> Value {
        let mut fields = common_pod_labels(&self.last_pod);

        if let Some(creation) = self.creation {
            fields.insert("creation_timestamp".into(), json!(creation.to_rfc3339()));
        }
        if let Some(scheduled) = self.scheduled {
            fields.insert("scheduled_timestamp".into(), json!(scheduled.to_rfc3339()));
            if let Some(creation) = self.creation {
                fields.insert("creation_to_scheduled_seconds".into(), seconds(creation, scheduled));
            }
        }
        if let Some(initialized) = self.initialized {
            fields.insert("initialized_timestamp".into(), json!(initialized.to_rfc3339()));
            if let Some(creation) = self.creation {
                fields.insert("creation_to_initialized_seconds".into(), seconds(creation, initialized));
            }
            if let Some(scheduled) = self.scheduled {
                fields.insert("scheduled_to_initialized_seconds".into(), seconds(scheduled, initialized));
            }
        }
        if let Some(ready) = self.ready {
            fields.insert("ready_timestamp".into(), json!(ready.to_rfc3339()));
            if let Some(creation) = self.creation {
                fields.insert("creation_to_ready_seconds".into(), seconds(creation, ready));
            }
            if let Some(initialized) = self.initialized {
                fields.insert("initialized_to_ready_seconds".into(), seconds(initialized, ready));
            }
        }

        fields.insert("partial".into(), json!(self.is_partial()));
        crate::output::envelope("pod", fields, message)
    }

    fn container_records(&self, message: Option<&str>) -> Vec<Value> {
        let mut records = Vec::new();

        let spec = self.last_pod.spec.as_ref();
        let mut previous: Option<&InitContainerStatistic> = None;
        for (name, stat) in &self.init_containers {
            let mut fields = stat.record_fields(previous);
            let image = spec
                .and_then(|s| s.init_containers.as_ref())
                .and_then(|cs| cs.iter().find(|c| &c.name == name))
                .and_then(|c| c.image.as_deref())
                .unwrap_or_default();
            fields.extend(common_container_labels(name, image));
            fields.insert("partial".into(), json!(stat.is_partial()));
            records.push(crate::output::envelope("container", fields, message));
            previous = Some(stat);
        }

        for (name, stat) in &self.containers {
            let mut fields = stat.record_fields(self.scheduled);
            let image = spec
                .and_then(|s| s.containers.iter().find(|c| &c.name == name))
                .and_then(|c| c.image.as_deref())
                .unwrap_or_default();
            fields.extend(common_container_labels(name, image));
            fields.insert("partial".into(), json!(stat.is_partial()));
            records.push(crate::output::envelope("container", fields, message));
        }

        records
    }
}

fn seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> Value {
    json!((to - from).num_milliseconds() as f64 / 1000.0)
}

/// Top-level state owned by the pod event loop: the set of pod UIDs we refuse to emit latencies
/// for (because we can't compute them correctly), plus the tracked statistics themselves.
#[derive(Clone, Debug, Default)]
pub struct PodStatistics {
    pub blacklist: HashSet<String>,
    pub statistics: IndexMap<String, PodStatistic>,
}

impl PodStatistics {
    pub fn new(blacklist: HashSet<String>) -> Self {
        PodStatistics { blacklist, statistics: IndexMap::new() }
    }

    pub fn is_blacklisted(&self, uid: &str) -> bool {
        self.blacklist.contains(uid)
    }

    pub fn len(&self) -> usize {
        self.statistics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statistics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
        ObjectMeta,
        Time,
    };

    use super::*;

    fn pod_with_condition(condition_type: &str, t: DateTime<Utc>) -> corev1::Pod {
        corev1::Pod {
            metadata: ObjectMeta { creation_timestamp: Some(Time(t)), ..Default::default() },
            spec: Some(corev1::PodSpec::default()),
            status: Some(corev1::PodStatus {
                conditions: Some(vec![corev1::PodCondition {
                    type_: condition_type.into(),
                    status: "True".into(),
                    last_transition_time: Some(Time(t)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn scenario_happy_path_latency() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        let t2 = t0 + chrono::Duration::seconds(2);

        let pod = corev1::Pod {
            metadata: ObjectMeta { creation_timestamp: Some(Time(t0)), ..Default::default() },
            spec: Some(corev1::PodSpec {
                containers: vec![corev1::Container { name: "c1".into(), image: Some("nginx".into()), ..Default::default() }],
                ..Default::default()
            }),
            status: Some(corev1::PodStatus {
                conditions: Some(vec![
                    corev1::PodCondition {
                        type_: "PodScheduled".into(),
                        status: "True".into(),
                        last_transition_time: Some(Time(t1)),
                        ..Default::default()
                    },
                    corev1::PodCondition {
                        type_: "PodInitialized".into(),
                        status: "True".into(),
                        last_transition_time: Some(Time(t2)),
                        ..Default::default()
                    },
                ]),
                container_statuses: Some(vec![corev1::ContainerStatus {
                    name: "c1".into(),
                    state: Some(corev1::ContainerState {
                        running: Some(corev1::ContainerStateRunning::default()),
                        ..Default::default()
                    }),
                    started: Some(true),
                    ready: true,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        };

        let stat = PodStatistic::new(t0, &pod).unwrap();
        assert_eq!(stat.creation, Some(t0));
        assert_eq!(stat.scheduled, Some(t1));
        assert_eq!(stat.initialized, Some(t2));
        assert_eq!(stat.containers["c1"].running_timestamp, Some(t0));

        let records = stat.records();
        let pod_record = &records[0]["kube_transition_metrics"];
        assert_eq!(pod_record["creation_to_scheduled_seconds"], json!(1.0));
        assert_eq!(pod_record["creation_to_initialized_seconds"], json!(2.0));
        assert_eq!(pod_record["scheduled_to_initialized_seconds"], json!(1.0));

        let container_record = &records[1]["kube_transition_metrics"];
        assert_eq!(container_record["init_container"], json!(false));
        assert_eq!(container_record["initialized_to_running_seconds"], json!(2.0));
    }

    #[test]
    fn phase_timestamps_latch_and_never_move() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(5);

        let pod = pod_with_condition("PodScheduled", t0);
        let stat = PodStatistic::new(t0, &pod).unwrap();
        assert_eq!(stat.scheduled, Some(t0));

        let later_pod = pod_with_condition("PodScheduled", t1);
        let updated = stat.update(t1, &later_pod);
        assert_eq!(updated.scheduled, Some(t0), "scheduled timestamp must not move once latched");
    }

    #[test]
    fn update_is_idempotent() {
        let t0 = Utc::now();
        let pod = pod_with_condition("PodReady", t0);
        let stat = PodStatistic::new(t0, &pod).unwrap();
        let reapplied = stat.update(t0 + chrono::Duration::seconds(1), &pod);
        assert_eq!(reapplied.ready, stat.ready);
        assert_eq!(reapplied.scheduled, stat.scheduled);
    }
}
