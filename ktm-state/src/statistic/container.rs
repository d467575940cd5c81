use std::ops::Deref;

use chrono::{
    DateTime,
    Utc,
};
use ktm_core::k8s::{
    is_ready,
    is_running,
    is_started,
};
use ktm_core::prelude::*;
use serde_json::{
    Map,
    Value,
    json,
};

/// Timestamps shared by init and non-init containers. Each is latched on first observation and
/// never moved; `update` is therefore idempotent (applying the same container status twice
/// produces the same statistic).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContainerStatistic {
    pub name: String,
    pub running_timestamp: Option<DateTime<Utc>>,
    pub started_timestamp: Option<DateTime<Utc>>,
    pub ready_timestamp: Option<DateTime<Utc>>,
}

impl ContainerStatistic {
    pub fn new(name: impl Into<String>) -> Self {
        ContainerStatistic { name: name.into(), ..Default::default() }
    }

    pub fn is_partial(&self) -> bool {
        self.running_timestamp.is_none() || self.started_timestamp.is_none() || self.ready_timestamp.is_none()
    }

    fn update(&self, now: DateTime<Utc>, status: &corev1::ContainerStatus) -> Self {
        let mut next = self.clone();
        if next.running_timestamp.is_none() && is_running(status) {
            next.running_timestamp = Some(now);
        }
        if next.started_timestamp.is_none() && is_started(status) {
            next.started_timestamp = Some(now);
        }
        if next.ready_timestamp.is_none() && is_ready(status) {
            next.ready_timestamp = Some(now);
        }
        next
    }

    // Fields common to init and non-init container records. Note that `started_to_ready_seconds`
    // is measured from `running_timestamp`, not `started_timestamp` -- this mirrors the upstream
    // semantics this metric was modeled on and is intentional, not a typo.
    fn base_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();

        if let Some(running) = self.running_timestamp {
            fields.insert("running_timestamp".into(), json!(running.to_rfc3339()));
        }
        if let Some(started) = self.started_timestamp {
            fields.insert("started_timestamp".into(), json!(started.to_rfc3339()));
            if let Some(running) = self.running_timestamp {
                fields.insert("running_to_started_seconds".into(), seconds(running, started));
            }
        }
        if let Some(ready) = self.ready_timestamp {
            fields.insert("ready_timestamp".into(), json!(ready.to_rfc3339()));
            if let Some(running) = self.running_timestamp {
                fields.insert("running_to_ready_seconds".into(), seconds(running, ready));
            }
            if self.started_timestamp.is_some() {
                if let Some(running) = self.running_timestamp {
                    fields.insert("started_to_ready_seconds".into(), seconds(running, ready));
                }
            }
        }

        fields
    }
}

fn seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> Value {
    json!((to - from).num_milliseconds() as f64 / 1000.0)
}

/// A container that runs to completion before the pod's main containers start. Init containers
/// never observe `started` in practice (no startup/readiness probes apply to them); their
/// `ready_timestamp` is latched when the container terminates successfully.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InitContainerStatistic {
    pub base: ContainerStatistic,
}

impl Deref for InitContainerStatistic {
    type Target = ContainerStatistic;

    fn deref(&self) -> &ContainerStatistic {
        &self.base
    }
}

impl InitContainerStatistic {
    pub fn new(name: impl Into<String>) -> Self {
        InitContainerStatistic { base: ContainerStatistic::new(name) }
    }

    pub fn update(&self, now: DateTime<Utc>, status: &corev1::ContainerStatus) -> Self {
        InitContainerStatistic { base: self.base.update(now, status) }
    }

    /// `previous` is the init container that ran immediately before this one, if any.
    pub fn record_fields(&self, previous: Option<&InitContainerStatistic>) -> Map<String, Value> {
        let mut fields = self.base.base_fields();
        fields.insert("init_container".into(), json!(true));

        if let (Some(running), Some(previous)) = (self.running_timestamp, previous) {
            if let Some(previous_ready) = previous.ready_timestamp {
                fields.insert("previous_to_running_seconds".into(), seconds(previous_ready, running));
            }
        }
        fields
    }
}

/// A pod's main (non-init) container.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NonInitContainerStatistic {
    pub base: ContainerStatistic,
}

impl Deref for NonInitContainerStatistic {
    type Target = ContainerStatistic;

    fn deref(&self) -> &ContainerStatistic {
        &self.base
    }
}

impl NonInitContainerStatistic {
    pub fn new(name: impl Into<String>) -> Self {
        NonInitContainerStatistic { base: ContainerStatistic::new(name) }
    }

    pub fn update(&self, now: DateTime<Utc>, status: &corev1::ContainerStatus) -> Self {
        NonInitContainerStatistic { base: self.base.update(now, status) }
    }

    pub fn record_fields(&self, pod_scheduled: Option<DateTime<Utc>>) -> Map<String, Value> {
        let mut fields = self.base.base_fields();
        fields.insert("init_container".into(), json!(false));

        if let (Some(running), Some(scheduled)) = (self.running_timestamp, pod_scheduled) {
            fields.insert("initialized_to_running_seconds".into(), seconds(scheduled, running));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn running_status() -> corev1::ContainerStatus {
        corev1::ContainerStatus {
            state: Some(corev1::ContainerState {
                running: Some(corev1::ContainerStateRunning::default()),
                ..Default::default()
            }),
            started: Some(true),
            ready: true,
            ..Default::default()
        }
    }

    #[test]
    fn update_latches_once() {
        let t0 = Utc::now();
        let stat = ContainerStatistic::new("c1");
        let updated = stat.update(t0, &running_status());
        assert_eq!(updated.running_timestamp, Some(t0));
        assert_eq!(updated.started_timestamp, Some(t0));
        assert_eq!(updated.ready_timestamp, Some(t0));

        let t1 = t0 + chrono::Duration::seconds(5);
        let reupdated = updated.update(t1, &running_status());
        assert_eq!(reupdated, updated, "re-applying an update must be idempotent");
    }

    #[test]
    fn is_partial_until_all_three_latched() {
        let stat = ContainerStatistic::new("c1");
        assert!(stat.is_partial());

        let t0 = Utc::now();
        let updated = stat.update(t0, &running_status());
        assert!(!updated.is_partial());
    }

    #[rstest]
    fn started_to_ready_uses_running_not_started() {
        let t_running = Utc::now();
        let t_started = t_running + chrono::Duration::seconds(2);
        let t_ready = t_started + chrono::Duration::seconds(3);

        let stat = ContainerStatistic {
            name: "c1".into(),
            running_timestamp: Some(t_running),
            started_timestamp: Some(t_started),
            ready_timestamp: Some(t_ready),
        };

        let fields = stat.base_fields();
        assert_eq!(fields["started_to_ready_seconds"], json!(5.0));
    }

    #[test]
    fn init_container_previous_chaining() {
        let t0 = Utc::now();
        let previous = InitContainerStatistic {
            base: ContainerStatistic { ready_timestamp: Some(t0), ..ContainerStatistic::new("init1") },
        };
        let current = InitContainerStatistic {
            base: ContainerStatistic {
                running_timestamp: Some(t0 + chrono::Duration::seconds(1)),
                ..ContainerStatistic::new("init2")
            },
        };

        let fields = current.record_fields(Some(&previous));
        assert_eq!(fields["previous_to_running_seconds"], json!(1.0));
    }

    #[test]
    fn init_container_first_has_no_previous_chaining() {
        let current = InitContainerStatistic {
            base: ContainerStatistic { running_timestamp: Some(Utc::now()), ..ContainerStatistic::new("init1") },
        };
        let fields = current.record_fields(None);
        assert!(!fields.contains_key("previous_to_running_seconds"));
    }

    #[test]
    fn non_init_initialized_to_running_is_relative_to_scheduled() {
        let t_scheduled = Utc::now();
        let t_running = t_scheduled + chrono::Duration::seconds(2);
        let stat = NonInitContainerStatistic {
            base: ContainerStatistic { running_timestamp: Some(t_running), ..ContainerStatistic::new("c1") },
        };

        let fields = stat.record_fields(Some(t_scheduled));
        assert_eq!(fields["initialized_to_running_seconds"], json!(2.0));
    }
}
