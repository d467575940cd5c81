use chrono::{
    DateTime,
    Utc,
};

use crate::constants::*;
use crate::prelude::*;

/// Looks up a condition on a pod by its `type` field and returns its `lastTransitionTime` if the
/// condition's `status` is `"True"`. Used for the `PodScheduled`/`PodInitialized`/`PodReady`
/// condition -> phase-timestamp mapping; any other condition type, or a condition whose status
/// isn't `True`, yields `None`.
pub fn condition_transition_time(status: &corev1::PodStatus, condition_type: &str) -> Option<DateTime<Utc>> {
    status
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == condition_type && c.status == CONDITION_STATUS_TRUE)
        .and_then(|c| c.last_transition_time.as_ref().map(|t| t.0))
}

/// Whether a container status reports `state.running`, i.e. the container has started running
/// (whether or not it has passed its startup/readiness probes).
pub fn is_running(status: &corev1::ContainerStatus) -> bool {
    status.state.as_ref().is_some_and(|s| s.running.is_some())
}

/// Whether a container status reports `started == true`.
pub fn is_started(status: &corev1::ContainerStatus) -> bool {
    status.started.unwrap_or(false)
}

/// Whether a container status reports `ready == true`.
pub fn is_ready(status: &corev1::ContainerStatus) -> bool {
    status.ready
}
