// Well-known labels used when building emitted metric records.
pub const APP_KUBERNETES_IO_COMPONENT_KEY: &str = "app.kubernetes.io/component";
pub const APP_KUBERNETES_IO_INSTANCE_KEY: &str = "app.kubernetes.io/instance";
pub const APP_KUBERNETES_IO_MANAGED_BY_KEY: &str = "app.kubernetes.io/managed-by";
pub const APP_KUBERNETES_IO_NAME_KEY: &str = "app.kubernetes.io/name";
pub const APP_KUBERNETES_IO_PART_OF_KEY: &str = "app.kubernetes.io/part-of";
pub const APP_KUBERNETES_IO_VERSION_KEY: &str = "app.kubernetes.io/version";

// Pod condition type names (corev1::PodCondition::type_)
pub const POD_SCHEDULED_CONDITION: &str = "PodScheduled";
pub const POD_INITIALIZED_CONDITION: &str = "PodInitialized";
pub const POD_READY_CONDITION: &str = "PodReady";
pub const CONDITION_STATUS_TRUE: &str = "True";

// Event reasons consumed by the image-pull collector.
pub const EVENT_REASON_PULLING: &str = "Pulling";
pub const EVENT_REASON_PULLED: &str = "Pulled";

// Cancellation / restart reasons used throughout the pod collector.
pub const CANCEL_REASON_POD_ALREADY_RUNNING: &str = "pod already running";
pub const CANCEL_REASON_POD_DELETED: &str = "pod deleted";
pub const CANCEL_REASON_POD_REPLACED: &str = "pod replaced";
pub const CANCEL_REASON_MISSED_DELETE: &str = "pod deleting event missed";

pub const PREMATURE_DELETION_MESSAGE: &str = "premature deletion of pod";
pub const LOST_STATISTICS_MESSAGE: &str = "statistics have been lost";

// Event loop labels, attached to the `event_loop` dimension of the publish/processing/queue-depth
// metrics.
pub const EVENT_LOOP_POD: &str = "pod";
pub const EVENT_LOOP_IMAGE_PULL: &str = "image_pull";

// HTTP 410 Gone, the resource-version-expiry signal on a pod watch.
pub const HTTP_GONE: u16 = 410;
