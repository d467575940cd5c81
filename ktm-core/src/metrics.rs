use lazy_static::lazy_static;
use prometheus::{
    Counter,
    CounterVec,
    Gauge,
    GaugeVec,
    Registry,
    SummaryVec,
    register_counter_vec_with_registry,
    register_counter_with_registry,
    register_gauge_vec_with_registry,
    register_gauge_with_registry,
    register_summary_vec_with_registry,
};

// Quantile objectives shared by every summary metric: {quantile: allowed error}.
const SUMMARY_OBJECTIVES: &[(f64, f64)] = &[(0.5, 0.05), (0.9, 0.01), (0.99, 0.001)];

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref POD_COLLECTOR_ERRORS: Counter = register_counter_with_registry!(
        "pod_collector_errors_total",
        "errors encountered watching pods",
        REGISTRY
    )
    .unwrap();
    pub static ref POD_COLLECTOR_RESTARTS: Counter = register_counter_with_registry!(
        "pod_collector_restarts_total",
        "number of times the pod watch has been restarted",
        REGISTRY
    )
    .unwrap();
    pub static ref POD_WATCH_EVENTS: CounterVec = register_counter_vec_with_registry!(
        "pod_watch_events_total",
        "pod watch events received, by event type",
        &["event_type"],
        REGISTRY
    )
    .unwrap();
    pub static ref IMAGE_PULL_COLLECTOR_ROUTINES: Gauge = register_gauge_with_registry!(
        "image_pull_collector_routines",
        "number of currently-running image pull collectors",
        REGISTRY
    )
    .unwrap();
    pub static ref IMAGE_PULL_COLLECTOR_ERRORS: Counter = register_counter_with_registry!(
        "image_pull_collector_errors_total",
        "errors encountered watching pod events for image pulls",
        REGISTRY
    )
    .unwrap();
    pub static ref IMAGE_PULL_COLLECTOR_RESTARTS: Counter = register_counter_with_registry!(
        "image_pull_collector_restarts_total",
        "number of times an image pull collector's watch has been restarted",
        REGISTRY
    )
    .unwrap();
    pub static ref IMAGE_PULL_WATCH_EVENTS: CounterVec = register_counter_vec_with_registry!(
        "image_pull_watch_events_total",
        "image pull watch events received, by event type",
        &["event_type"],
        REGISTRY
    )
    .unwrap();
    pub static ref PODS_TRACKED: Gauge = register_gauge_with_registry!(
        "pod_statistics_tracked",
        "number of pods currently tracked by the pod event loop",
        REGISTRY
    )
    .unwrap();
    pub static ref IMAGE_PULL_TRACKED: Gauge = register_gauge_with_registry!(
        "image_pull_statistics_tracked",
        "number of pods currently tracked by the image pull event loop",
        REGISTRY
    )
    .unwrap();
    pub static ref STATISTIC_EVENT_PUBLISH: SummaryVec = register_summary_vec_with_registry!(
        "statistic_event_publish_seconds",
        "time spent blocked sending an event onto an event loop's queue",
        &["event_loop"],
        SUMMARY_OBJECTIVES.to_vec(),
        REGISTRY
    )
    .unwrap();
    pub static ref STATISTIC_EVENT_QUEUE_DEPTH: GaugeVec = register_gauge_vec_with_registry!(
        "statistic_event_queue_depth",
        "number of events enqueued but not yet dispatched",
        &["event_loop"],
        REGISTRY
    )
    .unwrap();
    pub static ref STATISTIC_EVENT_PROCESSING: SummaryVec = register_summary_vec_with_registry!(
        "statistic_event_processing_seconds",
        "time spent applying a single event to an event loop's state",
        &["event_loop"],
        SUMMARY_OBJECTIVES.to_vec(),
        REGISTRY
    )
    .unwrap();
}

/// Forces the lazily-initialized metrics above to register against `REGISTRY` immediately.
/// Call once at startup so `/metrics` is non-empty even before the first event is dispatched.
pub fn register() {
    lazy_static::initialize(&REGISTRY);
    lazy_static::initialize(&POD_COLLECTOR_ERRORS);
    lazy_static::initialize(&POD_COLLECTOR_RESTARTS);
    lazy_static::initialize(&POD_WATCH_EVENTS);
    lazy_static::initialize(&IMAGE_PULL_COLLECTOR_ROUTINES);
    lazy_static::initialize(&IMAGE_PULL_COLLECTOR_ERRORS);
    lazy_static::initialize(&IMAGE_PULL_COLLECTOR_RESTARTS);
    lazy_static::initialize(&IMAGE_PULL_WATCH_EVENTS);
    lazy_static::initialize(&PODS_TRACKED);
    lazy_static::initialize(&IMAGE_PULL_TRACKED);
    lazy_static::initialize(&STATISTIC_EVENT_PUBLISH);
    lazy_static::initialize(&STATISTIC_EVENT_QUEUE_DEPTH);
    lazy_static::initialize(&STATISTIC_EVENT_PROCESSING);
}
