pub mod fleet;
pub mod image_pull;
pub mod pod;

pub use fleet::ImagePullCollectorFleet;
pub use image_pull::ImagePullCollectorHandle;
pub use pod::PodCollector;

/// Tunables threaded through every collector and the collector fleet. Mirrors the CLI flags that
/// control watch server-side behavior and cancellation timing.
#[derive(Clone, Copy, Debug)]
pub struct CollectorConfig {
    pub kube_watch_timeout_secs: u32,
    pub kube_watch_max_events: u32,
    pub image_pull_cancel_delay_secs: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig { kube_watch_timeout_secs: 60, kube_watch_max_events: 100, image_pull_cancel_delay_secs: 3 }
    }
}
