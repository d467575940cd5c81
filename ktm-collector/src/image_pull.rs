use std::sync::Arc;
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::Mutex;
use std::time::Duration;

use futures::StreamExt;
use kube::Api;
use kube::api::{
    ListParams,
    WatchEvent,
};
use ktm_core::constants::{
    EVENT_REASON_PULLED,
    EVENT_REASON_PULLING,
    HTTP_GONE,
};
use ktm_core::metrics;
use ktm_core::prelude::*;
use ktm_state::ImagePullEventLoop;
use tokio::sync::oneshot;
use tracing::{
    debug,
    info,
    warn,
};

use crate::CollectorConfig;

/// Shared cancellation machinery for one image-pull collector: a one-shot reason channel plus an
/// atomic flag that makes concurrent `cancel()` calls idempotent -- only the first to flip the
/// flag gets to deliver its reason.
struct CancelState {
    canceled: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<&'static str>>>,
}

/// A handle to one Pod's image-pull collector task. The task itself runs detached; this handle
/// only exposes cancellation and a one-shot completion signal the fleet uses to reap finished
/// collectors.
pub struct ImagePullCollectorHandle {
    cancel_state: Arc<CancelState>,
    config: CollectorConfig,
    completion_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl ImagePullCollectorHandle {
    pub fn spawn(pod: corev1::Pod, client: kube::Client, event_loop: Arc<ImagePullEventLoop>, config: CollectorConfig) -> Self {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let cancel_state = Arc::new(CancelState { canceled: AtomicBool::new(false), sender: Mutex::new(Some(cancel_tx)) });

        tokio::spawn(async move {
            run(pod, client, event_loop, config, cancel_rx).await;
            let _ = done_tx.send(());
        });

        ImagePullCollectorHandle { cancel_state, config, completion_rx: Mutex::new(Some(done_rx)) }
    }

    /// Runs the two-phase cancellation protocol on a dedicated task: sleep to let in-flight pulls
    /// flush, then deliver `reason` through the cancel channel unless someone already has.
    pub fn cancel(&self, reason: &'static str) {
        let state = self.cancel_state.clone();
        let delay = self.config.image_pull_cancel_delay_secs;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay.into())).await;

            if state.canceled.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
                debug!(reason, "image-pull collector already canceled, ignoring duplicate");
                return;
            }
            if let Some(tx) = state.sender.lock().unwrap().take() {
                let _ = tx.send(reason);
            }
        });
    }

    /// Takes the one-shot completion receiver. Only the fleet's reaper task should call this, and
    /// only once per handle -- a second call observes `None`.
    pub fn take_completion(&self) -> Option<oneshot::Receiver<()>> {
        self.completion_rx.lock().unwrap().take()
    }
}

async fn run(
    pod: corev1::Pod,
    client: kube::Client,
    event_loop: Arc<ImagePullEventLoop>,
    config: CollectorConfig,
    mut cancel_rx: oneshot::Receiver<&'static str>,
) {
    let namespace = pod.namespace().unwrap_or_default();
    let uid = pod.uid().unwrap_or_default();
    let api: Api<corev1::Event> = Api::namespaced(client, &namespace);
    let lp = ListParams {
        field_selector: Some(format!("involvedObject.uid={uid}")),
        timeout: Some(config.kube_watch_timeout_secs),
        limit: Some(config.kube_watch_max_events),
        ..Default::default()
    };

    loop {
        metrics::IMAGE_PULL_COLLECTOR_ROUTINES.inc();
        let resource_version = match api.list(&lp).await {
            Ok(list) => list.metadata.resource_version.unwrap_or_default(),
            Err(error) => {
                metrics::IMAGE_PULL_COLLECTOR_ERRORS.inc();
                warn!(%error, pod = %pod.name_any(), "failed to list events for image-pull collector");
                metrics::IMAGE_PULL_COLLECTOR_ROUTINES.dec();
                return;
            },
        };

        let mut stream = match api.watch(&lp, &resource_version).await {
            Ok(stream) => stream.boxed(),
            Err(error) => {
                metrics::IMAGE_PULL_COLLECTOR_ERRORS.inc();
                warn!(%error, pod = %pod.name_any(), "failed to start image-pull event watch");
                metrics::IMAGE_PULL_COLLECTOR_ROUTINES.dec();
                return;
            },
        };

        let outcome = loop {
            tokio::select! {
                biased;
                reason = &mut cancel_rx => {
                    info!(reason = reason.unwrap_or("cancelled"), pod = %pod.name_any(), "image-pull collector cancelled");
                    break Outcome::Cancelled;
                },
                next = stream.next() => {
                    match next {
                        Some(Ok(WatchEvent::Added(event))) => {
                            metrics::IMAGE_PULL_WATCH_EVENTS.with_label_values(&["Added"]).inc();
                            handle_event(&pod, &event_loop, &event).await;
                        },
                        Some(Ok(WatchEvent::Modified(_) | WatchEvent::Deleted(_))) => {},
                        Some(Ok(WatchEvent::Bookmark(_))) => {},
                        Some(Ok(WatchEvent::Error(error))) => {
                            metrics::IMAGE_PULL_COLLECTOR_ERRORS.inc();
                            if error.code == HTTP_GONE {
                                break Outcome::Restart;
                            }
                            warn!(%error, pod = %pod.name_any(), "image-pull event watch error");
                        },
                        Some(Err(error)) => {
                            metrics::IMAGE_PULL_COLLECTOR_ERRORS.inc();
                            warn!(%error, pod = %pod.name_any(), "image-pull event watch stream error");
                        },
                        None => break Outcome::Restart,
                    }
                },
            }
        };

        metrics::IMAGE_PULL_COLLECTOR_ROUTINES.dec();
        match outcome {
            Outcome::Cancelled => return,
            Outcome::Restart => metrics::IMAGE_PULL_COLLECTOR_RESTARTS.inc(),
        }
    }
}

enum Outcome {
    Cancelled,
    Restart,
}

/// Only `Added` events reporting `Pulling`/`Pulled` against a container field path are forwarded.
async fn handle_event(pod: &corev1::Pod, event_loop: &Arc<ImagePullEventLoop>, event: &corev1::Event) {
    let Some(reason) = event.reason.as_deref() else { return };
    if reason != EVENT_REASON_PULLING && reason != EVENT_REASON_PULLED {
        return;
    }
    let Some(field_path) = event.involved_object.field_path.as_deref() else {
        return;
    };
    let at = event
        .last_timestamp
        .as_ref()
        .or(event.first_timestamp.as_ref())
        .map(|t| t.0)
        .unwrap_or_else(chrono::Utc::now);

    if let Err(error) = event_loop.image_pull_update(pod.clone(), field_path, reason, at).await {
        warn!(%error, pod = %pod.name_any(), "failed to send image-pull update");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use ktm_state::MultiSink;

    use super::*;

    fn pod() -> corev1::Pod {
        corev1::Pod {
            metadata: ObjectMeta { uid: Some("u1".into()), name: Some("p".into()), namespace: Some("ns".into()), ..Default::default() },
            spec: Some(corev1::PodSpec {
                containers: vec![corev1::Container { name: "c1".into(), image: Some("nginx".into()), ..Default::default() }],
                ..Default::default()
            }),
            status: None,
        }
    }

    fn event(reason: &str, field_path: &str) -> corev1::Event {
        corev1::Event {
            metadata: ObjectMeta::default(),
            involved_object: corev1::ObjectReference { field_path: Some(field_path.into()), ..Default::default() },
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn handle_event_ignores_unrelated_reasons() {
        let event_loop = Arc::new(ImagePullEventLoop::start(8, false, Arc::new(MultiSink::new(vec![]))));
        handle_event(&pod(), &event_loop, &event("Killing", "spec.containers{c1}")).await;
        assert!(event_loop.current().is_empty());
        event_loop.close().await;
    }

    #[tokio::test]
    async fn handle_event_forwards_pulling_event() {
        let event_loop = Arc::new(ImagePullEventLoop::start(8, false, Arc::new(MultiSink::new(vec![]))));
        handle_event(&pod(), &event_loop, &event(EVENT_REASON_PULLING, "spec.containers{c1}")).await;

        // handle_event fires-and-forgets the send; force-synchronize by sending a harmless
        // follow-up update and waiting for its generation, which can only be published after the
        // first one was applied (single consumer, strictly ordered).
        let gen = event_loop
            .image_pull_update(pod(), "spec.containers{c1}", EVENT_REASON_PULLING, chrono::Utc::now())
            .await
            .unwrap();
        let state = event_loop.wait_for_generation(gen).await.unwrap();
        assert!(!state.is_empty());

        event_loop.close().await;
    }

    #[tokio::test]
    async fn cancel_is_idempotent_across_concurrent_callers() {
        let handle = Arc::new(ImagePullCollectorHandle {
            cancel_state: Arc::new(CancelState { canceled: AtomicBool::new(false), sender: Mutex::new(None) }),
            config: CollectorConfig { image_pull_cancel_delay_secs: 0, ..Default::default() },
            completion_rx: Mutex::new(None),
        });

        handle.cancel("first");
        handle.cancel("second");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(handle.cancel_state.canceled.load(Ordering::SeqCst));
    }
}
