mod guard;
pub mod image_pull;
pub mod pod;

use std::sync::Arc;
use std::sync::atomic::{
    AtomicU64,
    Ordering,
};
use std::time::Instant;

use ktm_core::metrics;
use tokio::sync::{
    mpsc,
    watch,
};
use tokio::task::JoinHandle;

use self::guard::OneShotGuard;

pub type Generation = u64;
type Dispatch<S> = Box<dyn FnOnce(&S) -> S + Send>;

struct QueuedEvent<S> {
    generation: Generation,
    dispatch: Dispatch<S>,
    guard: Arc<OneShotGuard>,
}

/// A generic single-consumer event loop.
///
/// State `S` is applied functionally: each queued event is a closure `FnOnce(&S) -> S` run by the
/// single consumer task, so callers never see partial writes and every published generation is a
/// complete, immutable snapshot. A [`tokio::sync::watch`] channel is the publication fence:
/// watchers see the latest generation opportunistically and may coalesce, matching the semantics
/// Kubernetes watch consumers already expect.
pub struct EventLoop<S> {
    tx: mpsc::Sender<QueuedEvent<S>>,
    next_generation: Arc<AtomicU64>,
    watch_rx: watch::Receiver<(Generation, S)>,
    label: &'static str,
    worker: JoinHandle<()>,
}

impl<S> EventLoop<S>
where
    S: Clone + Send + 'static,
{
    /// Starts the consumer task and returns a handle to it. `queue_length` bounds the channel;
    /// `send` blocks once it fills, providing the only backpressure in the system.
    pub fn start(label: &'static str, queue_length: usize, initial: S) -> Self {
        let (tx, mut rx) = mpsc::channel::<QueuedEvent<S>>(queue_length.max(1));
        let (watch_tx, watch_rx) = watch::channel((0, initial.clone()));
        let next_generation = Arc::new(AtomicU64::new(0));

        let worker = tokio::spawn(async move {
            let mut state = initial;
            while let Some(evt) = rx.recv().await {
                // The guard ensures the queue-depth gauge is incremented exactly once per event,
                // regardless of whether the publisher or the consumer wins the race to observe it
                // first -- see `send` below.
                if evt.guard.fire() {
                    metrics::STATISTIC_EVENT_QUEUE_DEPTH.with_label_values(&[label]).inc();
                }

                let start = Instant::now();
                state = (evt.dispatch)(&state);
                metrics::STATISTIC_EVENT_PROCESSING.with_label_values(&[label]).observe(start.elapsed().as_secs_f64());
                metrics::STATISTIC_EVENT_QUEUE_DEPTH.with_label_values(&[label]).dec();

                // A closed channel just means every watcher dropped; the loop keeps running.
                let _ = watch_tx.send((evt.generation, state.clone()));
            }
        });

        EventLoop { tx, next_generation, watch_rx, label, worker }
    }

    /// Enqueues `dispatch` and returns the generation it will produce once applied. Blocks if the
    /// queue is full; fails if the loop has been closed.
    pub async fn send(&self, dispatch: impl FnOnce(&S) -> S + Send + 'static) -> anyhow::Result<Generation> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = Arc::new(OneShotGuard::new());
        let start = Instant::now();

        self.tx
            .send(QueuedEvent { generation, dispatch: Box::new(dispatch), guard: guard.clone() })
            .await
            .map_err(|_| anyhow::anyhow!("{} event loop is closed", self.label))?;

        if guard.fire() {
            metrics::STATISTIC_EVENT_QUEUE_DEPTH.with_label_values(&[self.label]).inc();
        }
        metrics::STATISTIC_EVENT_PUBLISH.with_label_values(&[self.label]).observe(start.elapsed().as_secs_f64());

        Ok(generation)
    }

    /// Blocks until the loop has published a generation `>= id`, then returns that snapshot.
    pub async fn wait_for_generation(&self, id: Generation) -> anyhow::Result<S> {
        let mut rx = self.watch_rx.clone();
        loop {
            {
                let (gen, state) = &*rx.borrow();
                if *gen >= id {
                    return Ok(state.clone());
                }
            }
            rx.changed().await.map_err(|_| anyhow::anyhow!("{} event loop is closed", self.label))?;
        }
    }

    /// Returns the most recently published snapshot without blocking.
    pub fn current(&self) -> S {
        self.watch_rx.borrow().1.clone()
    }

    /// Returns the most recently published generation without blocking.
    pub fn current_generation(&self) -> Generation {
        self.watch_rx.borrow().0
    }

    /// Subscribes `callback` to every published generation. `callback` returning `false` or the
    /// loop closing ends the subscription.
    pub fn watch_state(&self, mut callback: impl FnMut(&S) -> bool + Send + 'static) -> JoinHandle<()>
    where
        S: Sync,
    {
        let mut rx = self.watch_rx.clone();
        tokio::spawn(async move {
            loop {
                if !callback(&rx.borrow().1) {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
    }

    /// Closes the loop's queue and waits for the consumer task to drain and exit.
    pub async fn close(self) {
        drop(self.tx);
        let _ = self.worker.await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicI64;

    use super::*;

    #[tokio::test]
    async fn dispatch_applies_in_order_and_publishes_generation() {
        let loop_ = EventLoop::start("test", 8, 0i64);

        let g1 = loop_.send(|s| s + 1).await.unwrap();
        let g2 = loop_.send(|s| s * 10).await.unwrap();

        let state = loop_.wait_for_generation(g2).await.unwrap();
        assert_eq!(state, 10);
        assert_eq!(g1, 1);
        assert_eq!(g2, 2);

        loop_.close().await;
    }

    #[tokio::test]
    async fn watch_state_observes_every_published_snapshot_it_catches() {
        let loop_ = EventLoop::start("test-watch", 8, 0i64);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();

        let handle = loop_.watch_state(move |s| {
            seen2.lock().unwrap().push(*s);
            true
        });

        let last = loop_.send(|s| s + 1).await.unwrap();
        loop_.wait_for_generation(last).await.unwrap();

        handle.abort();
        loop_.close().await;

        assert!(seen.lock().unwrap().contains(&1));
    }

    #[tokio::test]
    async fn current_reflects_latest_snapshot() {
        let loop_ = EventLoop::start("test-current", 8, 0i64);
        let last = loop_.send(|s| s + 5).await.unwrap();
        loop_.wait_for_generation(last).await.unwrap();

        assert_eq!(loop_.current(), 5);
        loop_.close().await;
    }

    #[tokio::test]
    async fn close_drains_queued_events_before_exiting() {
        let loop_ = EventLoop::start("test-close", 8, 0i64);
        let counter = Arc::new(AtomicI64::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            loop_
                .send(move |s| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    s + 1
                })
                .await
                .unwrap();
        }
        loop_.close().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }
}
