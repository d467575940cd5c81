use std::sync::atomic::{
    AtomicBool,
    Ordering,
};

/// Fires exactly once across any number of racing callers; only the winner's `fire()` returns
/// `true`. Used to coordinate the queue-depth gauge increment between a `send`er and the consumer
/// that may dequeue and start dispatching before `send` gets a chance to record it.
pub(super) struct OneShotGuard(AtomicBool);

impl OneShotGuard {
    pub(super) fn new() -> Self {
        OneShotGuard(AtomicBool::new(false))
    }

    pub(super) fn fire(&self) -> bool {
        self.0.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_caller_fires() {
        let guard = OneShotGuard::new();
        assert!(guard.fire());
        assert!(!guard.fire());
        assert!(!guard.fire());
    }
}
