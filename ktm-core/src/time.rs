// Re-exported so callers depend on `ktm_core::time` rather than reaching for `clockabilly`
// directly; event loops and collectors take `Box<dyn Clockable + Send + Sync>` so tests can
// inject a deterministic clock instead of the wall clock.
pub use clockabilly::{
    Clockable,
    UtcClock,
};
