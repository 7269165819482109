//! Virtual-clock `NavContext` for scenario runs.

use async_trait::async_trait;
use navguard_env::NavContext;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Virtual clock for the scenario runner. Clones share one clock.
///
/// Time only moves when the runner advances it or a task sleeps, so a run
/// is a pure function of its seed.
#[derive(Clone, Default)]
pub struct SimContext {
    clock_ns: Arc<AtomicU64>,
}

impl SimContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Moves the clock forward.
    pub fn advance_time(&self, duration: Duration) {
        self.clock_ns.fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Jumps the clock to `time`.
    pub fn set_time(&self, time: Duration) {
        self.clock_ns.store(time.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn time_ns(&self) -> u64 {
        self.clock_ns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NavContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    /// Advances the virtual clock, then lets every other ready task run
    /// before the sleeper resumes.
    async fn sleep(&self, duration: Duration) {
        self.advance_time(duration);
        tokio::task::yield_now().await;
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }
}
