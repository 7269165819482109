//! Production implementation of NavContext using Tokio.

use crate::NavContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug_span, Instrument};

/// Production context backed by the Tokio clock.
///
/// Time comes from `tokio::time::Instant`, so tests running on a paused
/// runtime clock observe the same time that `sleep()` advances.
pub struct TokioContext {
    /// Clock origin; `now()` is measured from here
    start: Instant,
}

impl TokioContext {
    /// Creates a context whose clock starts now.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Creates a context whose clock started at `start`.
    pub fn starting_at(start: Instant) -> Self {
        Self { start }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NavContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future.instrument(debug_span!("task", task = name)));
    }
}
