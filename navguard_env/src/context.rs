//! Core environment context trait for NavGuard.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the fusion and alerting
/// engines run unchanged on the device (tokio) and in the simulation harness.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`
/// - **Simulation**: `SimContext` - a manually advanced virtual clock
///
/// # Determinism
///
/// Every timestamp the engine stamps on a sensor event, every cancel-window
/// deadline and every retry backoff is derived from `now()`. In simulation the
/// clock only moves when the harness advances it.
#[async_trait]
pub trait NavContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// All engine timestamps (detections, proximity, motion, alert sessions)
    /// are expressed on this clock.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock and yields to other tasks
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// Notification sends go through here so that a slow or failing gateway
    /// never stalls the decision loop.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
