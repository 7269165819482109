//! Outbound emergency notification abstraction.

use async_trait::async_trait;
use crate::types::Delivery;

/// Abstraction for the emergency notification transport (SMS, push, ...).
///
/// # Implementations
///
/// - **Production**: runs an external sender command, or just logs
/// - **Simulation**: scripted outcomes with configurable latency
///
/// # Message Flow
///
/// ```text
/// Dispatcher               Worker task                Gateway
///   |                          |                          |
///   |-- SendNotification ----->|                          |
///   |                          |-- send(contact, msg) --->|
///   |                          |<-- Delivered/Failed -----|
///   |<-- result(session) ------|                          |
/// ```
#[async_trait]
pub trait NotificationGateway: Send + Sync + 'static {
    /// Sends one message to one contact.
    ///
    /// # Returns
    /// * `Delivery::Delivered` - the transport accepted the message
    /// * `Delivery::Failed(reason)` - the attempt failed; the caller decides
    ///   whether to retry
    ///
    /// # Blocking
    /// Latency is unbounded from the caller's point of view. Never await this
    /// on the decision path.
    async fn send(&self, contact: &str, message: &str) -> Delivery;
}
