//! Error types for the NavGuard environment abstraction.

use thiserror::Error;

/// Errors that can occur at the environment boundary.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Notification transport failed (modem down, gateway rejected, etc.)
    #[error("Transport error: {0}")]
    TransportError(String),

    /// An actuator driver refused or failed a command
    #[error("Actuator error: {0}")]
    ActuatorError(String),

    /// Context operation failed
    #[error("Context error: {0}")]
    ContextError(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportError(msg.into())
    }

    /// Creates an actuator error.
    pub fn actuator(msg: impl Into<String>) -> Self {
        Self::ActuatorError(msg.into())
    }
}
