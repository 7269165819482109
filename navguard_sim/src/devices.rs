//! Simulated output devices: a scripted notification gateway and actuators
//! that record every command.

use async_trait::async_trait;
use navguard_env::{ActuatorCommand, ActuatorDriver, Delivery, Device, EnvError, NotificationGateway, Pattern};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What the gateway does once its script runs out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayMode {
    /// Every attempt is delivered
    Reliable,
    /// Every attempt fails with the given reason
    Down(String),
}

/// One recorded send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub contact: String,
    pub message: String,
    pub outcome: Delivery,
}

/// Notification gateway with scripted outcomes and a fixed latency.
pub struct SimGateway {
    latency: Duration,
    script: Mutex<VecDeque<Delivery>>,
    mode: GatewayMode,
    sent: Mutex<Vec<SentMessage>>,
}

impl SimGateway {
    pub fn new(mode: GatewayMode, latency: Duration) -> Self {
        Self {
            latency,
            script: Mutex::new(VecDeque::new()),
            mode,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn reliable() -> Self {
        Self::new(GatewayMode::Reliable, Duration::from_millis(300))
    }

    pub fn down() -> Self {
        Self::new(GatewayMode::Down("no cellular service".to_string()), Duration::from_millis(300))
    }

    /// Queues explicit outcomes ahead of the gateway mode.
    pub fn with_script(self, outcomes: impl IntoIterator<Item = Delivery>) -> Self {
        lock(&self.script).extend(outcomes);
        self
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Decides and records the outcome of one attempt.
    pub fn attempt(&self, contact: &str, message: &str) -> Delivery {
        let outcome = lock(&self.script).pop_front().unwrap_or_else(|| match &self.mode {
            GatewayMode::Reliable => Delivery::Delivered,
            GatewayMode::Down(reason) => Delivery::Failed(reason.clone()),
        });
        lock(&self.sent).push(SentMessage {
            contact: contact.to_string(),
            message: message.to_string(),
            outcome: outcome.clone(),
        });
        outcome
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    pub fn attempts(&self) -> usize {
        lock(&self.sent).len()
    }

    pub fn delivered(&self) -> usize {
        lock(&self.sent).iter().filter(|m| m.outcome.is_delivered()).count()
    }
}

#[async_trait]
impl NotificationGateway for SimGateway {
    async fn send(&self, contact: &str, message: &str) -> Delivery {
        tokio::time::sleep(self.latency).await;
        self.attempt(contact, message)
    }
}

/// Actuators that record every command they receive.
#[derive(Default)]
pub struct RecordingActuators {
    commands: Mutex<Vec<ActuatorCommand>>,
}

impl RecordingActuators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<ActuatorCommand> {
        lock(&self.commands).clone()
    }

    /// Pattern the device is currently playing.
    pub fn current(&self, device: Device) -> Pattern {
        lock(&self.commands)
            .iter()
            .rev()
            .find(|c| c.device == device)
            .map_or(Pattern::Off, |c| c.pattern)
    }

    /// Number of times `pattern` was started on `device`.
    pub fn starts(&self, device: Device, pattern: Pattern) -> usize {
        lock(&self.commands)
            .iter()
            .filter(|c| c.device == device && c.pattern == pattern)
            .count()
    }
}

impl ActuatorDriver for RecordingActuators {
    fn apply(&self, command: ActuatorCommand) -> Result<(), EnvError> {
        lock(&self.commands).push(command);
        Ok(())
    }
}
