//! Production output devices.

use async_trait::async_trait;
use navguard_env::{ActuatorCommand, ActuatorDriver, Delivery, EnvError, NotificationGateway};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// Upper bound on one run of the sender command.
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends notifications by running an external command as
/// `<program> [args...] <contact> <message>`. Exit status 0 means delivered.
pub struct CommandGateway {
    program: String,
    args: Vec<String>,
}

impl CommandGateway {
    /// Parses a whitespace-separated command line. Returns `None` if empty.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    async fn run(&self, contact: &str, message: &str) -> Result<(), EnvError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(contact)
            .arg(message)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(SEND_TIMEOUT, child)
            .await
            .map_err(|_| EnvError::Timeout(SEND_TIMEOUT.as_millis() as u64))?
            .map_err(|e| EnvError::transport(format!("failed to run {}: {}", self.program, e)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(EnvError::transport(format!("{} ({})", output.status, stderr.trim())))
        }
    }
}

#[async_trait]
impl NotificationGateway for CommandGateway {
    async fn send(&self, contact: &str, message: &str) -> Delivery {
        match self.run(contact, message).await {
            Ok(()) => Delivery::Delivered,
            Err(e) => Delivery::Failed(e.to_string()),
        }
    }
}

/// Gateway used when no sender command is configured. Nothing can leave the
/// device, so every attempt is logged and reported failed; the alert then
/// runs its retries and ends on the local siren.
pub struct LogGateway;

pub const NO_SENDER: &str = "no notification command configured";

#[async_trait]
impl NotificationGateway for LogGateway {
    async fn send(&self, contact: &str, message: &str) -> Delivery {
        warn!("No notification command configured; cannot send to {}: {}", contact, message);
        Delivery::Failed(NO_SENDER.to_string())
    }
}

/// Either gateway, chosen at startup.
pub enum Gateway {
    Command(CommandGateway),
    Log(LogGateway),
}

#[async_trait]
impl NotificationGateway for Gateway {
    async fn send(&self, contact: &str, message: &str) -> Delivery {
        match self {
            Gateway::Command(gateway) => gateway.send(contact, message).await,
            Gateway::Log(gateway) => gateway.send(contact, message).await,
        }
    }
}

/// Actuator driver that logs each command. Stands in for the GPIO drivers
/// when the agent runs off-device.
pub struct LogActuators;

impl ActuatorDriver for LogActuators {
    fn apply(&self, command: ActuatorCommand) -> Result<(), EnvError> {
        info!("actuate {}", command);
        Ok(())
    }
}
