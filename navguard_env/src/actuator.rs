//! Actuator driver abstraction (vibration motor, buzzer).

use crate::error::EnvError;
use crate::types::ActuatorCommand;

/// A driver for the wearable's output devices.
///
/// Commands name a pattern rather than a waveform; the driver owns timing
/// fidelity (pulse widths, PWM duty cycle). `apply` must not block: it hands
/// the command to the hardware and returns.
pub trait ActuatorDriver: Send + Sync + 'static {
    /// Applies a command, replacing whatever pattern the device was playing.
    fn apply(&self, command: ActuatorCommand) -> Result<(), EnvError>;
}
