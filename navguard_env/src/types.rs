//! Common types shared across the environment boundary.

use serde::{Deserialize, Serialize};

/// Output devices on the wearable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    /// Haptic motor used for navigation feedback
    Vibration,
    /// Audible alarm used for emergencies
    Buzzer,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Vibration => write!(f, "vibration"),
            Device::Buzzer => write!(f, "buzzer"),
        }
    }
}

/// Named actuation patterns. The driver maps each to its own cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    /// Device silent
    Off,
    /// Fast continuous pulsing while something is in the way
    ObstaclePulse,
    /// Slow steady cadence while it is safe to cross
    CrossingCadence,
    /// Continuous full-volume alarm
    Siren,
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Pattern::Off => "off",
            Pattern::ObstaclePulse => "obstacle_pulse",
            Pattern::CrossingCadence => "crossing_cadence",
            Pattern::Siren => "siren",
        };
        write!(f, "{}", name)
    }
}

/// A single command for one output device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    /// Target device
    pub device: Device,

    /// Pattern to play (`Off` silences the device)
    pub pattern: Pattern,

    /// Intensity in [0, 1]; ignored for `Off`
    pub intensity: f32,
}

impl ActuatorCommand {
    /// Creates a command playing `pattern` at the given intensity.
    pub fn play(device: Device, pattern: Pattern, intensity: f32) -> Self {
        Self {
            device,
            pattern,
            intensity: intensity.clamp(0.0, 1.0),
        }
    }

    /// Creates a command silencing the device.
    pub fn off(device: Device) -> Self {
        Self {
            device,
            pattern: Pattern::Off,
            intensity: 0.0,
        }
    }

    /// Returns true if this command silences its device.
    pub fn is_off(&self) -> bool {
        self.pattern == Pattern::Off
    }
}

impl std::fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_off() {
            write!(f, "{}=off", self.device)
        } else {
            write!(f, "{}={}@{:.2}", self.device, self.pattern, self.intensity)
        }
    }
}

/// Outcome of a single notification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    /// The transport accepted the message
    Delivered,
    /// The attempt failed, with a human-readable reason
    Failed(String),
}

impl Delivery {
    /// Returns true for `Delivered`.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_intensity_is_clamped() {
        let cmd = ActuatorCommand::play(Device::Buzzer, Pattern::Siren, 3.0);
        assert_eq!(cmd.intensity, 1.0);
        assert!(!cmd.is_off());
    }

    #[test]
    fn test_command_display() {
        let on = ActuatorCommand::play(Device::Vibration, Pattern::ObstaclePulse, 0.8);
        assert_eq!(on.to_string(), "vibration=obstacle_pulse@0.80");
        assert_eq!(ActuatorCommand::off(Device::Buzzer).to_string(), "buzzer=off");
    }
}
