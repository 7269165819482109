//! Static engine configuration.
//!
//! Every threshold the engine uses lives here. The configuration is loaded
//! once at startup from a JSON file and validated; a load or validation
//! failure is fatal because the fusion logic must never run with undefined
//! thresholds.
//!
//! The defaults are starting points taken from bench calibration of the
//! prototype hardware (HC-SR04 ultrasonic, MPU-6050 IMU at ±2g, three
//! classifier models at ~3 fps). They are meant to be re-calibrated per
//! device.

use crate::types::VisionSource;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for this schema
    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A threshold is missing, out of range, or inconsistent
    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

// =============================================================================
// TOP LEVEL
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fusion tick period in milliseconds (default: 150)
    pub tick_period_ms: u64,

    /// Maximum age of a source reading before it is treated as unknown (default: 1500)
    pub staleness_timeout_ms: u64,

    /// Perception adapter settings
    pub vision: VisionConfig,

    /// Range adapter settings
    pub range: RangeConfig,

    /// Fall detector settings
    pub fall: FallConfig,

    /// Alert dispatcher settings
    pub alert: AlertConfig,

    /// Emergency notification content
    pub notification: NotificationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_period_ms: 150,
            staleness_timeout_ms: 1500,
            vision: VisionConfig::default(),
            range: RangeConfig::default(),
            fall: FallConfig::default(),
            alert: AlertConfig::default(),
            notification: NotificationConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parses and validates a configuration from a JSON string.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Fusion tick period.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    /// Staleness timeout shared by all sources.
    pub fn staleness_timeout(&self) -> Duration {
        Duration::from_millis(self.staleness_timeout_ms)
    }

    /// Checks every invariant the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period_ms == 0 {
            return Err(invalid("tick_period_ms must be > 0"));
        }
        if self.staleness_timeout_ms <= self.tick_period_ms {
            return Err(invalid("staleness_timeout_ms must exceed tick_period_ms"));
        }
        self.vision.validate()?;
        self.range.validate()?;
        self.fall.validate()?;
        self.alert.validate()?;
        self.notification.validate()
    }
}

// =============================================================================
// PERCEPTION
// =============================================================================

fn default_min_fraction() -> f32 {
    0.5
}

/// Debounce settings for one vision source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// N: number of most recent frames considered
    pub window: usize,

    /// K: minimum frames (out of N) a label must appear in
    pub min_count: usize,

    /// Minimum share of non-empty frames the label must cover
    #[serde(default = "default_min_fraction")]
    pub min_fraction: f32,

    /// Per-source override of the global confidence floor
    #[serde(default)]
    pub confidence_min: Option<f32>,

    /// Model label table, indexed by class index
    pub labels: Vec<String>,
}

impl DebounceConfig {
    fn with_labels(labels: &[&str]) -> Self {
        Self {
            window: 6,
            min_count: 3,
            min_fraction: default_min_fraction(),
            confidence_min: None,
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    fn validate(&self, source: VisionSource) -> Result<(), ConfigError> {
        if self.window == 0 || self.min_count == 0 || self.min_count > self.window {
            return Err(invalid(format!(
                "{}: debounce requires 1 <= min_count <= window (got {} of {})",
                source, self.min_count, self.window
            )));
        }
        if !(self.min_fraction > 0.0 && self.min_fraction <= 1.0) {
            return Err(invalid(format!("{}: min_fraction must be in (0, 1]", source)));
        }
        if let Some(floor) = self.confidence_min {
            if !(0.0..=1.0).contains(&floor) {
                return Err(invalid(format!("{}: confidence_min must be in [0, 1]", source)));
            }
        }
        if self.labels.is_empty() {
            return Err(invalid(format!("{}: label table is empty", source)));
        }
        Ok(())
    }
}

/// Extra gate applied to vehicle detections, which the surroundings model
/// over-reports on small, distant boxes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleGate {
    pub min_confidence: f32,
    pub min_width: u32,
    pub min_height: u32,
    pub min_area: u32,

    /// Frames of the surroundings window a vehicle must appear in (default: 4)
    pub min_history_count: usize,
}

impl Default for VehicleGate {
    fn default() -> Self {
        Self {
            min_confidence: 0.95,
            min_width: 80,
            min_height: 60,
            min_area: 8000,
            min_history_count: 4,
        }
    }
}

/// Perception adapter settings for all three vision sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Global confidence floor (default: 0.5)
    pub confidence_min: f32,
    pub traffic_light: DebounceConfig,
    pub pedestrian_signal: DebounceConfig,
    pub surroundings: DebounceConfig,
    pub vehicle_gate: VehicleGate,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            confidence_min: 0.5,
            traffic_light: DebounceConfig::with_labels(&["Green", "Red", "Yellow"]),
            pedestrian_signal: DebounceConfig::with_labels(&["Crosswalk", "No_Walk", "Walk"]),
            surroundings: DebounceConfig::with_labels(&[
                "vehicles", "bike", "e-scooter", "person", "stairs", "walls", "tree",
            ]),
            vehicle_gate: VehicleGate::default(),
        }
    }
}

impl VisionConfig {
    /// Debounce settings for a source.
    pub fn source(&self, source: VisionSource) -> &DebounceConfig {
        match source {
            VisionSource::TrafficLight => &self.traffic_light,
            VisionSource::PedestrianSignal => &self.pedestrian_signal,
            VisionSource::Surroundings => &self.surroundings,
        }
    }

    /// Effective confidence floor for a source.
    pub fn floor_for(&self, source: VisionSource) -> f32 {
        self.source(source).confidence_min.unwrap_or(self.confidence_min)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_min) {
            return Err(invalid("vision.confidence_min must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.vehicle_gate.min_confidence) {
            return Err(invalid("vision.vehicle_gate.min_confidence must be in [0, 1]"));
        }
        if self.vehicle_gate.min_history_count > self.surroundings.window {
            return Err(invalid(
                "vision.vehicle_gate.min_history_count must not exceed surroundings.window",
            ));
        }
        for source in VisionSource::ALL {
            self.source(source).validate(source)?;
        }
        Ok(())
    }
}

// =============================================================================
// RANGE
// =============================================================================

/// Range adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeConfig {
    /// Enter `Near` below this filtered distance (default: 50 cm)
    pub near_threshold_cm: f32,

    /// Return to `Clear` above this filtered distance (default: 70 cm)
    pub clear_threshold_cm: f32,

    /// Median filter length in samples (default: 3)
    pub median_window: usize,

    /// Readings beyond the sensor's rated range are rejected (default: 400 cm)
    pub max_range_cm: f32,

    /// Consecutive echo timeouts before a warning is logged (default: 5)
    pub failure_warn_after: u32,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            near_threshold_cm: 50.0,
            clear_threshold_cm: 70.0,
            median_window: 3,
            max_range_cm: 400.0,
            failure_warn_after: 5,
        }
    }
}

impl RangeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.near_threshold_cm.is_finite()
            && self.clear_threshold_cm.is_finite()
            && self.max_range_cm.is_finite())
        {
            return Err(invalid("range: thresholds must be finite"));
        }
        if self.near_threshold_cm <= 0.0 {
            return Err(invalid("range.near_threshold_cm must be > 0"));
        }
        if self.clear_threshold_cm <= self.near_threshold_cm {
            return Err(invalid("range.clear_threshold_cm must exceed near_threshold_cm"));
        }
        if self.median_window == 0 {
            return Err(invalid("range.median_window must be >= 1"));
        }
        if self.max_range_cm <= self.clear_threshold_cm {
            return Err(invalid("range.max_range_cm must exceed clear_threshold_cm"));
        }
        if self.failure_warn_after == 0 {
            return Err(invalid("range.failure_warn_after must be >= 1"));
        }
        Ok(())
    }
}

// =============================================================================
// FALL
// =============================================================================

/// Fall detector settings. Accelerations are in g, angular rates in deg/s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallConfig {
    /// Magnitude below this is near-zero-g (default: 0.5 g)
    pub free_fall_g: f64,

    /// Minimum low-g duration to count as free fall (default: 200 ms)
    pub min_free_fall_ms: u64,

    /// Impact spike threshold (default: 2.5 g)
    pub impact_g: f64,

    /// Impact must follow free-fall onset within this window (default: 700 ms)
    pub impact_window_ms: u64,

    /// Post-impact settling window (default: 2000 ms)
    pub settle_window_ms: u64,

    /// Magnitude variance below this during settling means "person down" (default: 0.05 g²)
    pub stillness_variance: f64,

    /// Deviation from the settling mean that counts as large motion (default: 1.0 g)
    pub movement_g: f64,

    /// Angular rate that counts as large motion (default: 150 deg/s)
    pub movement_gyro_dps: f64,

    /// Jerk spike reported as suspected (default: 15 g/s)
    pub jerk_threshold_gps: f64,

    /// Triggers ignored for this long after release (default: 2000 ms)
    pub rearm_cooldown_ms: u64,

    /// Longest the magnitude may stay above `impact_g` before the candidate
    /// is dropped as vibration rather than a fall (default: 500 ms)
    pub impact_ringdown_ms: u64,
}

impl Default for FallConfig {
    fn default() -> Self {
        Self {
            free_fall_g: 0.5,
            min_free_fall_ms: 200,
            impact_g: 2.5,
            impact_window_ms: 700,
            settle_window_ms: 2000,
            stillness_variance: 0.05,
            movement_g: 1.0,
            movement_gyro_dps: 150.0,
            jerk_threshold_gps: 15.0,
            rearm_cooldown_ms: 2000,
            impact_ringdown_ms: 500,
        }
    }
}

impl FallConfig {
    pub fn min_free_fall(&self) -> Duration {
        Duration::from_millis(self.min_free_fall_ms)
    }

    pub fn impact_window(&self) -> Duration {
        Duration::from_millis(self.impact_window_ms)
    }

    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }

    pub fn rearm_cooldown(&self) -> Duration {
        Duration::from_millis(self.rearm_cooldown_ms)
    }

    pub fn impact_ringdown(&self) -> Duration {
        Duration::from_millis(self.impact_ringdown_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = [
            self.free_fall_g,
            self.impact_g,
            self.stillness_variance,
            self.movement_g,
            self.movement_gyro_dps,
            self.jerk_threshold_gps,
        ];
        if thresholds.iter().any(|t| !t.is_finite()) {
            return Err(invalid("fall: thresholds must be finite"));
        }
        if self.free_fall_g <= 0.0 || self.free_fall_g >= self.impact_g {
            return Err(invalid("fall: require 0 < free_fall_g < impact_g"));
        }
        if self.impact_window_ms <= self.min_free_fall_ms {
            return Err(invalid("fall.impact_window_ms must exceed min_free_fall_ms"));
        }
        if self.settle_window_ms == 0 {
            return Err(invalid("fall.settle_window_ms must be > 0"));
        }
        if self.stillness_variance <= 0.0 || self.movement_g <= 0.0 || self.movement_gyro_dps <= 0.0 {
            return Err(invalid("fall: stillness/movement thresholds must be > 0"));
        }
        if self.jerk_threshold_gps <= 0.0 {
            return Err(invalid("fall.jerk_threshold_gps must be > 0"));
        }
        if self.impact_ringdown_ms == 0 {
            return Err(invalid("fall.impact_ringdown_ms must be > 0"));
        }
        Ok(())
    }
}

// =============================================================================
// ALERT
// =============================================================================

/// Alert dispatcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Window during which the wearer can cancel (default: 5000 ms)
    pub cancel_window_ms: u64,

    /// Total notification attempts, first included (default: 3)
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 1000 ms)
    pub initial_backoff_ms: u64,

    /// Upper bound on any retry delay (default: 8000 ms)
    pub max_backoff_ms: u64,

    /// Siren keeps sounding this long after the session closes unacknowledged (default: 120 s)
    pub siren_timeout_ms: u64,

    /// Vibration intensity for navigation feedback (default: 0.8)
    pub vibration_intensity: f32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cancel_window_ms: 5000,
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 8000,
            siren_timeout_ms: 120_000,
            vibration_intensity: 0.8,
        }
    }
}

impl AlertConfig {
    pub fn cancel_window(&self) -> Duration {
        Duration::from_millis(self.cancel_window_ms)
    }

    pub fn siren_timeout(&self) -> Duration {
        Duration::from_millis(self.siren_timeout_ms)
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let millis = self.initial_backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(millis.min(self.max_backoff_ms))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cancel_window_ms == 0 {
            return Err(invalid("alert.cancel_window_ms must be > 0"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("alert.max_attempts must be >= 1"));
        }
        if self.initial_backoff_ms == 0 || self.max_backoff_ms < self.initial_backoff_ms {
            return Err(invalid("alert: require 0 < initial_backoff_ms <= max_backoff_ms"));
        }
        if self.siren_timeout_ms == 0 {
            return Err(invalid("alert.siren_timeout_ms must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.vibration_intensity) {
            return Err(invalid("alert.vibration_intensity must be in [0, 1]"));
        }
        Ok(())
    }
}

/// Who gets the emergency message and what it says.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub contact: String,
    pub message: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            contact: "emergency-contact".to_string(),
            message: "Emergency detected! Please check immediately.".to_string(),
        }
    }
}

impl NotificationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.contact.trim().is_empty() {
            return Err(invalid("notification.contact must not be empty"));
        }
        Ok(())
    }
}
