//! Shared data model for the fusion and alerting engine.
//!
//! All timestamps are `Duration`s on the `NavContext` clock.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// VISION
// =============================================================================

/// The fixed set of vision classifiers running on the NPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisionSource {
    TrafficLight,
    PedestrianSignal,
    Surroundings,
}

impl VisionSource {
    /// All sources, in slot order.
    pub const ALL: [VisionSource; 3] = [
        VisionSource::TrafficLight,
        VisionSource::PedestrianSignal,
        VisionSource::Surroundings,
    ];

    /// Short token used in status lines.
    pub fn token(&self) -> &'static str {
        match self {
            VisionSource::TrafficLight => "traffic",
            VisionSource::PedestrianSignal => "ped",
            VisionSource::Surroundings => "surr",
        }
    }
}

impl std::fmt::Display for VisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VisionSource::TrafficLight => write!(f, "traffic_light"),
            VisionSource::PedestrianSignal => write!(f, "pedestrian_signal"),
            VisionSource::Surroundings => write!(f, "surroundings"),
        }
    }
}

/// Canonical labels across all vision sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    // Traffic light
    Green,
    Red,
    Yellow,
    // Pedestrian signal
    Walk,
    NoWalk,
    Crosswalk,
    // Surroundings
    Vehicle,
    Bike,
    EScooter,
    Person,
    /// Nothing stable above the confidence floor
    NoDetection,
}

impl Label {
    /// Maps a raw model label onto the canonical label for a source.
    ///
    /// Returns `None` for labels the source does not report (e.g. the
    /// surroundings model's "stairs", "walls" and "tree" classes).
    pub fn canonicalize(source: VisionSource, raw: &str) -> Option<Label> {
        let l = raw.trim().to_lowercase();
        match source {
            VisionSource::TrafficLight => match l.as_str() {
                "green" => Some(Label::Green),
                "red" => Some(Label::Red),
                "yellow" => Some(Label::Yellow),
                _ => None,
            },
            VisionSource::PedestrianSignal => {
                if l.contains("walk") && l.contains("no") {
                    Some(Label::NoWalk)
                } else if l == "walk" {
                    Some(Label::Walk)
                } else if l.contains("cross") {
                    Some(Label::Crosswalk)
                } else {
                    None
                }
            }
            VisionSource::Surroundings => match l.as_str() {
                "vehicle" | "vehicles" => Some(Label::Vehicle),
                "bike" => Some(Label::Bike),
                "e-scooter" | "e_scooter" => Some(Label::EScooter),
                "person" => Some(Label::Person),
                _ => None,
            },
        }
    }

    /// Short lowercase token used in status lines.
    pub fn token(&self) -> &'static str {
        match self {
            Label::Green => "green",
            Label::Red => "red",
            Label::Yellow => "yellow",
            Label::Walk => "walk",
            Label::NoWalk => "no_walk",
            Label::Crosswalk => "crosswalk",
            Label::Vehicle => "vehicle",
            Label::Bike => "bike",
            Label::EScooter => "e-scooter",
            Label::Person => "person",
            Label::NoDetection => "none",
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Axis-aligned bounding box in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    pub fn area(&self) -> u32 {
        self.w.saturating_mul(self.h)
    }
}

/// One raw detection as emitted by a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_index: usize,
    pub confidence: f32,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

/// All detections of one classifier for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    pub source: VisionSource,
    pub detections: Vec<RawDetection>,
    pub timestamp: Duration,
}

/// A debounced, normalized vision result.
///
/// Immutable once created; the next event from the same source supersedes it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub source: VisionSource,
    pub label: Label,
    /// Confidence in [0, 1]; 0 for the `NoDetection` sentinel
    pub confidence: f32,
    pub timestamp: Duration,
}

impl DetectionEvent {
    /// The explicit "nothing stable" sentinel.
    pub fn no_detection(source: VisionSource, timestamp: Duration) -> Self {
        Self {
            source,
            label: Label::NoDetection,
            confidence: 0.0,
            timestamp,
        }
    }
}

// =============================================================================
// RANGE
// =============================================================================

/// Hysteretic proximity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityLevel {
    Clear,
    Near,
}

/// Filtered ultrasonic state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProximityState {
    /// Median-filtered distance
    pub distance_cm: f32,
    pub level: ProximityLevel,
    /// Time of the last good reading
    pub timestamp: Duration,
}

// =============================================================================
// MOTION
// =============================================================================

/// One IMU sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    /// Acceleration in g
    pub accel: Vector3<f64>,
    /// Angular rate in deg/s
    pub gyro: Vector3<f64>,
    pub timestamp: Duration,
}

impl MotionSample {
    pub fn new(accel: Vector3<f64>, gyro: Vector3<f64>, timestamp: Duration) -> Self {
        Self { accel, gyro, timestamp }
    }

    /// Acceleration magnitude in g.
    pub fn accel_magnitude(&self) -> f64 {
        self.accel.norm()
    }

    /// Angular rate magnitude in deg/s.
    pub fn gyro_magnitude(&self) -> f64 {
        self.gyro.norm()
    }
}

/// Externally visible fall detector output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallState {
    Normal,
    /// A partial pattern is in progress; no external effect
    Suspected,
    /// A complete free-fall → impact → stillness sequence, confirmed at `at`
    Confirmed { at: Duration },
}

impl FallState {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, FallState::Confirmed { .. })
    }

    pub fn token(&self) -> &'static str {
        match self {
            FallState::Normal => "normal",
            FallState::Suspected => "suspected",
            FallState::Confirmed { .. } => "confirmed",
        }
    }
}

/// Fall state as published into its slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FallReport {
    pub state: FallState,
    /// Time of the motion sample that produced this report
    pub timestamp: Duration,
}

// =============================================================================
// SYSTEM STATE
// =============================================================================

/// The single fused navigation/safety state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemState {
    Walking,
    Obstacle,
    Crossing,
    Emergency,
}

impl SystemState {
    /// Priority rank; higher wins.
    pub fn priority(&self) -> u8 {
        match self {
            SystemState::Walking => 0,
            SystemState::Crossing => 1,
            SystemState::Obstacle => 2,
            SystemState::Emergency => 3,
        }
    }
}

impl std::fmt::Display for SystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SystemState::Walking => "WALKING",
            SystemState::Obstacle => "OBSTACLE",
            SystemState::Crossing => "CROSSING",
            SystemState::Emergency => "EMERGENCY",
        };
        write!(f, "{}", name)
    }
}
