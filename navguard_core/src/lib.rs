//! NavGuard Core - Sensor Fusion & Alerting Engine
//!
//! Turns three asynchronous, noisy sensor streams into one safety decision:
//! 1. **Vision**: per-model debouncing of classifier output (perception)
//! 2. **Range**: median-filtered, hysteretic proximity (range)
//! 3. **Motion**: free-fall → impact → stillness fall confirmation (fall)
//!
//! The fusion state machine resolves `Walking / Crossing / Obstacle /
//! Emergency` on a fixed tick, and the alert dispatcher turns that into
//! vibration patterns, the siren and the cancelable emergency notification.

pub mod config;
pub mod decision;
pub mod dispatcher;
pub mod fall;
pub mod fusion;
pub mod perception;
pub mod range;
pub mod runtime;
pub mod slots;
pub mod telemetry;
pub mod types;

// Re-export key types for convenience
pub use config::{Config, ConfigError};
pub use decision::DecisionCore;
pub use dispatcher::{AlertDispatcher, AlertReport, AlertSession, Effect, SessionOutcome};
pub use fall::FallDetector;
pub use fusion::{decide, FusionSnapshot, FusionStateMachine, FusionView, Transition};
pub use perception::{PerceptionAdapter, PerceptionBank};
pub use range::RangeAdapter;
pub use runtime::{AgentStats, CancelButton, MotionInput, NavAgent, NavInputs, RangeInput};
pub use slots::{SlotBoard, SlotWriters};
pub use telemetry::StatusLine;
pub use types::{
    DetectionEvent, FallReport, FallState, Label, ModelOutput, MotionSample, ProximityLevel,
    ProximityState, RawDetection, SystemState, VisionSource,
};
