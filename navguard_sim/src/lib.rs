//! NavGuard Deterministic Simulation Harness
//!
//! Runs the fusion and alerting engine against a synthetic wearer on a
//! virtual clock, so whole walks (crossings, obstacles, falls, gateway
//! outages) replay exactly from a single 64-bit seed.
//!
//! # Core Principle: Everything Comes From The Seed
//!
//! - **Time**: `SimContext` owns a virtual clock that only moves when the
//!   runner advances it
//! - **Sensors**: the `Wearer` turns ground truth into noisy classifier
//!   frames, echo distances and IMU samples from a seeded RNG
//! - **Outputs**: `SimGateway` and `RecordingActuators` script and record
//!   everything the engine asks of the outside world
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                       │
//! │                                                          │
//! │   Wearer ──frames/echoes/IMU──► adapters ──► snapshot    │
//! │     ▲                                          │         │
//! │     │ truth(t)                                 ▼         │
//! │   Script ──cancel presses──► DecisionCore (tick/poll)    │
//! │                                  │                       │
//! │                    ┌─────────────┴─────────────┐         │
//! │                    ▼                           ▼         │
//! │              SimGateway              RecordingActuators  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use navguard_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::FallCanceled);
//! assert!(result.passed);
//! ```

mod context;
mod devices;
mod exporter;
mod runner;
pub mod scenarios;
pub mod wearer;

pub use context::SimContext;
pub use devices::{GatewayMode, RecordingActuators, SentMessage, SimGateway};
pub use exporter::{ExportError, SimEvent, SimExport};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use wearer::{MotionEvent, NoiseProfile, Truth, Wearer};
