//! The "FUSION" State Machine - One Decision Per Tick
//!
//! Reads the latest value of every source, applies the staleness rule and
//! resolves the single `SystemState` by priority:
//!
//! ```text
//!   Emergency  ⟸ fall confirmed (latched until the alert session resolves)
//!   Obstacle   ⟸ proximity Near
//!   Crossing   ⟸ pedestrian Walk AND traffic Green
//!   Walking    ⟸ otherwise
//! ```

use crate::types::{
    DetectionEvent, FallReport, FallState, Label, ProximityLevel, ProximityState, SystemState,
    VisionSource,
};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Latest values of all sources, as read from the slots at tick time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusionSnapshot {
    pub traffic_light: Option<DetectionEvent>,
    pub pedestrian_signal: Option<DetectionEvent>,
    pub surroundings: Option<DetectionEvent>,
    pub proximity: Option<ProximityState>,
    pub fall: Option<FallReport>,
}

impl FusionSnapshot {
    pub fn vision(&self, source: VisionSource) -> Option<&DetectionEvent> {
        match source {
            VisionSource::TrafficLight => self.traffic_light.as_ref(),
            VisionSource::PedestrianSignal => self.pedestrian_signal.as_ref(),
            VisionSource::Surroundings => self.surroundings.as_ref(),
        }
    }

    pub fn set_vision(&mut self, event: DetectionEvent) {
        match event.source {
            VisionSource::TrafficLight => self.traffic_light = Some(event),
            VisionSource::PedestrianSignal => self.pedestrian_signal = Some(event),
            VisionSource::Surroundings => self.surroundings = Some(event),
        }
    }
}

/// The inputs of one tick after staleness has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusionView {
    pub traffic: Label,
    pub pedestrian: Label,
    pub surroundings: Label,
    /// `None` when the range reading is unknown or stale
    pub proximity: Option<ProximityState>,
    pub fall: FallState,
}

impl Default for FusionView {
    fn default() -> Self {
        Self {
            traffic: Label::NoDetection,
            pedestrian: Label::NoDetection,
            surroundings: Label::NoDetection,
            proximity: None,
            fall: FallState::Normal,
        }
    }
}

impl FusionView {
    pub fn label(&self, source: VisionSource) -> Label {
        match source {
            VisionSource::TrafficLight => self.traffic,
            VisionSource::PedestrianSignal => self.pedestrian,
            VisionSource::Surroundings => self.surroundings,
        }
    }
}

/// Resolves the highest-priority applicable state.
pub fn decide(view: &FusionView) -> SystemState {
    if view.fall.is_confirmed() {
        SystemState::Emergency
    } else if view.proximity.map(|p| p.level) == Some(ProximityLevel::Near) {
        SystemState::Obstacle
    } else if view.pedestrian == Label::Walk && view.traffic == Label::Green {
        SystemState::Crossing
    } else {
        SystemState::Walking
    }
}

/// Output of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Transition {
    pub previous: SystemState,
    pub current: SystemState,
    pub tick: u64,
    pub at: Duration,
    pub view: FusionView,
}

impl Transition {
    /// True when the state changed on this tick.
    pub fn is_edge(&self) -> bool {
        self.previous != self.current
    }

    /// True when this tick entered `state`.
    pub fn entered(&self, state: SystemState) -> bool {
        self.is_edge() && self.current == state
    }
}

/// Sole owner of the live `SystemState`.
#[derive(Debug, Clone)]
pub struct FusionStateMachine {
    staleness_timeout: Duration,
    current: SystemState,
    tick: u64,
    /// Confirmation time of the fall currently holding `Emergency`
    latched: Option<Duration>,
    /// Confirmation time of the last fall whose session resolved
    last_resolved: Option<Duration>,
}

impl FusionStateMachine {
    pub fn new(staleness_timeout: Duration) -> Self {
        Self {
            staleness_timeout,
            current: SystemState::Walking,
            tick: 0,
            latched: None,
            last_resolved: None,
        }
    }

    pub fn current(&self) -> SystemState {
        self.current
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn is_latched(&self) -> bool {
        self.latched.is_some()
    }

    /// Evaluates one tick at `now`.
    pub fn tick(&mut self, snapshot: &FusionSnapshot, now: Duration) -> Transition {
        self.tick += 1;

        if let Some(FallState::Confirmed { at }) = snapshot.fall.map(|r| r.state) {
            let already_resolved = self.last_resolved.is_some_and(|r| at <= r);
            if self.latched.is_none() && !already_resolved {
                info!("Fall confirmed at {:?}; latching EMERGENCY", at);
                self.latched = Some(at);
            }
        }

        let view = self.view(snapshot, now);
        let previous = self.current;
        self.current = decide(&view);

        if previous != self.current {
            info!("State {} -> {} (tick {})", previous, self.current, self.tick);
        }

        Transition {
            previous,
            current: self.current,
            tick: self.tick,
            at: now,
            view,
        }
    }

    /// Releases the emergency latch once the alert session has resolved.
    pub fn resolve_emergency(&mut self) {
        if let Some(at) = self.latched.take() {
            info!("Emergency for fall at {:?} resolved", at);
            self.last_resolved = Some(at);
        }
    }

    /// Applies the staleness rule to a snapshot.
    pub fn view(&self, snapshot: &FusionSnapshot, now: Duration) -> FusionView {
        let label = |source| {
            snapshot
                .vision(source)
                .filter(|e| self.is_fresh(e.timestamp, now))
                .map_or(Label::NoDetection, |e| e.label)
        };

        let proximity = snapshot.proximity.filter(|p| self.is_fresh(p.timestamp, now));

        let fall = match self.latched {
            Some(at) => FallState::Confirmed { at },
            None => snapshot
                .fall
                .filter(|r| self.is_fresh(r.timestamp, now))
                .map_or(FallState::Normal, |r| match r.state {
                    // A confirmation that was not latched has already resolved
                    FallState::Confirmed { .. } => FallState::Normal,
                    state => state,
                }),
        };

        FusionView {
            traffic: label(VisionSource::TrafficLight),
            pedestrian: label(VisionSource::PedestrianSignal),
            surroundings: label(VisionSource::Surroundings),
            proximity,
            fall,
        }
    }

    fn is_fresh(&self, timestamp: Duration, now: Duration) -> bool {
        now.saturating_sub(timestamp) <= self.staleness_timeout
    }
}
