//! Scenario runner - plays a wearer scenario through the full engine on a
//! virtual clock.
//!
//! The loop advances a `SimContext` in fixed steps and at each step feeds the
//! adapters whatever the wearer's sensors produce, delivers due gateway
//! results and cancel presses, fires dispatcher deadlines and runs the fusion
//! tick. Every source of randomness is derived from the run seed, so a seed
//! reproduces a run exactly.

use crate::context::SimContext;
use crate::devices::{RecordingActuators, SimGateway};
use crate::exporter::SimExport;
use crate::scenarios::ScenarioId;
use crate::wearer::{MotionEvent, NoiseProfile, Truth, Wearer};

use navguard_core::runtime::RangeInput;
use navguard_core::{
    Config, DecisionCore, Effect, FallDetector, FallReport, FusionSnapshot, Label, PerceptionBank,
    RangeAdapter, SessionOutcome, SystemState, VisionSource,
};
use navguard_env::{ActuatorDriver, Delivery, Device, NavContext, Pattern};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Simulation step (ms).
const STEP_MS: u64 = 10;
/// IMU sample period (ms).
const MOTION_MS: u64 = 20;
/// Ultrasonic trigger period (ms).
const RANGE_MS: u64 = 50;
/// Camera frame period per source (ms).
const VISION_MS: u64 = 100;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total fusion ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    pub transitions: u64,
    pub walking_ticks: u64,
    pub obstacle_ticks: u64,
    pub crossing_ticks: u64,
    pub emergency_ticks: u64,

    /// CROSSING while it was not actually safe to cross
    pub false_crossing_ticks: u64,

    /// OBSTACLE with nothing within reach
    pub false_obstacle_ticks: u64,

    /// When EMERGENCY was first entered (seconds)
    pub emergency_at: Option<f64>,

    pub sessions_opened: u32,
    pub notification_attempts: u32,
    pub notifications_delivered: u32,
    pub outcomes: Vec<SessionOutcome>,

    /// Buzzer still sounding when the run ended
    pub siren_on_at_end: bool,

    pub vision_frames: u64,
    pub range_timeouts: u64,
    pub motion_samples: u64,
}

/// One tick of the recorded timeline.
#[derive(Debug, Clone, Copy)]
struct TickRecord {
    t: f64,
    state: SystemState,
}

/// Everything a scenario scripts: the world, the body, the wearer's hand
/// and the gateway.
struct Script {
    truth: Box<dyn Fn(f64) -> Truth>,
    noise: NoiseProfile,
    motion: Vec<(f64, MotionEvent)>,
    cancel_at: Vec<f64>,
    gateway: SimGateway,
}

fn script(scenario: ScenarioId) -> Script {
    let base = Script {
        truth: Box::new(|_| Truth::default()),
        noise: NoiseProfile::clean(),
        motion: Vec::new(),
        cancel_at: Vec::new(),
        gateway: SimGateway::reliable(),
    };

    match scenario {
        ScenarioId::Crosswalk => Script {
            truth: Box::new(|t| {
                let go = (3.0..8.0).contains(&t);
                Truth {
                    traffic_light: Some(if go { Label::Green } else { Label::Red }),
                    walk_sign: Some(if go { Label::Walk } else { Label::NoWalk }),
                    ..Truth::default()
                }
            }),
            ..base
        },

        ScenarioId::LoneGreen => Script {
            truth: Box::new(|_| Truth {
                traffic_light: Some(Label::Green),
                walk_sign: None,
                ..Truth::default()
            }),
            ..base
        },

        ScenarioId::ObstacleLoiter => Script {
            truth: Box::new(|t| {
                let distance = if t < 2.0 {
                    250.0
                } else if t < 3.0 {
                    30.0
                } else if t < 6.0 {
                    60.0 + 4.0 * (2.0 * std::f64::consts::PI * 0.7 * t).sin()
                } else {
                    200.0
                };
                Truth {
                    distance_cm: Some(distance as f32),
                    ..Truth::default()
                }
            }),
            ..base
        },

        ScenarioId::StuckSensor => Script {
            truth: Box::new(|t| Truth {
                traffic_light: Some(Label::Green),
                walk_sign: Some(Label::Walk),
                distance_cm: if t < 3.0 { Some(30.0) } else { None },
                camera_down: [false, t >= 6.0, false],
                ..Truth::default()
            }),
            ..base
        },

        ScenarioId::FallDelivered => Script {
            motion: vec![(5.0, MotionEvent::Fall)],
            ..base
        },

        ScenarioId::FallCanceled => Script {
            motion: vec![(5.0, MotionEvent::Fall)],
            cancel_at: vec![9.0],
            ..base
        },

        ScenarioId::SitDown => Script {
            motion: vec![(4.0, MotionEvent::SitDown), (8.0, MotionEvent::Jolt)],
            ..base
        },

        ScenarioId::GatewayOutage => Script {
            motion: vec![(5.0, MotionEvent::Fall)],
            gateway: SimGateway::down(),
            ..base
        },

        ScenarioId::NoisyCommute => Script {
            truth: Box::new(commute_truth),
            noise: NoiseProfile::noisy(),
            ..base
        },
    }
}

/// A 10 s city block, repeated: a pole to pass, a red light, a green one.
fn commute_truth(t: f64) -> Truth {
    let phase = t % 10.0;
    let (traffic, walk) = if phase < 4.0 {
        (Label::Red, Label::NoWalk)
    } else if phase < 8.0 {
        (Label::Green, Label::Walk)
    } else {
        (Label::Yellow, Label::NoWalk)
    };
    let distance = if (1.0..2.0).contains(&phase) { 35.0 } else { 250.0 };
    let surroundings = if (5.0..7.0).contains(&phase) { Some(Label::Person) } else { None };

    Truth {
        traffic_light: Some(traffic),
        walk_sign: Some(walk),
        surroundings,
        distance_cm: Some(distance),
        ..Truth::default()
    }
}

/// Tolerance for guidance to catch up with a change in the world (s).
const CROSSING_GRACE_SECS: f64 = 1.0;
const OBSTACLE_GRACE_SECS: f64 = 0.5;

/// One run in progress.
struct Simulation {
    config: Config,
    context: SimContext,
    script: Script,
    wearer: Wearer,
    bank: PerceptionBank,
    range: RangeAdapter,
    detector: FallDetector,
    core: DecisionCore,
    actuators: RecordingActuators,
    snapshot: FusionSnapshot,
    /// Gateway results in flight: (due, session, attempt, outcome)
    pending: Vec<(Duration, Uuid, u32, Delivery)>,
    cancels: VecDeque<Duration>,
    timeline: Vec<TickRecord>,
    metrics: ScenarioMetrics,
    export: Option<SimExport>,
}

impl Simulation {
    fn new(config: Config, scenario: ScenarioId, seed: u64, export: bool) -> Self {
        let script = script(scenario);

        // Physics noise is seeded apart from the run seed
        let physics_seed = seed.wrapping_mul(0x9e3779b97f4a7c15);
        let mut wearer = Wearer::new(physics_seed, &config.vision, script.noise);
        for (at, event) in &script.motion {
            wearer.schedule(Duration::from_secs_f64(*at), *event);
        }

        let mut cancels: Vec<Duration> = script.cancel_at.iter().map(|s| Duration::from_secs_f64(*s)).collect();
        cancels.sort();

        Self {
            context: SimContext::new(),
            wearer,
            bank: PerceptionBank::new(&config.vision, config.staleness_timeout()),
            range: RangeAdapter::new(config.range.clone(), config.staleness_timeout()),
            detector: FallDetector::new(config.fall.clone()),
            core: DecisionCore::new(&config),
            actuators: RecordingActuators::new(),
            snapshot: FusionSnapshot::default(),
            pending: Vec::new(),
            cancels: cancels.into(),
            timeline: Vec::new(),
            metrics: ScenarioMetrics::default(),
            export: export.then(|| SimExport::new(scenario.name(), seed)),
            script,
            config,
        }
    }

    fn run(&mut self, duration_secs: f64) {
        let tick_ms = self.config.tick_period_ms;
        let end_ms = (duration_secs * 1000.0) as u64;
        let mut next_tick_ms = tick_ms;
        let mut ms = 0;

        while ms < end_ms {
            self.context.advance_time(Duration::from_millis(STEP_MS));
            ms += STEP_MS;
            let now = self.context.now();
            let truth = (self.script.truth)(now.as_secs_f64());

            if ms % MOTION_MS == 0 {
                self.sense_motion(now);
            }
            if ms % RANGE_MS == 0 {
                self.sense_range(&truth, now);
            }
            if ms % VISION_MS == 0 {
                self.sense_vision(&truth, now);
            }

            while self.cancels.front().is_some_and(|at| *at <= now) {
                if let Some(at) = self.cancels.pop_front() {
                    debug!("Wearer presses cancel at {:?}", at);
                    let effects = self.core.cancel(at);
                    self.apply(effects);
                }
            }

            self.deliver_results(now);

            if self.core.next_deadline().is_some_and(|d| now >= d) {
                let effects = self.core.poll(now);
                self.apply(effects);
            }

            if ms >= next_tick_ms {
                self.tick(now);
                next_tick_ms += tick_ms;
            }
        }

        self.metrics.siren_on_at_end = self.actuators.current(Device::Buzzer) == Pattern::Siren;
    }

    fn sense_motion(&mut self, now: Duration) {
        let sample = self.wearer.motion_sample(now);
        let state = self.detector.process(&sample);
        self.snapshot.fall = Some(FallReport { state, timestamp: now });
        self.metrics.motion_samples += 1;
    }

    fn sense_range(&mut self, truth: &Truth, now: Duration) {
        match self.wearer.range_input(truth, now) {
            RangeInput::Reading { distance_cm, at } => {
                if let Some(state) = self.range.sample(distance_cm, at) {
                    self.snapshot.proximity = Some(state);
                }
            }
            RangeInput::Timeout { at } => {
                self.range.read_failed(at);
                self.metrics.range_timeouts += 1;
            }
        }
    }

    fn sense_vision(&mut self, truth: &Truth, now: Duration) {
        for source in VisionSource::ALL {
            if let Some(frame) = self.wearer.vision_frame(source, truth, now) {
                self.metrics.vision_frames += 1;
                if let Some(event) = self.bank.ingest(&frame) {
                    self.snapshot.set_vision(event);
                }
            }
        }
    }

    fn deliver_results(&mut self, now: Duration) {
        let (due, later): (Vec<_>, Vec<_>) = self.pending.drain(..).partition(|(at, ..)| *at <= now);
        self.pending = later;
        for (_, session, attempt, outcome) in due {
            let effects = self.core.on_send_result(session, attempt, outcome, now);
            self.apply(effects);
        }
    }

    fn tick(&mut self, now: Duration) {
        let (transition, effects) = self.core.tick(&self.snapshot, now);
        let t = now.as_secs_f64();

        if transition.is_edge() {
            self.metrics.transitions += 1;
            debug!("  t={:.2}s | {} -> {}", t, transition.previous, transition.current);
        }
        if transition.entered(SystemState::Emergency) {
            self.metrics.sessions_opened += 1;
            self.metrics.emergency_at.get_or_insert(t);
            if let Some(export) = &mut self.export {
                export.add_event(t, "EMERGENCY entered; alert session opened", Some("warn"));
            }
        }

        match transition.current {
            SystemState::Walking => self.metrics.walking_ticks += 1,
            SystemState::Obstacle => self.metrics.obstacle_ticks += 1,
            SystemState::Crossing => self.metrics.crossing_ticks += 1,
            SystemState::Emergency => self.metrics.emergency_ticks += 1,
        }

        let truth_now = (self.script.truth)(t);
        if transition.current == SystemState::Crossing {
            let earlier = (self.script.truth)((t - CROSSING_GRACE_SECS).max(0.0));
            if !truth_now.crossing() && !earlier.crossing() {
                self.metrics.false_crossing_ticks += 1;
            }
        }
        if transition.current == SystemState::Obstacle {
            let clear = self.config.range.clear_threshold_cm;
            let earlier = (self.script.truth)((t - OBSTACLE_GRACE_SECS).max(0.0));
            let far = |truth: &Truth| truth.distance_cm.map_or(true, |d| d > clear + 20.0);
            if far(&truth_now) && far(&earlier) {
                self.metrics.false_obstacle_ticks += 1;
            }
        }

        self.timeline.push(TickRecord { t, state: transition.current });
        self.apply(effects);

        if let (Some(export), Some(line)) = (&mut self.export, self.core.status()) {
            export.add_frame(line);
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        let now = self.context.now();
        for effect in effects {
            match effect {
                Effect::Actuate(command) => {
                    if let Err(e) = self.actuators.apply(command) {
                        warn!("Actuator rejected {}: {}", command, e);
                    }
                }
                Effect::SendNotification { session, attempt, contact, message } => {
                    self.metrics.notification_attempts += 1;
                    let outcome = self.script.gateway.attempt(&contact, &message);
                    let due = now + self.script.gateway.latency();
                    self.pending.push((due, session, attempt, outcome));
                }
                Effect::SessionClosed { outcome, .. } => {
                    self.metrics.outcomes.push(outcome);
                    self.detector.release(now);
                    self.snapshot.fall = Some(FallReport { state: self.detector.state(), timestamp: now });
                    if let Some(export) = &mut self.export {
                        export.add_event(now.as_secs_f64(), format!("session closed: {:?}", outcome), None);
                    }
                }
                Effect::Report(report) => {
                    if matches!(report, navguard_core::AlertReport::Delivered { .. }) {
                        self.metrics.notifications_delivered += 1;
                    }
                    if let Some(export) = &mut self.export {
                        export.add_event(now.as_secs_f64(), report.to_string(), None);
                    }
                }
            }
        }
    }

    fn ticks_between(&self, from: f64, to: f64, state: SystemState) -> usize {
        self.timeline
            .iter()
            .filter(|r| r.t >= from && r.t < to && r.state == state)
            .count()
    }

    fn first(&self, state: SystemState) -> Option<f64> {
        self.timeline.iter().find(|r| r.state == state).map(|r| r.t)
    }

    fn last(&self, state: SystemState) -> Option<f64> {
        self.timeline.iter().rev().find(|r| r.state == state).map(|r| r.t)
    }

    fn final_state(&self) -> Option<SystemState> {
        self.timeline.last().map(|r| r.state)
    }

    /// Checks the scenario's expectations.
    fn verdict(&self, scenario: ScenarioId) -> Result<(), String> {
        let m = &self.metrics;
        let check = |ok: bool, msg: &str| if ok { Ok(()) } else { Err(msg.to_string()) };

        if !scenario.has_fall() {
            check(m.emergency_ticks == 0, "EMERGENCY without a fall")?;
        }

        match scenario {
            ScenarioId::Crosswalk => {
                let first = self.first(SystemState::Crossing);
                check(
                    first.is_some_and(|t| (3.0..=4.5).contains(&t)),
                    &format!("CROSSING should start within 1.5s of t=3.0 (got {:?})", first),
                )?;
                check(
                    self.last(SystemState::Crossing).is_some_and(|t| t <= 9.0),
                    "CROSSING persisted after the light turned red",
                )?;
                check(m.obstacle_ticks == 0, "OBSTACLE on an open sidewalk")
            }

            ScenarioId::LoneGreen => check(m.crossing_ticks == 0, "CROSSING without a walk sign"),

            ScenarioId::ObstacleLoiter => {
                let first = self.first(SystemState::Obstacle);
                check(
                    first.is_some_and(|t| (2.0..=2.6).contains(&t)),
                    &format!("OBSTACLE should start right after t=2.0 (got {:?})", first),
                )?;
                let window = self.timeline.iter().filter(|r| r.t >= 2.6 && r.t < 6.0).count();
                check(
                    self.ticks_between(2.6, 6.0, SystemState::Obstacle) == window,
                    "OBSTACLE released while the obstacle hovered between thresholds",
                )?;
                check(
                    self.ticks_between(6.8, f64::MAX, SystemState::Obstacle) == 0,
                    "OBSTACLE held after the obstacle moved away",
                )
            }

            ScenarioId::StuckSensor => {
                check(m.range_timeouts > 0, "no echo timeouts simulated")?;
                check(self.ticks_between(0.0, 3.0, SystemState::Obstacle) > 0, "no OBSTACLE before echo loss")?;
                check(
                    self.ticks_between(4.8, f64::MAX, SystemState::Obstacle) == 0,
                    "stale range reading still reported as OBSTACLE",
                )?;
                check(
                    self.ticks_between(4.8, 6.0, SystemState::Crossing) > 0,
                    "CROSSING not resumed once the range reading aged out",
                )?;
                check(
                    self.ticks_between(7.8, f64::MAX, SystemState::Crossing) == 0,
                    "stale walk sign still reported as CROSSING",
                )?;
                check(self.final_state() == Some(SystemState::Walking), "did not settle in WALKING")
            }

            ScenarioId::FallDelivered => {
                check(
                    m.emergency_at.is_some_and(|t| (5.4..=8.5).contains(&t)),
                    &format!("EMERGENCY should follow the fall at t=5.0 (got {:?})", m.emergency_at),
                )?;
                check(m.notification_attempts == 1, "expected exactly one notification attempt")?;
                check(m.notifications_delivered == 1, "notification not delivered")?;
                check(m.outcomes == vec![SessionOutcome::Sent], "session should close as sent")?;
                check(m.siren_on_at_end, "siren should sound until acknowledged")?;
                check(self.final_state() != Some(SystemState::Emergency), "EMERGENCY not released")
            }

            ScenarioId::FallCanceled => {
                check(m.emergency_at.is_some(), "fall not detected")?;
                check(m.notification_attempts == 0, "notification sent despite cancel")?;
                check(m.outcomes == vec![SessionOutcome::Canceled], "session should close as canceled")?;
                check(!m.siren_on_at_end, "siren still sounding after cancel")
            }

            ScenarioId::SitDown => {
                check(m.sessions_opened == 0, "alert session opened for a sit-down")?;
                check(m.notification_attempts == 0, "notification sent for a sit-down")
            }

            ScenarioId::GatewayOutage => {
                let max = self.config.alert.max_attempts;
                check(
                    m.notification_attempts == max,
                    &format!("expected {} attempts, got {}", max, m.notification_attempts),
                )?;
                check(m.outcomes == vec![SessionOutcome::Exhausted], "session should close as exhausted")?;
                check(m.siren_on_at_end, "siren should remain as the fallback alert")
            }

            ScenarioId::NoisyCommute => {
                check(m.false_crossing_ticks == 0, "false CROSSING under noise")?;
                check(m.crossing_ticks > 0, "no CROSSING guidance under noise")?;
                check(m.obstacle_ticks > 0, "obstacles missed under noise")?;
                let total = self.timeline.len().max(1) as f64;
                check(
                    (m.false_obstacle_ticks as f64) / total < 0.02,
                    &format!("{} false OBSTACLE ticks", m.false_obstacle_ticks),
                )
            }
        }
    }
}

/// Runs wearer scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Maximum duration in seconds
    max_duration_secs: f64,

    /// Engine configuration under test
    config: Config,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_duration_secs: 20.0,
            config: Config::default(),
        }
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Sets the engine configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, false).0
    }

    /// Runs a scenario and also returns the per-tick export.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let (result, export) = self.execute(scenario, true);
        let export = export.unwrap_or_else(|| SimExport::new(scenario.name(), self.seed));
        (result, export)
    }

    fn execute(&self, scenario: ScenarioId, export: bool) -> (ScenarioResult, Option<SimExport>) {
        info!("{}: {}", scenario.name(), scenario.description());

        let duration = self.max_duration_secs.max(scenario.min_duration_secs());
        let mut sim = Simulation::new(self.config.clone(), scenario, self.seed, export);
        sim.run(duration);

        let verdict = sim.verdict(scenario);
        let passed = verdict.is_ok();
        let failure_reason = verdict.err();

        let mut export = sim.export.take();
        if let Some(export) = &mut export {
            export.finalize(passed, failure_reason.clone());
        }

        info!(
            "{} {}: {} ticks, {} transitions, {} notification attempts",
            if passed { "✓" } else { "✗" },
            scenario.name(),
            sim.timeline.len(),
            sim.metrics.transitions,
            sim.metrics.notification_attempts
        );

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks: sim.timeline.len() as u64,
            final_time_secs: sim.context.now().as_secs_f64(),
            failure_reason,
            metrics: sim.metrics,
        };
        (result, export)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commute_truth_cycles() {
        assert!(!commute_truth(1.5).crossing());
        assert_eq!(commute_truth(1.5).distance_cm, Some(35.0));
        assert!(commute_truth(15.0).crossing());
        assert!(!commute_truth(29.0).crossing());
    }

    #[test]
    fn test_same_seed_same_metrics() {
        let a = ScenarioRunner::new(7).run(ScenarioId::NoisyCommute);
        let b = ScenarioRunner::new(7).run(ScenarioId::NoisyCommute);
        assert_eq!(a.metrics, b.metrics);
        assert_eq!(a.total_ticks, b.total_ticks);
    }

    #[test]
    fn test_fall_canceled_records_timeline() {
        let (result, export) = ScenarioRunner::new(3).run_with_export(ScenarioId::FallCanceled);
        assert!(result.passed);
        assert_eq!(export.frames.len() as u64, result.total_ticks);
        assert!(export.frames.iter().any(|f| f.state == SystemState::Emergency));
        assert!(export.events.iter().any(|e| e.message.contains("Canceled")));
        assert!(export.passed);
    }

    #[test]
    fn test_run_honors_minimum_duration() {
        let result = ScenarioRunner::new(1).with_duration(1.0).run(ScenarioId::LoneGreen);
        assert!(result.final_time_secs >= 10.0);
        assert_eq!(result.total_ticks, 66);
    }

    /// The live agent, fed by the synthetic wearer on a paused tokio clock.
    #[tokio::test(start_paused = true)]
    async fn test_agent_notifies_after_simulated_fall() {
        use navguard_core::runtime::MotionInput;
        use navguard_core::NavAgent;
        use navguard_env::TokioContext;
        use std::sync::Arc;

        let ctx = TokioContext::shared();
        let gateway = Arc::new(SimGateway::reliable());
        let actuators = Arc::new(RecordingActuators::new());
        let config = Config::default();
        let (mut agent, inputs) =
            NavAgent::new(Arc::clone(&ctx), Arc::clone(&gateway), Arc::clone(&actuators), &config);

        let handle = tokio::spawn(async move {
            agent.run_until(Duration::from_secs(10)).await;
            agent.into_stats()
        });

        let mut wearer = Wearer::new(11, &config.vision, NoiseProfile::clean());
        wearer.schedule(Duration::from_secs(1), MotionEvent::Fall);
        for _ in 0..450 {
            let sample = wearer.motion_sample(ctx.now());
            if inputs.motion.send(MotionInput::Sample(sample)).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(MOTION_MS)).await;
        }
        let stats = handle.await.unwrap();

        assert_eq!(stats.sessions, vec![SessionOutcome::Sent]);
        assert_eq!(gateway.attempts(), 1);
        assert_eq!(gateway.delivered(), 1);
        assert_eq!(actuators.current(Device::Buzzer), Pattern::Siren);
    }

    /// The same agent on the virtual clock: every sleep advances `SimContext`
    /// and hands the producers and the notify task their turn.
    #[tokio::test]
    async fn test_agent_runs_on_virtual_clock() {
        use async_trait::async_trait;
        use nalgebra::Vector3;
        use navguard_core::runtime::MotionInput;
        use navguard_core::{MotionSample, NavAgent};
        use navguard_env::NotificationGateway;
        use std::sync::Arc;

        struct Immediate(SimGateway);

        #[async_trait]
        impl NotificationGateway for Immediate {
            async fn send(&self, contact: &str, message: &str) -> Delivery {
                self.0.attempt(contact, message)
            }
        }

        let ctx = SimContext::shared();
        let gateway = Arc::new(Immediate(SimGateway::reliable()));
        let actuators = Arc::new(RecordingActuators::new());
        let config = Config::default();

        // Free fall from 100ms, impact at 400ms, then 2s lying still
        let mut mags = vec![1.0, 0.1, 0.1, 0.1, 9.0];
        mags.extend(std::iter::repeat(0.2).take(21));

        ctx.set_time(Duration::from_millis(2600));
        let (mut agent, inputs) =
            NavAgent::new(Arc::clone(&ctx), Arc::clone(&gateway), Arc::clone(&actuators), &config);
        for (i, mag) in mags.iter().enumerate() {
            let at = Duration::from_millis(i as u64 * 100);
            let sample = MotionSample::new(Vector3::new(0.0, 0.0, *mag), Vector3::zeros(), at);
            inputs.motion.send(MotionInput::Sample(sample)).await.unwrap();
        }

        agent.run_until(Duration::from_secs(10)).await;
        let stats = agent.into_stats();

        assert_eq!(ctx.now(), Duration::from_secs(10));
        assert_eq!(stats.sessions, vec![SessionOutcome::Sent]);
        assert_eq!(gateway.0.attempts(), 1);
        assert_eq!(actuators.current(Device::Buzzer), Pattern::Siren);
        // One tick per 150ms from 2.75s to 10s
        assert_eq!(stats.ticks, 49);
    }
}
