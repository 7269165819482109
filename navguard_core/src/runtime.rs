//! Agent Runtime - Wires producers, slots and the decision core to the
//! environment context.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          NavAgent                             │
//! │                                                               │
//! │  vision ─► PerceptionBank ─┐                                  │
//! │  range  ─► RangeAdapter  ──┼─► SlotBoard ─► tick ─┐           │
//! │  motion ─► FallDetector  ──┘      ▲               ▼           │
//! │               ▲                   │         DecisionCore      │
//! │               └── release epoch ──┼───── SessionClosed        │
//! │                                   │               │           │
//! │  cancel ─────────────────────────────────────────►│           │
//! │                                          Actuate / Send       │
//! │                                                ▼              │
//! │                        ActuatorDriver   NotificationGateway   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use navguard_core::{Config, NavAgent};
//! use navguard_env::TokioContext;
//!
//! let ctx = TokioContext::shared();
//! let (mut agent, inputs) = NavAgent::new(ctx, gateway, actuators, &Config::default());
//!
//! // Feed `inputs` from the sensor drivers, then run the decision loop
//! agent.run().await;
//! ```

use crate::config::Config;
use crate::decision::DecisionCore;
use crate::dispatcher::{AlertReport, Effect, SessionOutcome};
use crate::fall::FallDetector;
use crate::perception::PerceptionBank;
use crate::range::RangeAdapter;
use crate::slots::{SlotBoard, SlotWriter, SlotWriters};
use crate::telemetry::StatusLine;
use crate::types::{FallReport, ModelOutput, MotionSample, ProximityState};
use navguard_env::{ActuatorDriver, Delivery, NavContext, NotificationGateway};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Capacity of each sensor input queue.
const INPUT_QUEUE: usize = 64;

/// Ultrasonic driver output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeInput {
    Reading { distance_cm: f32, at: Duration },
    /// Echo timeout or trigger failure
    Timeout { at: Duration },
}

/// IMU driver output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionInput {
    Sample(MotionSample),
    BusError { at: Duration },
}

/// The wearer's cancel button. Each press is stamped when it happens.
pub struct CancelButton<Ctx: NavContext> {
    context: Arc<Ctx>,
    tx: mpsc::UnboundedSender<Duration>,
}

impl<Ctx: NavContext> CancelButton<Ctx> {
    pub fn press(&self) {
        let at = self.context.now();
        if self.tx.send(at).is_err() {
            debug!("Cancel at {:?} after agent shutdown", at);
        }
    }
}

impl<Ctx: NavContext> Clone for CancelButton<Ctx> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            tx: self.tx.clone(),
        }
    }
}

/// Input side of a running agent.
pub struct NavInputs<Ctx: NavContext> {
    pub vision: mpsc::Sender<ModelOutput>,
    pub range: mpsc::Sender<RangeInput>,
    pub motion: mpsc::Sender<MotionInput>,
    pub cancel: CancelButton<Ctx>,
}

/// Counters and reports collected while running.
#[derive(Debug, Clone, Default)]
pub struct AgentStats {
    pub ticks: u64,
    pub transitions: u64,
    pub send_attempts: u32,
    pub sessions: Vec<SessionOutcome>,
    pub reports: Vec<AlertReport>,
}

#[derive(Debug)]
struct SendResult {
    session: Uuid,
    attempt: u32,
    outcome: Delivery,
}

/// The navigation agent.
///
/// Generic over the context, gateway and actuator implementations so the
/// same loop runs on the device (tokio) and under test.
pub struct NavAgent<Ctx, Gw, Act>
where
    Ctx: NavContext,
    Gw: NotificationGateway,
    Act: ActuatorDriver,
{
    context: Arc<Ctx>,
    gateway: Arc<Gw>,
    actuators: Arc<Act>,
    core: DecisionCore,
    board: SlotBoard,
    tick_period: Duration,
    next_tick: Duration,
    cancel_rx: mpsc::UnboundedReceiver<Duration>,
    results_tx: mpsc::UnboundedSender<SendResult>,
    results_rx: mpsc::UnboundedReceiver<SendResult>,
    release_tx: watch::Sender<u64>,
    status_tx: Option<mpsc::UnboundedSender<StatusLine>>,
    stats: AgentStats,
}

impl<Ctx, Gw, Act> NavAgent<Ctx, Gw, Act>
where
    Ctx: NavContext,
    Gw: NotificationGateway,
    Act: ActuatorDriver,
{
    /// Creates the agent and spawns its three sensor producers.
    ///
    /// Must be called from within the context's runtime.
    pub fn new(
        context: Arc<Ctx>,
        gateway: Arc<Gw>,
        actuators: Arc<Act>,
        config: &Config,
    ) -> (Self, NavInputs<Ctx>) {
        let (writers, board) = SlotBoard::new();
        let (vision_tx, vision_rx) = mpsc::channel(INPUT_QUEUE);
        let (range_tx, range_rx) = mpsc::channel(INPUT_QUEUE);
        let (motion_tx, motion_rx) = mpsc::channel(INPUT_QUEUE);
        let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = watch::channel(0u64);

        context.spawn(
            "vision",
            vision_producer(
                PerceptionBank::new(&config.vision, config.staleness_timeout()),
                vision_rx,
                writers.clone(),
            ),
        );
        context.spawn(
            "range",
            range_producer(
                RangeAdapter::new(config.range.clone(), config.staleness_timeout()),
                range_rx,
                writers.proximity.clone(),
            ),
        );
        context.spawn(
            "motion",
            motion_producer(
                Arc::clone(&context),
                FallDetector::new(config.fall.clone()),
                motion_rx,
                release_rx,
                writers.fall,
            ),
        );

        let inputs = NavInputs {
            vision: vision_tx,
            range: range_tx,
            motion: motion_tx,
            cancel: CancelButton {
                context: Arc::clone(&context),
                tx: cancel_tx,
            },
        };

        let next_tick = context.now() + config.tick_period();
        let agent = Self {
            context,
            gateway,
            actuators,
            core: DecisionCore::new(config),
            board,
            tick_period: config.tick_period(),
            next_tick,
            cancel_rx,
            results_tx,
            results_rx,
            release_tx,
            status_tx: None,
            stats: AgentStats::default(),
        };

        (agent, inputs)
    }

    /// Emits one status line per tick on `tx`.
    pub fn with_status(mut self, tx: mpsc::UnboundedSender<StatusLine>) -> Self {
        self.status_tx = Some(tx);
        self
    }

    pub fn core(&self) -> &DecisionCore {
        &self.core
    }

    pub fn stats(&self) -> &AgentStats {
        &self.stats
    }

    pub fn into_stats(self) -> AgentStats {
        self.stats
    }

    /// Runs the decision loop forever.
    pub async fn run(&mut self) {
        self.run_until(Duration::MAX).await;
    }

    /// Runs the decision loop until the context clock reaches `end`.
    pub async fn run_until(&mut self, end: Duration) {
        info!("NavAgent running: tick {:?}", self.tick_period);

        loop {
            let now = self.context.now();
            if now >= end {
                break;
            }

            let wake = self
                .core
                .next_deadline()
                .map_or(self.next_tick, |d| d.min(self.next_tick))
                .min(end);

            tokio::select! {
                biased;

                Some(at) = self.cancel_rx.recv() => {
                    let effects = self.core.cancel(at);
                    self.execute(effects);
                }

                Some(result) = self.results_rx.recv() => {
                    let now = self.context.now();
                    let effects = self.core.on_send_result(result.session, result.attempt, result.outcome, now);
                    self.execute(effects);
                }

                _ = self.context.sleep(wake.saturating_sub(now)) => {
                    let now = self.context.now();

                    // Any cancel raised before the deadline is seen first
                    while let Ok(at) = self.cancel_rx.try_recv() {
                        let effects = self.core.cancel(at);
                        self.execute(effects);
                    }

                    if self.core.next_deadline().is_some_and(|d| now >= d) {
                        let effects = self.core.poll(now);
                        self.execute(effects);
                    }

                    if now >= self.next_tick {
                        self.on_tick(now);
                        self.next_tick += self.tick_period;
                        if self.next_tick <= now {
                            self.next_tick = now + self.tick_period;
                        }
                    }
                }
            }
        }

        info!(
            "NavAgent stopped after {} ticks ({} transitions, {} alert sessions)",
            self.stats.ticks,
            self.stats.transitions,
            self.stats.sessions.len()
        );
    }

    fn on_tick(&mut self, now: Duration) {
        let snapshot = self.board.snapshot();
        let (transition, effects) = self.core.tick(&snapshot, now);

        self.stats.ticks += 1;
        if transition.is_edge() {
            self.stats.transitions += 1;
        }
        self.execute(effects);

        if let (Some(tx), Some(line)) = (&self.status_tx, self.core.status()) {
            if tx.send(line).is_err() {
                self.status_tx = None;
            }
        }
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Actuate(command) => {
                    if let Err(e) = self.actuators.apply(command) {
                        error!("Actuator command {} failed: {}", command, e);
                    }
                }
                Effect::SendNotification { session, attempt, contact, message } => {
                    self.stats.send_attempts += 1;
                    let gateway = Arc::clone(&self.gateway);
                    let results = self.results_tx.clone();
                    self.context.spawn("notify", async move {
                        let outcome = gateway.send(&contact, &message).await;
                        // Receiver only goes away with the agent
                        let _ = results.send(SendResult { session, attempt, outcome });
                    });
                }
                Effect::SessionClosed { outcome, .. } => {
                    self.stats.sessions.push(outcome);
                    self.release_tx.send_modify(|epoch| *epoch += 1);
                }
                Effect::Report(report) => {
                    debug!("Alert report: {}", report);
                    self.stats.reports.push(report);
                }
            }
        }
    }
}

async fn vision_producer(
    mut bank: PerceptionBank,
    mut rx: mpsc::Receiver<ModelOutput>,
    writers: SlotWriters,
) {
    while let Some(output) = rx.recv().await {
        if let Some(event) = bank.ingest(&output) {
            writers.vision(event.source).publish(event);
        }
    }
    debug!("Vision input closed");
}

async fn range_producer(
    mut adapter: RangeAdapter,
    mut rx: mpsc::Receiver<RangeInput>,
    writer: SlotWriter<ProximityState>,
) {
    while let Some(input) = rx.recv().await {
        match input {
            RangeInput::Reading { distance_cm, at } => {
                if let Some(state) = adapter.sample(distance_cm, at) {
                    writer.publish(state);
                }
            }
            RangeInput::Timeout { at } => {
                adapter.read_failed(at);
            }
        }
    }
    debug!("Range input closed");
}

async fn motion_producer<Ctx: NavContext>(
    context: Arc<Ctx>,
    mut detector: FallDetector,
    mut rx: mpsc::Receiver<MotionInput>,
    mut release: watch::Receiver<u64>,
    writer: SlotWriter<FallReport>,
) {
    loop {
        tokio::select! {
            biased;

            changed = release.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = context.now();
                detector.release(now);
                writer.publish(FallReport { state: detector.state(), timestamp: now });
            }

            input = rx.recv() => match input {
                Some(MotionInput::Sample(sample)) => {
                    let state = detector.process(&sample);
                    writer.publish(FallReport { state, timestamp: sample.timestamp });
                }
                Some(MotionInput::BusError { at }) => {
                    detector.bus_error(at);
                }
                None => break,
            },
        }
    }
    debug!("Motion input closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlertConfig, FallConfig};
    use crate::types::{RawDetection, SystemState, VisionSource};
    use async_trait::async_trait;
    use nalgebra::Vector3;
    use navguard_env::{ActuatorCommand, Device, EnvError, Pattern, TokioContext};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingActuators {
        commands: Mutex<Vec<ActuatorCommand>>,
    }

    impl RecordingActuators {
        fn commands(&self) -> Vec<ActuatorCommand> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl ActuatorDriver for RecordingActuators {
        fn apply(&self, command: ActuatorCommand) -> Result<(), EnvError> {
            self.commands.lock().unwrap().push(command);
            Ok(())
        }
    }

    struct ScriptedGateway {
        outcomes: Mutex<VecDeque<Delivery>>,
        calls: Mutex<u32>,
    }

    impl ScriptedGateway {
        fn new(outcomes: Vec<Delivery>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl NotificationGateway for ScriptedGateway {
        async fn send(&self, _contact: &str, _message: &str) -> Delivery {
            *self.calls.lock().unwrap() += 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Delivery::Delivered)
        }
    }

    fn test_config() -> Config {
        Config {
            fall: FallConfig {
                settle_window_ms: 300,
                ..FallConfig::default()
            },
            alert: AlertConfig {
                cancel_window_ms: 1000,
                initial_backoff_ms: 100,
                max_backoff_ms: 400,
                ..AlertConfig::default()
            },
            ..Config::default()
        }
    }

    async fn feed_fall(ctx: &TokioContext, inputs: &NavInputs<TokioContext>) {
        for mag in [1.0, 1.0, 0.1, 0.1, 0.1, 9.0, 0.2, 0.2, 0.2, 0.2] {
            let sample = MotionSample::new(Vector3::new(0.0, 0.0, mag), Vector3::zeros(), ctx.now());
            inputs.motion.send(MotionInput::Sample(sample)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_fall_notifies_after_window() {
        let ctx = TokioContext::shared();
        let gateway = Arc::new(ScriptedGateway::new(vec![Delivery::Delivered]));
        let actuators = Arc::new(RecordingActuators::default());
        let (mut agent, inputs) =
            NavAgent::new(Arc::clone(&ctx), Arc::clone(&gateway), Arc::clone(&actuators), &test_config());

        let handle = tokio::spawn(async move {
            agent.run_until(Duration::from_secs(5)).await;
            agent.into_stats()
        });
        feed_fall(&ctx, &inputs).await;
        let stats = handle.await.unwrap();

        assert_eq!(stats.sessions, vec![SessionOutcome::Sent]);
        assert_eq!(gateway.calls(), 1);
        assert!(actuators
            .commands()
            .contains(&ActuatorCommand::play(Device::Buzzer, Pattern::Siren, 1.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_inside_window_sends_nothing() {
        let ctx = TokioContext::shared();
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let actuators = Arc::new(RecordingActuators::default());
        let (mut agent, inputs) =
            NavAgent::new(Arc::clone(&ctx), Arc::clone(&gateway), Arc::clone(&actuators), &test_config());

        let handle = tokio::spawn(async move {
            agent.run_until(Duration::from_secs(5)).await;
            agent.into_stats()
        });
        feed_fall(&ctx, &inputs).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        inputs.cancel.press();
        let stats = handle.await.unwrap();

        assert_eq!(stats.sessions, vec![SessionOutcome::Canceled]);
        assert_eq!(stats.send_attempts, 0);
        assert_eq!(gateway.calls(), 0);
        assert_eq!(
            actuators.commands().last(),
            Some(&ActuatorCommand::off(Device::Buzzer))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_gateway_exhausts_attempts() {
        let ctx = TokioContext::shared();
        let failed = Delivery::Failed("modem offline".into());
        let gateway = Arc::new(ScriptedGateway::new(vec![failed.clone(), failed.clone(), failed]));
        let actuators = Arc::new(RecordingActuators::default());
        let (mut agent, inputs) =
            NavAgent::new(Arc::clone(&ctx), Arc::clone(&gateway), Arc::clone(&actuators), &test_config());

        let handle = tokio::spawn(async move {
            agent.run_until(Duration::from_secs(5)).await;
            agent.into_stats()
        });
        feed_fall(&ctx, &inputs).await;
        let stats = handle.await.unwrap();

        assert_eq!(stats.sessions, vec![SessionOutcome::Exhausted]);
        assert_eq!(stats.send_attempts, 3);
        assert_eq!(gateway.calls(), 3);
        assert!(stats
            .reports
            .iter()
            .any(|r| matches!(r, AlertReport::Exhausted { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn test_rejected_range_reading_is_not_published() {
        let (writers, board) = SlotBoard::new();
        let (tx, rx) = mpsc::channel(8);
        let config = Config::default();
        let producer = tokio::spawn(range_producer(
            RangeAdapter::new(config.range.clone(), config.staleness_timeout()),
            rx,
            writers.proximity.clone(),
        ));

        tx.send(RangeInput::Reading { distance_cm: -3.0, at: Duration::ZERO }).await.unwrap();
        tx.send(RangeInput::Timeout { at: Duration::from_millis(100) }).await.unwrap();
        drop(tx);
        producer.await.unwrap();
        assert_eq!(board.snapshot().proximity, None);

        let (tx, rx) = mpsc::channel(8);
        let producer = tokio::spawn(range_producer(
            RangeAdapter::new(config.range.clone(), config.staleness_timeout()),
            rx,
            writers.proximity.clone(),
        ));
        tx.send(RangeInput::Reading { distance_cm: 120.0, at: Duration::from_millis(200) })
            .await
            .unwrap();
        drop(tx);
        producer.await.unwrap();
        let state = board.snapshot().proximity.unwrap();
        assert_eq!(state.timestamp, Duration::from_millis(200));
        assert_eq!(state.distance_cm, 120.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crossing_reaches_status_stream() {
        let ctx = TokioContext::shared();
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let actuators = Arc::new(RecordingActuators::default());
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let (agent, inputs) =
            NavAgent::new(Arc::clone(&ctx), gateway, Arc::clone(&actuators), &test_config());
        let mut agent = agent.with_status(status_tx);

        let handle = tokio::spawn(async move {
            agent.run_until(Duration::from_secs(2)).await;
            agent.into_stats()
        });

        // Default tables: traffic 0 = Green, walk sign 2 = Walk
        for _ in 0..6 {
            for (source, class_index) in [(VisionSource::TrafficLight, 0), (VisionSource::PedestrianSignal, 2)] {
                let output = ModelOutput {
                    source,
                    detections: vec![RawDetection { class_index, confidence: 0.9, bbox: None }],
                    timestamp: ctx.now(),
                };
                inputs.vision.send(output).await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        handle.await.unwrap();

        let mut states = Vec::new();
        while let Ok(line) = status_rx.try_recv() {
            states.push(line.state);
        }
        assert!(states.contains(&SystemState::Crossing));
        assert!(actuators
            .commands()
            .contains(&ActuatorCommand::play(Device::Vibration, Pattern::CrossingCadence, 0.8)));
    }
}
