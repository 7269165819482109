//! Synthetic wearer - ground truth and noisy sensor traces.
//!
//! The wearer knows what is really in front of the cameras, how far the
//! nearest obstacle is and what the body is doing. It turns that truth into
//! the raw inputs the device would see: classifier frames, echo distances and
//! IMU samples, all with seeded noise.

use nalgebra::Vector3;
use navguard_core::config::VisionConfig;
use navguard_core::runtime::RangeInput;
use navguard_core::{Label, ModelOutput, MotionSample, RawDetection, VisionSource};
use navguard_core::types::BoundingBox;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use std::time::Duration;

/// What is really there at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Truth {
    pub traffic_light: Option<Label>,
    pub walk_sign: Option<Label>,
    pub surroundings: Option<Label>,
    /// `None` when nothing returns an echo
    pub distance_cm: Option<f32>,
    /// Sources whose camera has stopped delivering frames
    pub camera_down: [bool; 3],
}

impl Default for Truth {
    fn default() -> Self {
        Self {
            traffic_light: None,
            walk_sign: None,
            surroundings: None,
            distance_cm: Some(250.0),
            camera_down: [false; 3],
        }
    }
}

impl Truth {
    pub fn label(&self, source: VisionSource) -> Option<Label> {
        match source {
            VisionSource::TrafficLight => self.traffic_light,
            VisionSource::PedestrianSignal => self.walk_sign,
            VisionSource::Surroundings => self.surroundings,
        }
    }

    pub fn camera_alive(&self, source: VisionSource) -> bool {
        let slot = VisionSource::ALL.iter().position(|s| *s == source).unwrap_or(0);
        !self.camera_down[slot]
    }

    /// True when it is actually safe to cross.
    pub fn crossing(&self) -> bool {
        self.traffic_light == Some(Label::Green) && self.walk_sign == Some(Label::Walk)
    }
}

/// Body events that shape the motion trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionEvent {
    /// Free fall, impact, then lying still
    Fall,
    /// Dropping onto a bench: a shallow dip and a soft bump
    SitDown,
    /// A single hard knock while walking
    Jolt,
}

/// Sensor noise levels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseProfile {
    pub confidence_std: f64,
    /// Probability a visible object is missed in a frame
    pub vision_dropout: f64,
    /// Probability a visible object is reported as another class
    pub vision_confusion: f64,
    pub range_std_cm: f64,
    /// Probability of a short stray echo
    pub range_spike: f64,
    /// Probability of an echo timeout
    pub range_timeout: f64,
    pub accel_std_g: f64,
}

impl NoiseProfile {
    pub fn clean() -> Self {
        Self {
            confidence_std: 0.03,
            vision_dropout: 0.0,
            vision_confusion: 0.0,
            range_std_cm: 1.0,
            range_spike: 0.0,
            range_timeout: 0.0,
            accel_std_g: 0.02,
        }
    }

    pub fn noisy() -> Self {
        Self {
            confidence_std: 0.06,
            vision_dropout: 0.12,
            vision_confusion: 0.08,
            range_std_cm: 2.0,
            range_spike: 0.01,
            range_timeout: 0.02,
            accel_std_g: 0.03,
        }
    }
}

/// Gait cadence while walking (steps per second).
const GAIT_HZ: f64 = 1.8;
/// Vertical acceleration swing of the gait (g).
const GAIT_AMPLITUDE_G: f64 = 0.25;

/// Seeded generator of raw sensor inputs.
pub struct Wearer {
    rng: ChaCha8Rng,
    noise: NoiseProfile,
    /// Class-index tables per source, as configured on the device
    tables: [Vec<Option<Label>>; 3],
    motion: Vec<(Duration, MotionEvent)>,
}

impl Wearer {
    /// Creates a wearer whose noise is driven by `physics_seed`.
    pub fn new(physics_seed: u64, vision: &VisionConfig, noise: NoiseProfile) -> Self {
        let tables: [Vec<Option<Label>>; 3] = VisionSource::ALL.map(|source| {
            vision
                .source(source)
                .labels
                .iter()
                .map(|raw| Label::canonicalize(source, raw))
                .collect()
        });

        Self {
            rng: ChaCha8Rng::seed_from_u64(physics_seed),
            noise,
            tables,
            motion: Vec::new(),
        }
    }

    /// Schedules a body event.
    pub fn schedule(&mut self, at: Duration, event: MotionEvent) {
        self.motion.push((at, event));
        self.motion.sort_by_key(|(t, _)| *t);
    }

    fn gaussian(&mut self, mean: f64, std: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        mean + std * z
    }

    fn table(&self, source: VisionSource) -> &[Option<Label>] {
        let slot = VisionSource::ALL.iter().position(|s| *s == source).unwrap_or(0);
        &self.tables[slot]
    }

    fn class_index(&self, source: VisionSource, label: Label) -> Option<usize> {
        self.table(source).iter().position(|l| *l == Some(label))
    }

    /// One classifier frame, or `None` if the camera is down.
    pub fn vision_frame(&mut self, source: VisionSource, truth: &Truth, at: Duration) -> Option<ModelOutput> {
        if !truth.camera_alive(source) {
            return None;
        }

        let mut detections = Vec::new();
        if let Some(index) = truth.label(source).and_then(|l| self.class_index(source, l)) {
            let roll: f64 = self.rng.gen();
            let class_index = if roll < self.noise.vision_dropout {
                None
            } else if roll < self.noise.vision_dropout + self.noise.vision_confusion {
                let n = self.table(source).len().max(2);
                let other = self.rng.gen_range(1..n);
                Some((index + other) % n)
            } else {
                Some(index)
            };

            if let Some(class_index) = class_index {
                let mean = if truth.label(source) == Some(Label::Vehicle) { 0.97 } else { 0.85 };
                let confidence = self.gaussian(mean, self.noise.confidence_std).clamp(0.0, 1.0) as f32;
                detections.push(RawDetection {
                    class_index,
                    confidence,
                    bbox: Some(BoundingBox { x: 120, y: 90, w: 160, h: 120 }),
                });
            }
        }

        Some(ModelOutput { source, detections, timestamp: at })
    }

    /// One ultrasonic trigger.
    pub fn range_input(&mut self, truth: &Truth, at: Duration) -> RangeInput {
        let Some(distance) = truth.distance_cm else {
            return RangeInput::Timeout { at };
        };

        let roll: f64 = self.rng.gen();
        if roll < self.noise.range_timeout {
            RangeInput::Timeout { at }
        } else if roll < self.noise.range_timeout + self.noise.range_spike {
            let stray: f32 = self.rng.gen_range(3.0..10.0);
            RangeInput::Reading { distance_cm: stray, at }
        } else {
            let distance_cm = self.gaussian(distance as f64, self.noise.range_std_cm).max(0.0) as f32;
            RangeInput::Reading { distance_cm, at }
        }
    }

    /// One IMU sample.
    pub fn motion_sample(&mut self, at: Duration) -> MotionSample {
        let t = at.as_secs_f64();
        let active = self
            .motion
            .iter()
            .rev()
            .find(|(start, _)| *start <= at)
            .map(|(start, event)| (*event, t - start.as_secs_f64()));

        let (magnitude, gyro_std) = match active {
            // Falling: ~0.4 s near-weightless, a short hard impact, then still
            Some((MotionEvent::Fall, tau)) if tau < 0.4 => (self.gaussian(0.1, 0.02), 40.0),
            Some((MotionEvent::Fall, tau)) if tau < 0.46 => (self.gaussian(6.0, 0.3), 200.0),
            Some((MotionEvent::Fall, _)) => (self.gaussian(0.98, 0.01), 1.5),

            Some((MotionEvent::SitDown, tau)) if tau < 0.3 => (self.gaussian(0.7, 0.02), 30.0),
            Some((MotionEvent::SitDown, tau)) if tau < 0.4 => (self.gaussian(1.8, 0.05), 30.0),
            Some((MotionEvent::SitDown, _)) => (self.gaussian(1.0, 0.01), 2.0),

            Some((MotionEvent::Jolt, tau)) if tau < 0.02 => (self.gaussian(4.0, 0.1), 60.0),

            _ => {
                let gait = GAIT_AMPLITUDE_G * (2.0 * std::f64::consts::PI * GAIT_HZ * t).sin();
                (self.gaussian(1.0 + gait, self.noise.accel_std_g), 15.0)
            }
        };

        let lateral = Vector3::new(
            self.gaussian(0.0, self.noise.accel_std_g),
            self.gaussian(0.0, self.noise.accel_std_g),
            0.0,
        );
        let accel = Vector3::new(0.0, 0.0, magnitude.max(0.0)) + lateral;
        let gyro = Vector3::new(
            self.gaussian(0.0, gyro_std),
            self.gaussian(0.0, gyro_std),
            self.gaussian(0.0, gyro_std),
        );

        MotionSample::new(accel, gyro, at)
    }
}
