//! The "FALL" Detector - Inertial Fall Confirmation
//!
//! A fall is only confirmed after the full physical sequence:
//!
//! ```text
//!   Idle ──low-g ≥ min_free_fall──► FreeFall ──spike ≤ impact_window──► Impact
//!    ▲                                 │                                   │
//!    ├──────── window elapsed ─────────┘                       first calm sample
//!    └──────── still above impact_g after impact_ringdown ─────────────────┤
//!    ▲                                                                     ▼
//!    └──────────── large motion / too much variance ───────────────── Stillness
//!                                                                          │
//!                                                       settle_window calm │
//!                                                                          ▼
//!                                                                     Confirmed
//! ```
//!
//! `Confirmed` is terminal until [`FallDetector::release`] is called when the
//! owning alert session resolves. A lone jolt or a sit-down never reaches it;
//! such events are reported as `Suspected` and only logged.

use crate::config::FallConfig;
use crate::types::{FallState, MotionSample};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Running mean/variance (Welford).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunningStats {
    count: u32,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance; 0 for fewer than two samples.
    pub fn variance(&self) -> f64 {
        if self.count > 1 {
            self.m2 / self.count as f64
        } else {
            0.0
        }
    }
}

/// Detector phase with the timestamps that drive its windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FallPhase {
    /// Normal motion; `low_g_since` tracks an ongoing near-zero-g run
    Idle { low_g_since: Option<Duration> },
    /// Free fall began at `started`
    FreeFall { started: Duration },
    /// Impact spike at `at`, peak magnitude so far
    Impact { at: Duration, peak_g: f64 },
    /// Settling window that began at `started`
    Stillness { started: Duration, stats: RunningStats },
    /// Terminal until released
    Confirmed { at: Duration },
}

impl FallPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, FallPhase::Idle { .. })
    }
}

/// Candidate phases, as seen from outside the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidatePhase {
    FreeFall,
    Impact,
    Stillness,
}

/// A fall candidate in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallCandidate {
    pub phase: CandidatePhase,
    pub phase_start_time: Duration,
}

/// Inertial fall detector.
#[derive(Debug, Clone)]
pub struct FallDetector {
    config: FallConfig,
    phase: FallPhase,
    previous: Option<MotionSample>,
    /// Triggers are ignored until this time after a release
    rearm_at: Option<Duration>,
}

impl FallDetector {
    pub fn new(config: FallConfig) -> Self {
        Self {
            config,
            phase: FallPhase::Idle { low_g_since: None },
            previous: None,
            rearm_at: None,
        }
    }

    pub fn phase(&self) -> FallPhase {
        self.phase
    }

    /// The candidate in progress, if any.
    pub fn candidate(&self) -> Option<FallCandidate> {
        let (phase, phase_start_time) = match self.phase {
            FallPhase::FreeFall { started } => (CandidatePhase::FreeFall, started),
            FallPhase::Impact { at, .. } => (CandidatePhase::Impact, at),
            FallPhase::Stillness { started, .. } => (CandidatePhase::Stillness, started),
            FallPhase::Idle { .. } | FallPhase::Confirmed { .. } => return None,
        };
        Some(FallCandidate { phase, phase_start_time })
    }

    /// Externally visible state without consuming a sample.
    pub fn state(&self) -> FallState {
        match self.phase {
            FallPhase::Idle { .. } => FallState::Normal,
            FallPhase::Confirmed { at } => FallState::Confirmed { at },
            _ => FallState::Suspected,
        }
    }

    /// Consumes one motion sample.
    pub fn process(&mut self, sample: &MotionSample) -> FallState {
        let t = sample.timestamp;
        let mag = sample.accel_magnitude();
        let jerk = self.jerk(sample);
        self.previous = Some(*sample);

        if let FallPhase::Confirmed { at } = self.phase {
            return FallState::Confirmed { at };
        }

        if let Some(rearm_at) = self.rearm_at {
            if t < rearm_at {
                return FallState::Normal;
            }
            debug!("Fall detector re-armed");
            self.rearm_at = None;
        }

        let cfg = &self.config;
        let (next, state) = match self.phase {
            FallPhase::Idle { low_g_since } => {
                if mag < cfg.free_fall_g {
                    let since = low_g_since.unwrap_or(t);
                    if t.saturating_sub(since) >= cfg.min_free_fall() {
                        debug!("Free fall since {:?} (|a|={:.2}g)", since, mag);
                        (FallPhase::FreeFall { started: since }, FallState::Suspected)
                    } else {
                        (FallPhase::Idle { low_g_since: Some(since) }, FallState::Normal)
                    }
                } else if mag > cfg.impact_g {
                    debug!("Lone impact {:.2}g without free fall; not escalated", mag);
                    (FallPhase::Idle { low_g_since: None }, FallState::Suspected)
                } else if jerk > cfg.jerk_threshold_gps {
                    debug!("Jerk spike {:.1}g/s; not escalated", jerk);
                    (FallPhase::Idle { low_g_since: None }, FallState::Suspected)
                } else {
                    (FallPhase::Idle { low_g_since: None }, FallState::Normal)
                }
            }

            FallPhase::FreeFall { started } => {
                let elapsed = t.saturating_sub(started);
                if mag > cfg.impact_g && elapsed <= cfg.impact_window() {
                    debug!("Impact {:.2}g {:?} after free-fall onset", mag, elapsed);
                    (FallPhase::Impact { at: t, peak_g: mag }, FallState::Suspected)
                } else if elapsed > cfg.impact_window() {
                    debug!("No impact within {:?}; free fall discarded", cfg.impact_window());
                    let low_g_since = (mag < cfg.free_fall_g).then_some(t);
                    (FallPhase::Idle { low_g_since }, FallState::Normal)
                } else {
                    (FallPhase::FreeFall { started }, FallState::Suspected)
                }
            }

            FallPhase::Impact { at, peak_g } => {
                if mag > cfg.impact_g && t.saturating_sub(at) > cfg.impact_ringdown() {
                    debug!(
                        "Still above {:.1}g {:?} after impact (peak {:.2}g); candidate dropped as vibration",
                        cfg.impact_g,
                        t.saturating_sub(at),
                        peak_g.max(mag)
                    );
                    (FallPhase::Idle { low_g_since: None }, FallState::Normal)
                } else if mag > cfg.impact_g {
                    // Still ringing from the impact
                    (FallPhase::Impact { at, peak_g: peak_g.max(mag) }, FallState::Suspected)
                } else {
                    let mut stats = RunningStats::default();
                    stats.push(mag);
                    (FallPhase::Stillness { started: t, stats }, FallState::Suspected)
                }
            }

            FallPhase::Stillness { started, mut stats } => {
                let deviation = (mag - stats.mean()).abs();
                let gyro = sample.gyro_magnitude();
                if deviation > cfg.movement_g || gyro > cfg.movement_gyro_dps {
                    debug!(
                        "Motion resumed while settling (Δ={:.2}g, ω={:.0}°/s); candidate dropped",
                        deviation, gyro
                    );
                    (FallPhase::Idle { low_g_since: None }, FallState::Normal)
                } else {
                    stats.push(mag);
                    if t.saturating_sub(started) < cfg.settle_window() {
                        (FallPhase::Stillness { started, stats }, FallState::Suspected)
                    } else if stats.variance() < cfg.stillness_variance {
                        warn!("Fall confirmed at {:?} (settling variance {:.4})", t, stats.variance());
                        (FallPhase::Confirmed { at: t }, FallState::Confirmed { at: t })
                    } else {
                        debug!("Settling variance {:.4} too high; candidate dropped", stats.variance());
                        (FallPhase::Idle { low_g_since: None }, FallState::Normal)
                    }
                }
            }

            FallPhase::Confirmed { at } => (FallPhase::Confirmed { at }, FallState::Confirmed { at }),
        };

        self.phase = next;
        state
    }

    /// Releases a confirmed fall once its alert session has resolved.
    ///
    /// The detector returns to `Idle` and ignores triggers for the re-arm
    /// cooldown. Has no effect unless a fall is confirmed.
    pub fn release(&mut self, now: Duration) {
        if let FallPhase::Confirmed { at } = self.phase {
            info!("Fall confirmed at {:?} released at {:?}", at, now);
            self.phase = FallPhase::Idle { low_g_since: None };
            self.previous = None;
            self.rearm_at = Some(now + self.config.rearm_cooldown());
        }
    }

    /// Records a motion bus error. Any unconfirmed candidate is dropped.
    pub fn bus_error(&mut self, at: Duration) -> FallState {
        self.previous = None;
        if !matches!(self.phase, FallPhase::Confirmed { .. }) {
            if !self.phase.is_idle() {
                warn!("Motion bus error at {:?}; dropping fall candidate", at);
            }
            self.phase = FallPhase::Idle { low_g_since: None };
        }
        self.state()
    }

    /// Jerk magnitude in g/s against the previous sample.
    fn jerk(&self, sample: &MotionSample) -> f64 {
        match self.previous {
            Some(prev) if sample.timestamp > prev.timestamp => {
                let dt = (sample.timestamp - prev.timestamp).as_secs_f64();
                (sample.accel - prev.accel).norm() / dt
            }
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use proptest::prelude::*;

    const STEP_MS: u64 = 100;

    fn detector() -> FallDetector {
        FallDetector::new(FallConfig {
            settle_window_ms: 300,
            rearm_cooldown_ms: 1000,
            ..FallConfig::default()
        })
    }

    fn sample(mag: f64, t_ms: u64) -> MotionSample {
        MotionSample::new(Vector3::new(0.0, 0.0, mag), Vector3::zeros(), Duration::from_millis(t_ms))
    }

    fn run(detector: &mut FallDetector, mags: &[f64], start_ms: u64) -> Vec<FallState> {
        mags.iter()
            .enumerate()
            .map(|(i, &m)| detector.process(&sample(m, start_ms + i as u64 * STEP_MS)))
            .collect()
    }

    #[test]
    fn test_full_sequence_confirms_after_last_stillness_sample() {
        let mut det = detector();
        let states = run(&mut det, &[1.0, 1.0, 0.1, 0.1, 0.1, 9.0, 0.2, 0.2, 0.2, 0.2], 0);

        assert!(states[..9].iter().all(|s| !s.is_confirmed()));
        assert_eq!(states[9], FallState::Confirmed { at: Duration::from_millis(900) });
    }

    #[test]
    fn test_motion_during_settling_reverts_to_idle() {
        let mut det = detector();
        let states = run(&mut det, &[1.0, 1.0, 0.1, 0.1, 0.1, 9.0, 0.2, 5.0, 0.2, 0.2], 0);

        assert!(states.iter().all(|s| !s.is_confirmed()));
        assert!(det.phase().is_idle());
        assert_eq!(det.state(), FallState::Normal);
    }

    #[test]
    fn test_lone_impact_is_only_suspected() {
        let mut det = detector();
        let states = run(&mut det, &[1.0, 1.0, 9.0, 1.0, 1.0, 1.0, 1.0, 1.0], 0);

        assert_eq!(states[2], FallState::Suspected);
        assert!(states.iter().all(|s| !s.is_confirmed()));
        assert!(det.phase().is_idle());
    }

    #[test]
    fn test_free_fall_without_impact_times_out() {
        let mut det = detector();
        // 0.1g for 1s: device set down gently / carried in a lift
        let mut mags = vec![1.0];
        mags.extend(std::iter::repeat(0.1).take(10));
        mags.push(1.0);
        let states = run(&mut det, &mags, 0);

        assert!(states.iter().all(|s| !s.is_confirmed()));
        assert!(det.phase().is_idle());
    }

    #[test]
    fn test_short_dip_is_not_free_fall() {
        let mut det = detector();
        // Low-g for only 100ms, then an impact
        let states = run(&mut det, &[1.0, 0.1, 0.1, 9.0, 1.0, 1.0, 1.0, 1.0], 0);
        assert!(states.iter().all(|s| !s.is_confirmed()));
    }

    #[test]
    fn test_candidate_tracks_phase_start() {
        let mut det = detector();
        run(&mut det, &[1.0, 0.1, 0.1, 0.1], 0);
        assert_eq!(
            det.candidate(),
            Some(FallCandidate {
                phase: CandidatePhase::FreeFall,
                phase_start_time: Duration::from_millis(100),
            })
        );
    }

    #[test]
    fn test_confirmed_is_terminal_until_release() {
        let mut det = detector();
        run(&mut det, &[1.0, 1.0, 0.1, 0.1, 0.1, 9.0, 0.2, 0.2, 0.2, 0.2], 0);

        // Wearer gets up: confirmation still holds
        let states = run(&mut det, &[1.0, 3.0, 1.0], 1000);
        assert!(states.iter().all(|s| s.is_confirmed()));

        det.release(Duration::from_millis(1300));
        assert_eq!(det.state(), FallState::Normal);
    }

    #[test]
    fn test_rearm_cooldown_suppresses_new_candidate() {
        let mut det = detector();
        run(&mut det, &[1.0, 1.0, 0.1, 0.1, 0.1, 9.0, 0.2, 0.2, 0.2, 0.2], 0);
        det.release(Duration::from_millis(1000));

        // Inside the 1s cooldown: a full pattern is ignored
        let states = run(&mut det, &[0.1, 0.1, 0.1, 9.0, 0.2, 0.2, 0.2, 0.2], 1100);
        assert!(states.iter().all(|s| *s == FallState::Normal));

        // After the cooldown the detector is armed again
        let states = run(&mut det, &[1.0, 0.1, 0.1, 0.1, 9.0, 0.2, 0.2, 0.2, 0.2], 2100);
        assert!(states.last().unwrap().is_confirmed());
    }

    #[test]
    fn test_gyro_motion_during_settling_reverts() {
        let mut det = detector();
        run(&mut det, &[1.0, 0.1, 0.1, 0.1, 9.0, 1.0], 0);
        let rolling = MotionSample::new(
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 300.0, 0.0),
            Duration::from_millis(600),
        );
        assert_eq!(det.process(&rolling), FallState::Normal);
        assert!(det.phase().is_idle());
    }

    #[test]
    fn test_bus_error_drops_candidate_but_not_confirmation() {
        let mut det = detector();
        run(&mut det, &[1.0, 0.1, 0.1, 0.1], 0);
        assert_eq!(det.bus_error(Duration::from_millis(400)), FallState::Normal);

        run(&mut det, &[1.0, 1.0, 0.1, 0.1, 0.1, 9.0, 0.2, 0.2, 0.2, 0.2], 500);
        assert!(det.bus_error(Duration::from_millis(1500)).is_confirmed());
    }

    #[test]
    fn test_sustained_vibration_after_impact_is_dropped() {
        let mut det = detector();
        // Free fall, impact at 400ms, then the device keeps rattling above impact_g
        let mut mags = vec![1.0, 0.1, 0.1, 0.1];
        mags.extend(std::iter::repeat(9.0).take(10));
        let states = run(&mut det, &mags, 0);

        // Held through 900ms, dropped on the first sample past the ring-down
        assert_eq!(states[9], FallState::Suspected);
        assert_eq!(states[10], FallState::Normal);
        assert!(det.phase().is_idle());
        assert_eq!(det.candidate(), None);
        assert!(states.iter().all(|s| !s.is_confirmed()));
    }

    #[test]
    fn test_short_ring_down_still_settles() {
        let mut det = detector();
        let states = run(&mut det, &[1.0, 0.1, 0.1, 0.1, 9.0, 6.0, 4.0, 0.2, 0.2, 0.2, 0.2], 0);
        assert!(states.last().unwrap().is_confirmed());
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.push(v);
        }
        approx::assert_relative_eq!(stats.mean(), 5.0);
        approx::assert_relative_eq!(stats.variance(), 4.0);
    }

    proptest! {
        /// Without a near-zero-g phase nothing can be confirmed, however
        /// violent the trace.
        #[test]
        fn never_confirms_without_free_fall(
            mags in proptest::collection::vec(0.5f64..12.0, 1..200),
        ) {
            let mut det = FallDetector::new(FallConfig::default());
            for (i, m) in mags.iter().enumerate() {
                let state = det.process(&sample(*m, i as u64 * 10));
                prop_assert!(!state.is_confirmed());
            }
        }

        /// Free fall and impact followed by a settling window that contains
        /// a large movement never confirms.
        #[test]
        fn never_confirms_without_stillness(
            calm in proptest::collection::vec(0.9f64..1.1, 25),
            spike_at in 1usize..20,
            spike in 3.5f64..8.0,
        ) {
            let mut det = FallDetector::new(FallConfig::default());
            let mut mags = vec![1.0, 0.1, 0.1, 0.1, 6.0];
            let mut settling = calm;
            settling[spike_at] = spike;
            mags.extend(settling);

            for (i, m) in mags.iter().enumerate() {
                let state = det.process(&sample(*m, i as u64 * STEP_MS));
                prop_assert!(!state.is_confirmed());
            }
        }
    }
}
