//! The "RANGE" Adapter - Ultrasonic Proximity with Hysteresis
//!
//! Raw echo distances are noisy: a single stray pulse can read a few
//! centimetres, and the echo times out entirely on soft or angled surfaces.
//! The adapter applies:
//! 1. Validation (finite, non-negative, within rated range)
//! 2. Median filter over the last `m` good samples
//! 3. Two-threshold hysteresis (`near < clear`)
//!
//! An echo timeout is a distinct signal: it neither changes the level nor
//! refreshes the timestamp, so the reading ages out through the fusion
//! staleness rule. When good readings resume after a gap longer than the
//! staleness timeout, the median window and hysteresis level start over.

use crate::config::RangeConfig;
use crate::types::{ProximityLevel, ProximityState};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Median-filtered, hysteretic proximity tracker.
#[derive(Debug, Clone)]
pub struct RangeAdapter {
    config: RangeConfig,
    window: VecDeque<f32>,
    state: ProximityState,
    consecutive_failures: u32,
    staleness: Duration,
    last_sample: Option<Duration>,
}

impl RangeAdapter {
    /// `staleness` is the engine-wide staleness timeout.
    pub fn new(config: RangeConfig, staleness: Duration) -> Self {
        Self {
            window: VecDeque::with_capacity(config.median_window),
            config,
            state: initial_state(),
            consecutive_failures: 0,
            staleness,
            last_sample: None,
        }
    }

    /// Current state, without consuming a sample.
    pub fn state(&self) -> ProximityState {
        self.state
    }

    /// Number of echo timeouts since the last good reading.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Feeds one distance reading taken at `at`.
    ///
    /// Returns the new state, or `None` if the reading was rejected as
    /// implausible (the previous state is then left untouched).
    pub fn sample(&mut self, distance_cm: f32, at: Duration) -> Option<ProximityState> {
        if !distance_cm.is_finite() || distance_cm < 0.0 || distance_cm > self.config.max_range_cm {
            warn!(
                "Rejecting implausible range reading {:.1} cm; restarting median window",
                distance_cm
            );
            self.window.clear();
            return None;
        }

        if let Some(last) = self.last_sample {
            let gap = at.saturating_sub(last);
            if gap > self.staleness {
                info!(
                    "No good range reading for {}ms; restarting median window",
                    gap.as_millis()
                );
                self.window.clear();
                self.state = initial_state();
            }
        }
        self.last_sample = Some(at);

        if self.consecutive_failures >= self.config.failure_warn_after {
            info!("Range sensor recovered after {} timeouts", self.consecutive_failures);
        }
        self.consecutive_failures = 0;

        if self.window.len() == self.config.median_window {
            self.window.pop_front();
        }
        self.window.push_back(distance_cm);

        let filtered = median(&self.window);
        let level = self.next_level(filtered);
        if level != self.state.level {
            debug!(
                "Proximity {:?} -> {:?} at {:.1} cm",
                self.state.level, level, filtered
            );
        }

        self.state = ProximityState {
            distance_cm: filtered,
            level,
            timestamp: at,
        };
        Some(self.state)
    }

    /// Records an echo timeout. Level and timestamp are left untouched.
    pub fn read_failed(&mut self, _at: Duration) -> ProximityState {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures == self.config.failure_warn_after {
            warn!(
                "Range sensor: {} consecutive echo timeouts",
                self.consecutive_failures
            );
        }
        self.state
    }

    fn next_level(&self, filtered: f32) -> ProximityLevel {
        match self.state.level {
            ProximityLevel::Clear if filtered < self.config.near_threshold_cm => ProximityLevel::Near,
            ProximityLevel::Near if filtered > self.config.clear_threshold_cm => ProximityLevel::Clear,
            level => level,
        }
    }
}

fn initial_state() -> ProximityState {
    ProximityState {
        distance_cm: f32::INFINITY,
        level: ProximityLevel::Clear,
        timestamp: Duration::ZERO,
    }
}

fn median(values: &VecDeque<f32>) -> f32 {
    let mut sorted: Vec<f32> = values.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
