//! The "PERCEPTION" Adapter - Debounced Vision Events
//!
//! Turns the per-frame output of one classifier into a stable label:
//! 1. Label Mapping (class index → canonical `Label`, unknown classes dropped)
//! 2. Gating (confidence floor, vehicle size/confidence gate)
//! 3. Frame Selection (best surviving candidate, or an empty frame)
//! 4. Temporal Debounce (K of the last N frames, with tie-breaking)
//!
//! Empty frames stay in the window, so a label that stops being seen decays to
//! the `NoDetection` sentinel instead of being reused forever. A gap between
//! frames longer than the staleness timeout restarts the window, so frames
//! from before a camera outage never vote on what comes after it.

use crate::config::{DebounceConfig, VehicleGate, VisionConfig};
use crate::types::{DetectionEvent, Label, ModelOutput, RawDetection, VisionSource};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One frame in the debounce window.
#[derive(Debug, Clone, Copy)]
struct FrameEntry {
    /// Selected label, or `None` for an empty frame
    label: Option<Label>,
    confidence: f32,
    /// Monotonic frame number, used as the recency tie-breaker
    seq: u64,
}

/// Per-label tally over the window.
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    count: usize,
    confidence_sum: f32,
    last_seq: u64,
}

impl Tally {
    fn mean_confidence(&self) -> f32 {
        if self.count > 0 {
            self.confidence_sum / self.count as f32
        } else {
            0.0
        }
    }
}

/// Debouncing adapter for a single vision source.
#[derive(Debug, Clone)]
pub struct PerceptionAdapter {
    source: VisionSource,
    floor: f32,
    debounce: DebounceConfig,
    vehicle_gate: VehicleGate,
    /// Canonical label for each class index of the model
    label_table: Vec<Option<Label>>,
    window: VecDeque<FrameEntry>,
    frames_seen: u64,
    /// Longest tolerated gap between frames before the window restarts
    staleness: Duration,
    last_frame: Option<Duration>,
}

impl PerceptionAdapter {
    /// Creates the adapter for `source` from the vision configuration.
    /// `staleness` is the engine-wide staleness timeout.
    pub fn new(source: VisionSource, config: &VisionConfig, staleness: Duration) -> Self {
        let debounce = config.source(source).clone();
        let label_table = debounce
            .labels
            .iter()
            .map(|raw| Label::canonicalize(source, raw))
            .collect();

        Self {
            source,
            floor: config.floor_for(source),
            vehicle_gate: config.vehicle_gate.clone(),
            window: VecDeque::with_capacity(debounce.window),
            debounce,
            label_table,
            frames_seen: 0,
            staleness,
            last_frame: None,
        }
    }

    /// The source this adapter normalizes.
    pub fn source(&self) -> VisionSource {
        self.source
    }

    /// Ingests one frame of classifier output.
    ///
    /// Returns `None` while the window is still warming up (fewer than K
    /// frames). Afterwards every frame yields an event: the debounced label,
    /// or the `NoDetection` sentinel when no label is stable.
    pub fn ingest(&mut self, output: &ModelOutput) -> Option<DetectionEvent> {
        if output.source != self.source {
            warn!(
                "{} adapter received output for {}; frame dropped",
                self.source, output.source
            );
            return None;
        }

        if let Some(last) = self.last_frame {
            let gap = output.timestamp.saturating_sub(last);
            if gap > self.staleness && !self.window.is_empty() {
                info!(
                    "{}: no frame for {}ms; discarding pre-outage window",
                    self.source,
                    gap.as_millis()
                );
                self.reset();
            }
        }
        self.last_frame = Some(output.timestamp);

        let candidate = self.select_candidate(&output.detections);
        self.push_frame(candidate);

        if self.window.len() < self.debounce.min_count {
            return None;
        }

        let event = match self.stable_label() {
            Some((label, confidence)) => DetectionEvent {
                source: self.source,
                label,
                confidence,
                timestamp: output.timestamp,
            },
            None => DetectionEvent::no_detection(self.source, output.timestamp),
        };
        Some(event)
    }

    /// Clears the debounce window (local error recovery).
    pub fn reset(&mut self) {
        debug!("{} adapter window reset", self.source);
        self.window.clear();
    }

    /// Picks the highest-confidence detection that survives all gates.
    fn select_candidate(&self, detections: &[RawDetection]) -> Option<(Label, f32)> {
        let mut best: Option<(Label, f32)> = None;

        for det in detections {
            if !det.confidence.is_finite() || !(0.0..=1.0).contains(&det.confidence) {
                debug!("{}: discarding out-of-range confidence {}", self.source, det.confidence);
                continue;
            }
            let label = match self.label_table.get(det.class_index).copied().flatten() {
                Some(label) => label,
                None => continue,
            };
            if det.confidence < self.floor {
                continue;
            }
            if label == Label::Vehicle && !self.passes_vehicle_gate(det) {
                continue;
            }
            if best.map_or(true, |(_, conf)| det.confidence > conf) {
                best = Some((label, det.confidence));
            }
        }

        best
    }

    fn passes_vehicle_gate(&self, det: &RawDetection) -> bool {
        let gate = &self.vehicle_gate;
        if det.confidence < gate.min_confidence {
            return false;
        }
        match det.bbox {
            Some(bbox) => {
                bbox.w >= gate.min_width && bbox.h >= gate.min_height && bbox.area() >= gate.min_area
            }
            // No geometry, no way to rule out a tiny distant box
            None => false,
        }
    }

    fn push_frame(&mut self, candidate: Option<(Label, f32)>) {
        self.frames_seen += 1;
        let (label, confidence) = match candidate {
            Some((label, conf)) => (Some(label), conf),
            None => (None, 0.0),
        };
        if self.window.len() == self.debounce.window {
            self.window.pop_front();
        }
        self.window.push_back(FrameEntry {
            label,
            confidence,
            seq: self.frames_seen,
        });
    }

    /// Returns the debounced label and its mean confidence, if any.
    fn stable_label(&self) -> Option<(Label, f32)> {
        let mut tallies: HashMap<Label, Tally> = HashMap::new();
        let mut non_empty = 0usize;

        for entry in &self.window {
            if let Some(label) = entry.label {
                non_empty += 1;
                let tally = tallies.entry(label).or_default();
                tally.count += 1;
                tally.confidence_sum += entry.confidence;
                tally.last_seq = tally.last_seq.max(entry.seq);
            }
        }

        let min_share = self.debounce.min_fraction * non_empty as f32;
        let vehicle_min = self.vehicle_gate.min_history_count.max(self.debounce.min_count);
        tallies
            .into_iter()
            .filter(|(label, t)| {
                let min_count = if *label == Label::Vehicle {
                    vehicle_min
                } else {
                    self.debounce.min_count
                };
                t.count >= min_count && t.count as f32 >= min_share
            })
            .max_by(|(_, a), (_, b)| {
                a.count
                    .cmp(&b.count)
                    .then_with(|| {
                        a.mean_confidence()
                            .partial_cmp(&b.mean_confidence())
                            .unwrap_or(Ordering::Equal)
                    })
                    .then_with(|| a.last_seq.cmp(&b.last_seq))
            })
            .map(|(label, t)| (label, t.mean_confidence()))
    }
}

/// The three adapters, one per vision source.
#[derive(Debug, Clone)]
pub struct PerceptionBank {
    traffic_light: PerceptionAdapter,
    pedestrian_signal: PerceptionAdapter,
    surroundings: PerceptionAdapter,
}

impl PerceptionBank {
    pub fn new(config: &VisionConfig, staleness: Duration) -> Self {
        Self {
            traffic_light: PerceptionAdapter::new(VisionSource::TrafficLight, config, staleness),
            pedestrian_signal: PerceptionAdapter::new(VisionSource::PedestrianSignal, config, staleness),
            surroundings: PerceptionAdapter::new(VisionSource::Surroundings, config, staleness),
        }
    }

    /// Routes a frame to the adapter of its source.
    pub fn ingest(&mut self, output: &ModelOutput) -> Option<DetectionEvent> {
        self.adapter_mut(output.source).ingest(output)
    }

    pub fn adapter_mut(&mut self, source: VisionSource) -> &mut PerceptionAdapter {
        match source {
            VisionSource::TrafficLight => &mut self.traffic_light,
            VisionSource::PedestrianSignal => &mut self.pedestrian_signal,
            VisionSource::Surroundings => &mut self.surroundings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use approx::assert_relative_eq;
    use std::time::Duration;

    // Default traffic table: 0 = Green, 1 = Red, 2 = Yellow
    const GREEN: usize = 0;
    const RED: usize = 1;

    fn frame(source: VisionSource, dets: &[(usize, f32)], t_ms: u64) -> ModelOutput {
        ModelOutput {
            source,
            detections: dets
                .iter()
                .map(|&(class_index, confidence)| RawDetection {
                    class_index,
                    confidence,
                    bbox: None,
                })
                .collect(),
            timestamp: Duration::from_millis(t_ms),
        }
    }

    const STALENESS: Duration = Duration::from_millis(1500);

    fn traffic_adapter() -> PerceptionAdapter {
        PerceptionAdapter::new(VisionSource::TrafficLight, &VisionConfig::default(), STALENESS)
    }

    #[test]
    fn test_warm_up_yields_nothing() {
        let mut adapter = traffic_adapter();
        let src = VisionSource::TrafficLight;
        assert!(adapter.ingest(&frame(src, &[(GREEN, 0.9)], 0)).is_none());
        assert!(adapter.ingest(&frame(src, &[(GREEN, 0.9)], 300)).is_none());
        let event = adapter.ingest(&frame(src, &[(GREEN, 0.9)], 600)).unwrap();
        assert_eq!(event.label, Label::Green);
        assert_eq!(event.timestamp, Duration::from_millis(600));
    }

    #[test]
    fn test_single_frame_flicker_is_suppressed() {
        let mut adapter = traffic_adapter();
        let src = VisionSource::TrafficLight;
        let mut last = None;
        for (i, dets) in [vec![], vec![(RED, 0.9)], vec![], vec![], vec![]].iter().enumerate() {
            last = adapter.ingest(&frame(src, dets, i as u64 * 300));
        }
        assert_eq!(last.unwrap().label, Label::NoDetection);
    }

    #[test]
    fn test_k_of_n_accepts_label() {
        let mut adapter = traffic_adapter();
        let src = VisionSource::TrafficLight;
        let frames = [vec![(GREEN, 0.8)], vec![], vec![(GREEN, 0.9)], vec![], vec![(GREEN, 0.7)]];
        let mut last = None;
        for (i, dets) in frames.iter().enumerate() {
            last = adapter.ingest(&frame(src, dets, i as u64 * 300));
        }
        let event = last.unwrap();
        assert_eq!(event.label, Label::Green);
        assert_relative_eq!(event.confidence, 0.8, epsilon = 1e-5);
    }

    #[test]
    fn test_below_floor_emits_sentinel() {
        let mut adapter = traffic_adapter();
        let src = VisionSource::TrafficLight;
        let mut last = None;
        for i in 0..4 {
            last = adapter.ingest(&frame(src, &[(GREEN, 0.3)], i * 300));
        }
        let event = last.unwrap();
        assert_eq!(event.label, Label::NoDetection);
        assert_eq!(event.confidence, 0.0);
    }

    #[test]
    fn test_tie_broken_by_confidence() {
        let mut adapter = traffic_adapter();
        let src = VisionSource::TrafficLight;
        let frames = [(GREEN, 0.9), (RED, 0.6), (GREEN, 0.9), (RED, 0.6), (GREEN, 0.9), (RED, 0.6)];
        let mut last = None;
        for (i, det) in frames.iter().enumerate() {
            last = adapter.ingest(&frame(src, &[*det], i as u64 * 300));
        }
        assert_eq!(last.unwrap().label, Label::Green);
    }

    #[test]
    fn test_tie_broken_by_recency() {
        let mut adapter = traffic_adapter();
        let src = VisionSource::TrafficLight;
        let frames = [(GREEN, 0.7), (RED, 0.7), (GREEN, 0.7), (RED, 0.7), (GREEN, 0.7), (RED, 0.7)];
        let mut last = None;
        for (i, det) in frames.iter().enumerate() {
            last = adapter.ingest(&frame(src, &[*det], i as u64 * 300));
        }
        assert_eq!(last.unwrap().label, Label::Red);
    }

    #[test]
    fn test_best_detection_in_frame_wins() {
        let mut adapter = traffic_adapter();
        let src = VisionSource::TrafficLight;
        let mut last = None;
        for i in 0..3 {
            last = adapter.ingest(&frame(src, &[(RED, 0.55), (GREEN, 0.95)], i * 300));
        }
        assert_eq!(last.unwrap().label, Label::Green);
    }

    #[test]
    fn test_unknown_class_index_is_ignored() {
        let mut adapter = traffic_adapter();
        let src = VisionSource::TrafficLight;
        let mut last = None;
        for i in 0..3 {
            last = adapter.ingest(&frame(src, &[(17, 0.99)], i * 300));
        }
        assert_eq!(last.unwrap().label, Label::NoDetection);
    }

    #[test]
    fn test_vehicle_gate() {
        let config = VisionConfig::default();
        let src = VisionSource::Surroundings;
        let vehicle = |confidence: f32, w: u32, h: u32| RawDetection {
            class_index: 0,
            confidence,
            bbox: Some(BoundingBox { x: 0, y: 0, w, h }),
        };
        let adapter = PerceptionAdapter::new(src, &config, STALENESS);

        assert!(adapter.select_candidate(&[vehicle(0.97, 120, 90)]).is_some());
        // Confident but tiny
        assert!(adapter.select_candidate(&[vehicle(0.97, 40, 30)]).is_none());
        // Big but only ordinarily confident
        assert!(adapter.select_candidate(&[vehicle(0.90, 120, 90)]).is_none());
    }

    #[test]
    fn test_surroundings_static_classes_are_dropped() {
        let adapter = PerceptionAdapter::new(VisionSource::Surroundings, &VisionConfig::default(), STALENESS);
        // 4 = stairs, 3 = person
        let stairs = RawDetection { class_index: 4, confidence: 0.99, bbox: None };
        let person = RawDetection { class_index: 3, confidence: 0.6, bbox: None };
        assert_eq!(adapter.select_candidate(&[stairs.clone()]), None);
        assert_eq!(adapter.select_candidate(&[stairs, person]), Some((Label::Person, 0.6)));
    }

    #[test]
    fn test_reset_restarts_warm_up() {
        let mut adapter = traffic_adapter();
        let src = VisionSource::TrafficLight;
        for i in 0..4 {
            adapter.ingest(&frame(src, &[(GREEN, 0.9)], i * 300));
        }
        adapter.reset();
        assert!(adapter.ingest(&frame(src, &[(GREEN, 0.9)], 2000)).is_none());
    }

    #[test]
    fn test_bank_routes_by_source() {
        let mut bank = PerceptionBank::new(&VisionConfig::default(), STALENESS);
        // Default walk-sign table: 2 = Walk
        let mut last = None;
        for i in 0..3 {
            last = bank.ingest(&frame(VisionSource::PedestrianSignal, &[(2, 0.8)], i * 300));
        }
        let event = last.unwrap();
        assert_eq!(event.source, VisionSource::PedestrianSignal);
        assert_eq!(event.label, Label::Walk);
    }

    #[test]
    fn test_gap_longer_than_staleness_discards_old_frames() {
        let mut bank = PerceptionBank::new(&VisionConfig::default(), STALENESS);
        let src = VisionSource::PedestrianSignal;
        // Walk-sign table: 1 = No_Walk, 2 = Walk
        for i in 0..6 {
            bank.ingest(&frame(src, &[(2, 0.9)], i * 300));
        }

        // Camera silent for a minute, then the sign reads No Walk
        let after: Vec<Option<DetectionEvent>> = [60_000, 60_300, 60_600]
            .iter()
            .map(|&t| bank.ingest(&frame(src, &[(1, 0.9)], t)))
            .collect();

        assert!(after.iter().flatten().all(|e| e.label != Label::Walk));
        assert!(after[0].is_none());
        assert!(after[1].is_none());
        assert_eq!(after[2].as_ref().unwrap().label, Label::NoWalk);
    }

    #[test]
    fn test_gap_within_staleness_keeps_window() {
        let mut adapter = traffic_adapter();
        let src = VisionSource::TrafficLight;
        for i in 0..3 {
            adapter.ingest(&frame(src, &[(GREEN, 0.9)], i * 300));
        }
        // 1.4 s dropout is tolerated
        let event = adapter.ingest(&frame(src, &[], 2000)).unwrap();
        assert_eq!(event.label, Label::Green);
    }

    #[test]
    fn test_vehicle_needs_longer_history() {
        let src = VisionSource::Surroundings;
        let vehicle = RawDetection {
            class_index: 0,
            confidence: 0.97,
            bbox: Some(BoundingBox { x: 0, y: 0, w: 120, h: 90 }),
        };
        let run = |seen_in: &[u64]| {
            let mut adapter = PerceptionAdapter::new(src, &VisionConfig::default(), STALENESS);
            let mut last = None;
            for i in 0..6u64 {
                let detections = if seen_in.contains(&i) { vec![vehicle.clone()] } else { vec![] };
                last = adapter.ingest(&ModelOutput {
                    source: src,
                    detections,
                    timestamp: Duration::from_millis(i * 300),
                });
            }
            last.unwrap().label
        };

        // Three of six satisfies K but not the vehicle history requirement
        assert_eq!(run(&[0, 2, 4]), Label::NoDetection);
        assert_eq!(run(&[0, 2, 3, 5]), Label::Vehicle);
    }
}
