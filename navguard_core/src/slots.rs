//! Single-slot latest-value holders between producers and the fusion tick.
//!
//! Each source gets one `watch` channel: publishing overwrites, there is no
//! queue, and the reader always sees the most recent value.

use crate::fusion::FusionSnapshot;
use crate::types::{DetectionEvent, FallReport, ProximityState, VisionSource};
use tokio::sync::watch;

/// Write half of a slot. Cloneable so a producer can be restarted.
#[derive(Debug, Clone)]
pub struct SlotWriter<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T> SlotWriter<T> {
    /// Overwrites the slot.
    pub fn publish(&self, value: T) {
        self.tx.send_replace(Some(value));
    }
}

/// Read half of a slot.
#[derive(Debug, Clone)]
pub struct SlotReader<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> SlotReader<T> {
    pub fn latest(&self) -> Option<T> {
        self.rx.borrow().clone()
    }
}

fn slot<T>() -> (SlotWriter<T>, SlotReader<T>) {
    let (tx, rx) = watch::channel(None);
    (SlotWriter { tx }, SlotReader { rx })
}

/// Producer side of every slot.
#[derive(Debug, Clone)]
pub struct SlotWriters {
    pub traffic_light: SlotWriter<DetectionEvent>,
    pub pedestrian_signal: SlotWriter<DetectionEvent>,
    pub surroundings: SlotWriter<DetectionEvent>,
    pub proximity: SlotWriter<ProximityState>,
    pub fall: SlotWriter<FallReport>,
}

impl SlotWriters {
    pub fn vision(&self, source: VisionSource) -> &SlotWriter<DetectionEvent> {
        match source {
            VisionSource::TrafficLight => &self.traffic_light,
            VisionSource::PedestrianSignal => &self.pedestrian_signal,
            VisionSource::Surroundings => &self.surroundings,
        }
    }
}

/// Consumer side of every slot, owned by the fusion tick.
#[derive(Debug, Clone)]
pub struct SlotBoard {
    traffic_light: SlotReader<DetectionEvent>,
    pedestrian_signal: SlotReader<DetectionEvent>,
    surroundings: SlotReader<DetectionEvent>,
    proximity: SlotReader<ProximityState>,
    fall: SlotReader<FallReport>,
}

impl SlotBoard {
    /// Creates the full set of slots.
    pub fn new() -> (SlotWriters, SlotBoard) {
        let (traffic_light_w, traffic_light) = slot();
        let (pedestrian_signal_w, pedestrian_signal) = slot();
        let (surroundings_w, surroundings) = slot();
        let (proximity_w, proximity) = slot();
        let (fall_w, fall) = slot();

        (
            SlotWriters {
                traffic_light: traffic_light_w,
                pedestrian_signal: pedestrian_signal_w,
                surroundings: surroundings_w,
                proximity: proximity_w,
                fall: fall_w,
            },
            SlotBoard {
                traffic_light,
                pedestrian_signal,
                surroundings,
                proximity,
                fall,
            },
        )
    }

    /// Reads every slot once.
    pub fn snapshot(&self) -> FusionSnapshot {
        FusionSnapshot {
            traffic_light: self.traffic_light.latest(),
            pedestrian_signal: self.pedestrian_signal.latest(),
            surroundings: self.surroundings.latest(),
            proximity: self.proximity.latest(),
            fall: self.fall.latest(),
        }
    }
}
