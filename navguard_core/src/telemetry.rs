//! Per-tick status line.
//!
//! ```text
//! t=12.300 tick=82 state=CROSSING prev=WALKING traffic=green ped=walk surr=none prox=clear:182.0 fall=normal alert=idle
//! ```

use crate::fusion::Transition;
use crate::types::{Label, ProximityLevel, SystemState};
use serde::Serialize;
use std::fmt;

/// One observable state record, emitted every tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusLine {
    /// Seconds since start
    pub t: f64,
    pub tick: u64,
    pub state: SystemState,
    pub prev: SystemState,
    pub traffic: Label,
    pub ped: Label,
    pub surr: Label,
    /// `None` when the range reading is unknown
    pub prox: Option<ProximityLevel>,
    pub distance_cm: Option<f32>,
    pub fall: &'static str,
    pub alert: &'static str,
}

impl StatusLine {
    pub fn new(transition: &Transition, alert: &'static str) -> Self {
        let view = &transition.view;
        Self {
            t: transition.at.as_secs_f64(),
            tick: transition.tick,
            state: transition.current,
            prev: transition.previous,
            traffic: view.traffic,
            ped: view.pedestrian,
            surr: view.surroundings,
            prox: view.proximity.map(|p| p.level),
            distance_cm: view.proximity.map(|p| p.distance_cm),
            fall: view.fall.token(),
            alert,
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={:.3} tick={} state={} prev={} traffic={} ped={} surr={} ",
            self.t, self.tick, self.state, self.prev, self.traffic, self.ped, self.surr
        )?;
        match (self.prox, self.distance_cm) {
            (Some(ProximityLevel::Near), Some(d)) => write!(f, "prox=near:{:.1}", d)?,
            (Some(ProximityLevel::Clear), Some(d)) => write!(f, "prox=clear:{:.1}", d)?,
            _ => write!(f, "prox=unknown")?,
        }
        write!(f, " fall={} alert={}", self.fall, self.alert)
    }
}
