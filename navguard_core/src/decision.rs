//! Decision core: the fusion state machine and the alert dispatcher under a
//! single owner.
//!
//! All `AlertSession` mutations go through here, one input at a time, which
//! is what serializes the emergency workflow. Session closure resolves the
//! fusion latch in the same step so no tick can observe a closed session
//! with `Emergency` still latched.

use crate::config::Config;
use crate::dispatcher::{AlertDispatcher, Effect};
use crate::fusion::{FusionSnapshot, FusionStateMachine, Transition};
use crate::telemetry::StatusLine;
use crate::types::SystemState;
use navguard_env::Delivery;
use std::time::Duration;
use uuid::Uuid;

pub struct DecisionCore {
    fusion: FusionStateMachine,
    dispatcher: AlertDispatcher,
    last: Option<Transition>,
}

impl DecisionCore {
    pub fn new(config: &Config) -> Self {
        Self {
            fusion: FusionStateMachine::new(config.staleness_timeout()),
            dispatcher: AlertDispatcher::new(config.alert.clone(), config.notification.clone()),
            last: None,
        }
    }

    pub fn state(&self) -> SystemState {
        self.fusion.current()
    }

    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }

    pub fn last_transition(&self) -> Option<&Transition> {
        self.last.as_ref()
    }

    /// Runs one fusion tick and the dispatcher's reaction to it.
    pub fn tick(&mut self, snapshot: &FusionSnapshot, now: Duration) -> (Transition, Vec<Effect>) {
        let transition = self.fusion.tick(snapshot, now);
        let effects = self.dispatcher.on_transition(&transition);
        self.last = Some(transition);
        (transition, self.settle(effects))
    }

    pub fn cancel(&mut self, at: Duration) -> Vec<Effect> {
        let effects = self.dispatcher.cancel(at);
        self.settle(effects)
    }

    pub fn poll(&mut self, now: Duration) -> Vec<Effect> {
        let effects = self.dispatcher.poll(now);
        self.settle(effects)
    }

    pub fn on_send_result(
        &mut self,
        session: Uuid,
        attempt: u32,
        outcome: Delivery,
        now: Duration,
    ) -> Vec<Effect> {
        let effects = self.dispatcher.on_send_result(session, attempt, outcome, now);
        self.settle(effects)
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.dispatcher.next_deadline()
    }

    /// Status line for the most recent tick.
    pub fn status(&self) -> Option<StatusLine> {
        self.last
            .as_ref()
            .map(|t| StatusLine::new(t, self.dispatcher.status_token()))
    }

    fn settle(&mut self, effects: Vec<Effect>) -> Vec<Effect> {
        if effects.iter().any(|e| matches!(e, Effect::SessionClosed { .. })) {
            self.fusion.resolve_emergency();
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::SessionOutcome;
    use crate::types::{FallReport, FallState};

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn confirmed_fall(at: Duration) -> FusionSnapshot {
        FusionSnapshot {
            fall: Some(FallReport { state: FallState::Confirmed { at }, timestamp: at }),
            ..Default::default()
        }
    }

    #[test]
    fn test_cancel_window_scenario() {
        let mut core = DecisionCore::new(&Config::default());
        let snapshot = confirmed_fall(Duration::ZERO);

        let (transition, _) = core.tick(&snapshot, Duration::ZERO);
        assert!(transition.entered(SystemState::Emergency));

        let effects = core.cancel(secs(4.9));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::SessionClosed { outcome: SessionOutcome::Canceled, .. }
        )));
        assert!(core.poll(secs(5.0)).is_empty());

        // Latch resolved: the same confirmation no longer holds Emergency
        let (transition, _) = core.tick(&snapshot, secs(5.1));
        assert_eq!(transition.current, SystemState::Walking);
    }

    #[test]
    fn test_delivery_releases_latch() {
        let mut core = DecisionCore::new(&Config::default());
        core.tick(&confirmed_fall(Duration::ZERO), Duration::ZERO);

        let effects = core.poll(secs(5.0));
        let (session, attempt) = effects
            .iter()
            .find_map(|e| match e {
                Effect::SendNotification { session, attempt, .. } => Some((*session, *attempt)),
                _ => None,
            })
            .unwrap();

        // Still latched while the send is in flight
        assert_eq!(core.tick(&FusionSnapshot::default(), secs(5.1)).0.current, SystemState::Emergency);

        core.on_send_result(session, attempt, Delivery::Delivered, secs(5.2));
        assert_eq!(core.tick(&FusionSnapshot::default(), secs(5.3)).0.current, SystemState::Walking);
        assert_eq!(core.status().unwrap().alert, "siren");
    }
}
