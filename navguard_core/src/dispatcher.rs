//! The "ALERT" Dispatcher - Actuation and the Emergency Workflow
//!
//! Navigation states map to continuous vibration patterns. `Emergency` is
//! edge-triggered and opens an [`AlertSession`]:
//!
//! ```text
//!   open ──(cancel < deadline)──────────────────────────► Canceled (siren off)
//!     │
//!     └─(deadline)──► attempt 1 ──ok──────────────────────► Sent
//!                        │ fail
//!                        ▼
//!                    backoff ──► attempt n ──ok───────────► Sent
//!                                   │ fail, n == max
//!                                   ▼
//!                               Exhausted (siren only)
//! ```
//!
//! The dispatcher never performs I/O. Every input carries its timestamp and
//! every output is an [`Effect`] for the runtime to execute, so the same
//! state machine runs under the virtual clock and on the device.

use crate::config::{AlertConfig, NotificationConfig};
use crate::fusion::Transition;
use crate::types::SystemState;
use navguard_env::{ActuatorCommand, Delivery, Device, Pattern};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How an alert session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Wearer canceled inside the window; nothing was sent
    Canceled,
    /// The notification was delivered
    Sent,
    /// Every attempt failed; the siren is the only alert left
    Exhausted,
}

/// Where an open session is in its workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting out the cancel window
    CancelWindow,
    /// Attempt `attempt` handed to the gateway, result pending
    Sending { attempt: u32 },
    /// Attempt `attempt` scheduled for `at`
    Backoff { attempt: u32, at: Duration },
}

/// The one open emergency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertSession {
    pub id: Uuid,
    pub confirmed_at: Duration,
    pub cancel_deadline: Duration,
    pub cancel_requested: bool,
    /// Set once the first notification attempt has been dispatched
    pub notify_sent: bool,
    pub phase: SessionPhase,
}

/// Reportable alert events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlertReport {
    Delivered { session: Uuid, attempt: u32 },
    AttemptFailed { session: Uuid, attempt: u32, reason: String, retry_in_ms: u64 },
    Exhausted { session: Uuid, attempts: u32, reason: String },
    /// Cancel arrived after the notification had gone out
    LateCancel { session: Uuid },
    Acknowledged,
    SirenTimedOut,
}

impl std::fmt::Display for AlertReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertReport::Delivered { session, attempt } => {
                write!(f, "notification delivered (session {}, attempt {})", session, attempt)
            }
            AlertReport::AttemptFailed { session, attempt, reason, retry_in_ms } => write!(
                f,
                "notification attempt {} failed (session {}): {}; retry in {} ms",
                attempt, session, reason, retry_in_ms
            ),
            AlertReport::Exhausted { session, attempts, reason } => write!(
                f,
                "notification failed after {} attempts (session {}): {}; siren only",
                attempts, session, reason
            ),
            AlertReport::LateCancel { session } => {
                write!(f, "cancel after notification dispatch (session {})", session)
            }
            AlertReport::Acknowledged => write!(f, "siren acknowledged"),
            AlertReport::SirenTimedOut => write!(f, "siren timed out"),
        }
    }
}

/// Work the runtime must carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Actuate(ActuatorCommand),
    SendNotification {
        session: Uuid,
        attempt: u32,
        contact: String,
        message: String,
    },
    SessionClosed {
        session: Uuid,
        outcome: SessionOutcome,
    },
    Report(AlertReport),
}

/// Alert dispatcher state machine.
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    config: AlertConfig,
    notification: NotificationConfig,
    session: Option<AlertSession>,
    /// Siren start time while the buzzer is sounding
    siren_since: Option<Duration>,
    vibration: Pattern,
    last_outcome: Option<SessionOutcome>,
}

impl AlertDispatcher {
    pub fn new(config: AlertConfig, notification: NotificationConfig) -> Self {
        Self {
            config,
            notification,
            session: None,
            siren_since: None,
            vibration: Pattern::Off,
            last_outcome: None,
        }
    }

    pub fn session(&self) -> Option<&AlertSession> {
        self.session.as_ref()
    }

    pub fn siren_active(&self) -> bool {
        self.siren_since.is_some()
    }

    pub fn vibration(&self) -> Pattern {
        self.vibration
    }

    pub fn last_outcome(&self) -> Option<SessionOutcome> {
        self.last_outcome
    }

    /// Short token for status lines.
    pub fn status_token(&self) -> &'static str {
        match self.session.as_ref().map(|s| s.phase) {
            Some(SessionPhase::CancelWindow) => "window",
            Some(SessionPhase::Sending { .. }) => "sending",
            Some(SessionPhase::Backoff { .. }) => "backoff",
            None if self.siren_since.is_some() => "siren",
            None => "idle",
        }
    }

    /// Earliest time at which `poll` has work to do.
    pub fn next_deadline(&self) -> Option<Duration> {
        match self.session.as_ref().map(|s| (s.phase, s.cancel_deadline)) {
            Some((SessionPhase::CancelWindow, deadline)) => Some(deadline),
            Some((SessionPhase::Backoff { at, .. }, _)) => Some(at),
            Some((SessionPhase::Sending { .. }, _)) => None,
            None => self.siren_since.map(|since| since + self.config.siren_timeout()),
        }
    }

    /// Reacts to the state produced by a fusion tick.
    pub fn on_transition(&mut self, transition: &Transition) -> Vec<Effect> {
        let mut effects = Vec::new();

        if transition.entered(SystemState::Emergency) {
            self.open_session(transition.at, &mut effects);
        }

        let pattern = match transition.current {
            SystemState::Obstacle => Pattern::ObstaclePulse,
            SystemState::Crossing => Pattern::CrossingCadence,
            SystemState::Walking | SystemState::Emergency => Pattern::Off,
        };
        if pattern != self.vibration {
            self.vibration = pattern;
            let command = match pattern {
                Pattern::Off => ActuatorCommand::off(Device::Vibration),
                p => ActuatorCommand::play(Device::Vibration, p, self.config.vibration_intensity),
            };
            effects.push(Effect::Actuate(command));
        }

        effects
    }

    /// Wearer cancel signal, stamped when it was raised.
    pub fn cancel(&mut self, at: Duration) -> Vec<Effect> {
        let mut effects = Vec::new();

        let Some(session) = self.session.as_mut() else {
            if self.siren_since.take().is_some() {
                info!("Siren acknowledged at {:?}", at);
                effects.push(Effect::Actuate(ActuatorCommand::off(Device::Buzzer)));
                effects.push(Effect::Report(AlertReport::Acknowledged));
            } else {
                debug!("Cancel at {:?} with nothing to cancel", at);
            }
            return effects;
        };

        if session.phase == SessionPhase::CancelWindow && at < session.cancel_deadline {
            session.cancel_requested = true;
            info!(
                "Emergency canceled by wearer at {:?} ({:?} before deadline)",
                at,
                session.cancel_deadline - at
            );
            self.silence(&mut effects);
            self.close(SessionOutcome::Canceled, &mut effects);
        } else {
            // The message is already out or in flight; treat as acknowledgment
            warn!("Cancel at {:?} arrived after notification dispatch", at);
            let id = session.id;
            self.silence(&mut effects);
            effects.push(Effect::Report(AlertReport::LateCancel { session: id }));
        }

        effects
    }

    /// Fires any timer that has come due at `now`.
    pub fn poll(&mut self, now: Duration) -> Vec<Effect> {
        let mut effects = Vec::new();

        match self.session.as_ref().map(|s| s.phase) {
            Some(SessionPhase::CancelWindow) => {
                if let Some(session) = self.session.as_mut().filter(|s| now >= s.cancel_deadline) {
                    info!("Cancel window expired at {:?}; notifying {}", now, self.notification.contact);
                    session.notify_sent = true;
                    self.dispatch(1, &mut effects);
                }
            }
            Some(SessionPhase::Backoff { attempt, at }) if now >= at => {
                self.dispatch(attempt, &mut effects);
            }
            Some(_) => {}
            None => {
                if let Some(since) = self.siren_since {
                    if now >= since + self.config.siren_timeout() {
                        info!("Siren timed out after {:?}", now - since);
                        self.silence(&mut effects);
                        effects.push(Effect::Report(AlertReport::SirenTimedOut));
                    }
                }
            }
        }

        effects
    }

    /// Result of a notification attempt issued earlier.
    ///
    /// Results that do not match the open session and its in-flight attempt
    /// are ignored.
    pub fn on_send_result(
        &mut self,
        session_id: Uuid,
        attempt: u32,
        outcome: Delivery,
        now: Duration,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();

        let in_flight = self.session.as_ref().is_some_and(|s| {
            s.id == session_id && s.phase == SessionPhase::Sending { attempt }
        });
        if !in_flight {
            debug!("Ignoring result of attempt {} for session {}", attempt, session_id);
            return effects;
        }

        match outcome {
            Delivery::Delivered => {
                info!("Emergency notification delivered on attempt {}", attempt);
                effects.push(Effect::Report(AlertReport::Delivered { session: session_id, attempt }));
                self.close(SessionOutcome::Sent, &mut effects);
            }
            Delivery::Failed(reason) if attempt >= self.config.max_attempts => {
                error!(
                    "Emergency notification failed after {} attempts: {}; buzzer only",
                    attempt, reason
                );
                effects.push(Effect::Report(AlertReport::Exhausted {
                    session: session_id,
                    attempts: attempt,
                    reason,
                }));
                self.close(SessionOutcome::Exhausted, &mut effects);
            }
            Delivery::Failed(reason) => {
                let delay = self.config.backoff_after(attempt);
                warn!("Notification attempt {} failed: {}; retrying in {:?}", attempt, reason, delay);
                if let Some(session) = self.session.as_mut() {
                    session.phase = SessionPhase::Backoff {
                        attempt: attempt + 1,
                        at: now + delay,
                    };
                }
                effects.push(Effect::Report(AlertReport::AttemptFailed {
                    session: session_id,
                    attempt,
                    reason,
                    retry_in_ms: delay.as_millis() as u64,
                }));
            }
        }

        effects
    }

    fn open_session(&mut self, at: Duration, effects: &mut Vec<Effect>) {
        if let Some(open) = &self.session {
            warn!("Emergency edge while session {} is open; ignored", open.id);
            return;
        }

        let session = AlertSession {
            id: Uuid::new_v4(),
            confirmed_at: at,
            cancel_deadline: at + self.config.cancel_window(),
            cancel_requested: false,
            notify_sent: false,
            phase: SessionPhase::CancelWindow,
        };
        info!(
            "Alert session {} opened at {:?}; cancel deadline {:?}",
            session.id, at, session.cancel_deadline
        );
        self.session = Some(session);
        self.siren_since = Some(at);
        effects.push(Effect::Actuate(ActuatorCommand::play(Device::Buzzer, Pattern::Siren, 1.0)));
    }

    fn dispatch(&mut self, attempt: u32, effects: &mut Vec<Effect>) {
        if let Some(session) = self.session.as_mut() {
            session.phase = SessionPhase::Sending { attempt };
            effects.push(Effect::SendNotification {
                session: session.id,
                attempt,
                contact: self.notification.contact.clone(),
                message: self.notification.message.clone(),
            });
        }
    }

    fn silence(&mut self, effects: &mut Vec<Effect>) {
        if self.siren_since.take().is_some() {
            effects.push(Effect::Actuate(ActuatorCommand::off(Device::Buzzer)));
        }
    }

    fn close(&mut self, outcome: SessionOutcome, effects: &mut Vec<Effect>) {
        if let Some(session) = self.session.take() {
            info!("Alert session {} closed: {:?}", session.id, outcome);
            self.last_outcome = Some(outcome);
            effects.push(Effect::SessionClosed { session: session.id, outcome });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::FusionView;
    use proptest::prelude::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn dispatcher() -> AlertDispatcher {
        AlertDispatcher::new(AlertConfig::default(), NotificationConfig::default())
    }

    fn transition(previous: SystemState, current: SystemState, at: Duration) -> Transition {
        Transition { previous, current, tick: 1, at, view: FusionView::default() }
    }

    fn sends(effects: &[Effect]) -> Vec<(Uuid, u32)> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::SendNotification { session, attempt, .. } => Some((*session, *attempt)),
                _ => None,
            })
            .collect()
    }

    fn closed(effects: &[Effect]) -> Option<SessionOutcome> {
        effects.iter().find_map(|e| match e {
            Effect::SessionClosed { outcome, .. } => Some(*outcome),
            _ => None,
        })
    }

    fn buzzer_off(effects: &[Effect]) -> bool {
        effects.contains(&Effect::Actuate(ActuatorCommand::off(Device::Buzzer)))
    }

    fn open_emergency(d: &mut AlertDispatcher, at: Duration) -> Vec<Effect> {
        d.on_transition(&transition(SystemState::Walking, SystemState::Emergency, at))
    }

    #[test]
    fn test_emergency_starts_siren_and_window() {
        let mut d = dispatcher();
        let effects = open_emergency(&mut d, secs(0.0));

        assert!(effects.contains(&Effect::Actuate(ActuatorCommand::play(
            Device::Buzzer,
            Pattern::Siren,
            1.0
        ))));
        let session = d.session().unwrap();
        assert_eq!(session.cancel_deadline, secs(5.0));
        assert!(!session.notify_sent);
        assert_eq!(d.next_deadline(), Some(secs(5.0)));
        assert_eq!(d.status_token(), "window");
    }

    #[test]
    fn test_cancel_before_deadline_sends_nothing() {
        let mut d = dispatcher();
        open_emergency(&mut d, secs(0.0));

        assert!(d.poll(secs(4.0)).is_empty());
        let effects = d.cancel(secs(4.9));

        assert!(buzzer_off(&effects));
        assert_eq!(closed(&effects), Some(SessionOutcome::Canceled));
        assert!(d.session().is_none());
        assert!(!d.siren_active());

        // Deadline passes with nothing left to send
        assert!(sends(&d.poll(secs(5.0))).is_empty());
        assert_eq!(d.last_outcome(), Some(SessionOutcome::Canceled));
    }

    #[test]
    fn test_deadline_sends_exactly_once() {
        let mut d = dispatcher();
        open_emergency(&mut d, secs(0.0));

        let effects = d.poll(secs(5.0));
        let id = d.session().unwrap().id;
        assert_eq!(sends(&effects), vec![(id, 1)]);
        assert!(d.session().unwrap().notify_sent);

        // Repeated polls and a repeated Emergency edge add nothing
        assert!(d.poll(secs(5.1)).is_empty());
        assert!(sends(&open_emergency(&mut d, secs(5.2))).is_empty());

        let effects = d.on_send_result(id, 1, Delivery::Delivered, secs(5.3));
        assert_eq!(closed(&effects), Some(SessionOutcome::Sent));

        // Duplicate result for the closed session is ignored
        assert!(d.on_send_result(id, 1, Delivery::Delivered, secs(5.4)).is_empty());
    }

    #[test]
    fn test_cancel_at_deadline_is_too_late() {
        let mut d = dispatcher();
        open_emergency(&mut d, secs(0.0));

        let effects = d.cancel(secs(5.0));
        assert!(closed(&effects).is_none());
        assert!(matches!(
            effects.last(),
            Some(Effect::Report(AlertReport::LateCancel { .. }))
        ));
        assert_eq!(sends(&d.poll(secs(5.0))).len(), 1);
    }

    #[test]
    fn test_failures_back_off_then_exhaust() {
        let mut d = dispatcher();
        open_emergency(&mut d, secs(0.0));
        d.poll(secs(5.0));
        let id = d.session().unwrap().id;

        let failed = Delivery::Failed("no signal".into());
        d.on_send_result(id, 1, failed.clone(), secs(5.5));
        assert_eq!(d.next_deadline(), Some(secs(6.5)));
        assert!(d.poll(secs(6.4)).is_empty());
        assert_eq!(sends(&d.poll(secs(6.5))), vec![(id, 2)]);

        d.on_send_result(id, 2, failed.clone(), secs(7.0));
        assert_eq!(d.next_deadline(), Some(secs(9.0)));
        assert_eq!(sends(&d.poll(secs(9.0))), vec![(id, 3)]);

        let effects = d.on_send_result(id, 3, failed, secs(9.5));
        assert_eq!(closed(&effects), Some(SessionOutcome::Exhausted));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Report(AlertReport::Exhausted { attempts: 3, .. }))));

        // Buzzer is the remaining alert
        assert!(!buzzer_off(&effects));
        assert!(d.siren_active());
        assert_eq!(d.status_token(), "siren");
    }

    #[test]
    fn test_stale_attempt_result_is_ignored() {
        let mut d = dispatcher();
        open_emergency(&mut d, secs(0.0));
        d.poll(secs(5.0));
        let id = d.session().unwrap().id;

        assert!(d.on_send_result(Uuid::new_v4(), 1, Delivery::Delivered, secs(5.1)).is_empty());
        assert!(d.on_send_result(id, 2, Delivery::Delivered, secs(5.1)).is_empty());
        assert!(d.session().is_some());
    }

    #[test]
    fn test_siren_runs_until_acknowledged() {
        let mut d = dispatcher();
        open_emergency(&mut d, secs(0.0));
        d.poll(secs(5.0));
        let id = d.session().unwrap().id;
        d.on_send_result(id, 1, Delivery::Delivered, secs(5.5));

        assert!(d.siren_active());
        let effects = d.cancel(secs(30.0));
        assert!(buzzer_off(&effects));
        assert!(effects.contains(&Effect::Report(AlertReport::Acknowledged)));
        assert_eq!(d.next_deadline(), None);
    }

    #[test]
    fn test_siren_times_out() {
        let mut d = dispatcher();
        open_emergency(&mut d, secs(0.0));
        d.poll(secs(5.0));
        let id = d.session().unwrap().id;
        d.on_send_result(id, 1, Delivery::Delivered, secs(5.5));

        assert_eq!(d.next_deadline(), Some(secs(120.0)));
        assert!(d.poll(secs(119.0)).is_empty());
        let effects = d.poll(secs(120.0));
        assert!(buzzer_off(&effects));
        assert!(effects.contains(&Effect::Report(AlertReport::SirenTimedOut)));
    }

    #[test]
    fn test_navigation_patterns_follow_state() {
        let mut d = dispatcher();
        let t = secs(1.0);

        let effects = d.on_transition(&transition(SystemState::Walking, SystemState::Obstacle, t));
        assert_eq!(
            effects,
            vec![Effect::Actuate(ActuatorCommand::play(Device::Vibration, Pattern::ObstaclePulse, 0.8))]
        );

        // Steady state issues nothing
        assert!(d.on_transition(&transition(SystemState::Obstacle, SystemState::Obstacle, t)).is_empty());

        let effects = d.on_transition(&transition(SystemState::Obstacle, SystemState::Crossing, t));
        assert_eq!(d.vibration(), Pattern::CrossingCadence);
        assert_eq!(effects.len(), 1);

        let effects = d.on_transition(&transition(SystemState::Crossing, SystemState::Walking, t));
        assert_eq!(effects, vec![Effect::Actuate(ActuatorCommand::off(Device::Vibration))]);
    }

    #[test]
    fn test_emergency_stops_navigation_vibration() {
        let mut d = dispatcher();
        d.on_transition(&transition(SystemState::Walking, SystemState::Obstacle, secs(0.5)));
        let effects = open_emergency(&mut d, secs(1.0));
        assert!(effects.contains(&Effect::Actuate(ActuatorCommand::off(Device::Vibration))));
    }

    proptest! {
        /// A cancel strictly before the deadline never lets a notification out,
        /// whatever the window length and however often the timer is polled.
        #[test]
        fn cancel_before_deadline_never_notifies(
            window_ms in 1u64..20_000,
            cancel_frac in 0.0f64..1.0,
            polls in proptest::collection::vec(0.0f64..1.0, 0..10),
        ) {
            let config = AlertConfig { cancel_window_ms: window_ms, ..AlertConfig::default() };
            let mut d = AlertDispatcher::new(config, NotificationConfig::default());
            let opened = secs(3.0);
            open_emergency(&mut d, opened);

            let cancel_at = opened + Duration::from_millis((window_ms as f64 * cancel_frac) as u64);
            let mut sent = Vec::new();
            let mut polls = polls;
            polls.sort_by(|a, b| a.total_cmp(b));
            for p in polls {
                let t = opened + Duration::from_millis((window_ms as f64 * p) as u64);
                if t >= cancel_at {
                    break;
                }
                sent.extend(sends(&d.poll(t)));
            }
            let effects = d.cancel(cancel_at);
            prop_assert_eq!(closed(&effects), Some(SessionOutcome::Canceled));
            sent.extend(sends(&d.poll(opened + Duration::from_millis(window_ms * 2))));

            prop_assert!(sent.is_empty());
        }
    }
}
