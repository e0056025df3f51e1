//! Connection state machine.
//!
//! Owns the authoritative [`ConnectionState`], the attempt counter, the generation counter and
//! the pairing manager. Every input returns the side effects to perform, in order; the
//! connection manager executes them before feeding the next input, which is what keeps
//! transitions serialized. Nothing here does I/O or reads the clock.
//!
//! Generations: every connect attempt and every teardown bumps the generation. Session events,
//! connect results and timers carry the generation they were created under and are dropped
//! when it is no longer current.

use crate::activity::ActivityLevel;
use crate::connection::collaborator::SessionEvent;
use crate::connection::pairing::{Offer, PairingChallenge, PairingManager, PairingView};
use crate::connection::policy::ReconnectPolicy;
use crate::connection::state::{ConnectionState, DisconnectCause};
use crate::credentials::Credentials;
use crate::error::GatewayError;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Inputs the machine cannot compute itself.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub now: DateTime<Utc>,
    /// Extra delay added to scheduled reconnects.
    pub jitter: Option<Duration>,
}

impl Context {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now, jitter: None }
    }
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a new session tagged with `generation`.
    Connect { generation: u64 },
    /// Drop the current session, ending it best-effort.
    EndSession,
    /// Ask the network to invalidate the current credentials.
    LogoutSession,
    ScheduleReconnect { generation: u64, delay: Duration },
    CancelReconnect,
    ArmPairingTimer {
        generation: u64,
        epoch: u64,
        token: String,
        after: Duration,
    },
    CancelPairingTimer,
    SaveCredentials(Credentials),
    WipeCredentials,
    Activity(ActivityLevel, String),
}

fn info(message: impl Into<String>) -> Effect {
    Effect::Activity(ActivityLevel::Info, message.into())
}

fn error(message: impl Into<String>) -> Effect {
    Effect::Activity(ActivityLevel::Error, message.into())
}

/// How to leave `Closing` once teardown effects have run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    Now,
    After(Duration),
}

/// Consistent copy of the machine's observable state.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub attempts: u32,
    pub generation: u64,
    pub last_disconnect: Option<DisconnectCause>,
    pub pairing: Option<PairingChallenge>,
}

impl ConnectionSnapshot {
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn pairing_view(&self, now: DateTime<Utc>) -> PairingView {
        PairingView::of(self.pairing.as_ref(), now)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempts: u32,
    generation: u64,
    last_disconnect: Option<DisconnectCause>,
    pairing: PairingManager,
    policy: ReconnectPolicy,
    action_delay: Duration,
    resume: Option<Resume>,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new(
            ReconnectPolicy::default(),
            PairingManager::default(),
            Duration::from_secs(3),
        )
    }
}

impl ConnectionMachine {
    /// `action_delay` is the pause after logout or delete-session before reconnecting.
    pub fn new(policy: ReconnectPolicy, pairing: PairingManager, action_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempts: 0,
            generation: 0,
            last_disconnect: None,
            pairing,
            policy,
            action_delay,
            resume: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pairing(&self) -> &PairingManager {
        &self.pairing
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            attempts: self.attempts,
            generation: self.generation,
            last_disconnect: self.last_disconnect,
            pairing: self.pairing.current().cloned(),
        }
    }

    /// Sends are only attempted from `Ready`; there is no queueing.
    pub fn ensure_ready(&self) -> Result<(), GatewayError> {
        if self.state == ConnectionState::Ready {
            Ok(())
        } else {
            Err(GatewayError::NotReady)
        }
    }

    /// Process start: `Idle -> Connecting`.
    pub fn start(&mut self, _cx: &Context) -> Vec<Effect> {
        if self.state != ConnectionState::Idle {
            return Vec::new();
        }
        self.begin_connect()
    }

    pub fn on_session_event(
        &mut self,
        generation: u64,
        event: SessionEvent,
        cx: &Context,
    ) -> Vec<Effect> {
        if generation != self.generation {
            log::debug!(
                "dropping session event from generation {} (current {})",
                generation,
                self.generation
            );
            return Vec::new();
        }
        match event {
            SessionEvent::PairingChallenge(token) => self.on_pairing_challenge(token, cx),
            SessionEvent::Open => self.on_open(),
            SessionEvent::Close(cause) => {
                if self.state.is_live() {
                    self.disconnect(cause, cx)
                } else {
                    Vec::new()
                }
            }
            SessionEvent::CredentialsChanged(credentials) => {
                vec![Effect::SaveCredentials(credentials)]
            }
            SessionEvent::MessageReceived(msg) => {
                vec![info(format!("message received from {}", msg.from))]
            }
        }
    }

    /// The collaborator could not open a session; treated as a transient close.
    pub fn on_connect_failed(&mut self, generation: u64, reason: &str, cx: &Context) -> Vec<Effect> {
        if generation != self.generation || !self.state.is_live() {
            return Vec::new();
        }
        let mut effects = vec![error(format!("connect failed: {}", reason))];
        effects.extend(self.disconnect(DisconnectCause::Transient, cx));
        effects
    }

    /// Backoff timer fired.
    pub fn on_reconnect_due(&mut self, generation: u64, _cx: &Context) -> Vec<Effect> {
        if generation != self.generation {
            return Vec::new();
        }
        match self.state {
            ConnectionState::Idle | ConnectionState::Disconnected(_) => self.begin_connect(),
            _ => Vec::new(),
        }
    }

    /// Pairing expiry timer fired. Only acts if the same challenge is still waiting for a scan.
    pub fn on_pairing_expired(&mut self, generation: u64, epoch: u64, cx: &Context) -> Vec<Effect> {
        if generation != self.generation
            || self.state != ConnectionState::AwaitingPairing
            || !self.pairing.is_current(epoch)
        {
            return Vec::new();
        }
        let mut effects = vec![error(
            "QR code expired without being scanned; requesting a new one",
        )];
        effects.extend(self.disconnect(DisconnectCause::PairingExpired, cx));
        effects
    }

    /// Tear down whatever exists and reconnect with no delay.
    pub fn force_reconnect(&mut self, _cx: &Context) -> Vec<Effect> {
        let mut effects = vec![info("forced reconnect requested")];
        effects.extend(self.begin_teardown(Resume::Now));
        effects.push(Effect::EndSession);
        effects
    }

    /// Invalidate credentials server-side and locally, end the session, and come back for a
    /// fresh QR code.
    pub fn logout(&mut self, has_session: bool, _cx: &Context) -> Result<Vec<Effect>, GatewayError> {
        if !has_session {
            return Err(GatewayError::NoSession);
        }
        let mut effects = vec![info("logging out")];
        effects.extend(self.begin_teardown(Resume::After(self.action_delay)));
        effects.push(Effect::LogoutSession);
        effects.push(Effect::EndSession);
        effects.push(Effect::WipeCredentials);
        Ok(effects)
    }

    /// End the session, erase stored credentials, and start over with a fresh pairing.
    pub fn delete_session(&mut self, _cx: &Context) -> Vec<Effect> {
        let mut effects = vec![info("deleting session data")];
        effects.extend(self.begin_teardown(Resume::After(self.action_delay)));
        effects.push(Effect::EndSession);
        effects.push(Effect::WipeCredentials);
        self.last_disconnect = None;
        effects
    }

    /// Leave `Closing` once the teardown effects are done. No-op in any other state.
    pub fn settle(&mut self, _cx: &Context) -> Vec<Effect> {
        if self.state != ConnectionState::Closing {
            return Vec::new();
        }
        self.state = ConnectionState::Idle;
        match self.resume.take().unwrap_or(Resume::Now) {
            Resume::Now => self.begin_connect(),
            Resume::After(delay) => vec![
                info(format!(
                    "requesting a new QR code in {:.1}s",
                    delay.as_secs_f64()
                )),
                Effect::ScheduleReconnect {
                    generation: self.generation,
                    delay,
                },
            ],
        }
    }

    fn begin_connect(&mut self) -> Vec<Effect> {
        let mut effects = vec![Effect::CancelReconnect];
        if self.pairing.consume() {
            effects.push(Effect::CancelPairingTimer);
        }
        self.generation += 1;
        self.attempts = self.attempts.saturating_add(1);
        self.state = ConnectionState::Connecting;
        self.resume = None;
        effects.push(info(format!(
            "connecting to chat network (attempt {})",
            self.attempts
        )));
        effects.push(Effect::Connect {
            generation: self.generation,
        });
        effects
    }

    fn begin_teardown(&mut self, resume: Resume) -> Vec<Effect> {
        let mut effects = vec![Effect::CancelReconnect];
        if self.pairing.consume() {
            effects.push(Effect::CancelPairingTimer);
        }
        self.generation += 1;
        self.attempts = 0;
        self.state = ConnectionState::Closing;
        self.resume = Some(resume);
        effects
    }

    fn on_pairing_challenge(&mut self, token: String, cx: &Context) -> Vec<Effect> {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::AwaitingPairing
        ) {
            log::debug!("ignoring pairing challenge while {}", self.state);
            return Vec::new();
        }
        match self.pairing.offer(token.clone(), cx.now) {
            Offer::Accepted { epoch, expires_in } => {
                self.state = ConnectionState::AwaitingPairing;
                vec![
                    info(format!(
                        "QR code received, waiting for scan (valid for {}s)",
                        expires_in.as_secs()
                    )),
                    Effect::ArmPairingTimer {
                        generation: self.generation,
                        epoch,
                        token,
                        after: expires_in,
                    },
                ]
            }
            Offer::Rejected => {
                log::debug!("pairing challenge refresh ignored; current QR code still outstanding");
                Vec::new()
            }
        }
    }

    fn on_open(&mut self) -> Vec<Effect> {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::AwaitingPairing
        ) {
            return Vec::new();
        }
        let mut effects = Vec::new();
        if self.pairing.consume() {
            effects.push(Effect::CancelPairingTimer);
        }
        self.state = ConnectionState::Ready;
        self.attempts = 0;
        self.last_disconnect = None;
        effects.push(Effect::Activity(
            ActivityLevel::Success,
            "client ready".to_string(),
        ));
        effects
    }

    fn disconnect(&mut self, cause: DisconnectCause, cx: &Context) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.pairing.consume() {
            effects.push(Effect::CancelPairingTimer);
        }
        effects.push(Effect::EndSession);
        self.generation += 1;
        self.last_disconnect = Some(cause);
        self.state = ConnectionState::Disconnected(cause);
        effects.push(error(format!("client disconnected: {}", cause)));

        if !self.policy.should_retry(cause) {
            self.state = ConnectionState::Idle;
            self.attempts = 0;
            effects.push(info(
                "session logged out; use /reconnect or /delete-session to pair again",
            ));
            return effects;
        }
        // An unscanned QR code means the service was reachable; it is not a failed attempt.
        if cause == DisconnectCause::PairingExpired {
            self.attempts = 0;
        }
        let delay = self.policy.delay(self.attempts, cause, cx.jitter);
        effects.push(info(format!(
            "reconnecting in {:.1}s",
            delay.as_secs_f64()
        )));
        effects.push(Effect::ScheduleReconnect {
            generation: self.generation,
            delay,
        });
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::InboundMessage;
    use chrono::TimeZone;
    use serde_json::json;

    fn cx() -> Context {
        Context::at(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap())
    }

    fn scheduled(effects: &[Effect]) -> Option<(u64, Duration)> {
        effects.iter().find_map(|e| match e {
            Effect::ScheduleReconnect { generation, delay } => Some((*generation, *delay)),
            _ => None,
        })
    }

    fn connects(effects: &[Effect]) -> Vec<u64> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Connect { generation } => Some(*generation),
                _ => None,
            })
            .collect()
    }

    fn ready_machine() -> ConnectionMachine {
        let mut m = ConnectionMachine::default();
        m.start(&cx());
        let g = m.generation();
        m.on_session_event(g, SessionEvent::Open, &cx());
        assert_eq!(m.state(), ConnectionState::Ready);
        m
    }

    #[test]
    fn pairing_then_open_reaches_ready() {
        let mut m = ConnectionMachine::default();
        let effects = m.start(&cx());
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.attempts(), 1);
        assert_eq!(connects(&effects), vec![m.generation()]);

        let g = m.generation();
        let effects = m.on_session_event(g, SessionEvent::PairingChallenge("ABC".into()), &cx());
        assert_eq!(m.state(), ConnectionState::AwaitingPairing);
        assert!(m.snapshot().pairing_view(cx().now).present);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::ArmPairingTimer { token, after, .. } if token == "ABC" && *after == Duration::from_secs(60)
        )));

        let effects = m.on_session_event(g, SessionEvent::Open, &cx());
        assert_eq!(m.state(), ConnectionState::Ready);
        assert_eq!(m.attempts(), 0);
        assert!(!m.snapshot().pairing_view(cx().now).present);
        assert!(effects.contains(&Effect::CancelPairingTimer));
    }

    #[test]
    fn refreshed_challenge_does_not_replace_first() {
        let mut m = ConnectionMachine::default();
        m.start(&cx());
        let g = m.generation();
        m.on_session_event(g, SessionEvent::PairingChallenge("ABC".into()), &cx());
        let effects = m.on_session_event(g, SessionEvent::PairingChallenge("DEF".into()), &cx());
        assert!(effects.is_empty());
        assert_eq!(m.snapshot().pairing.map(|p| p.token), Some("ABC".to_string()));
    }

    #[test]
    fn transient_close_schedules_backoff_then_reconnects() {
        let mut m = ready_machine();
        let g = m.generation();
        let effects = m.on_session_event(g, SessionEvent::Close(DisconnectCause::Transient), &cx());
        assert_eq!(
            m.state(),
            ConnectionState::Disconnected(DisconnectCause::Transient)
        );
        assert!(effects.contains(&Effect::EndSession));
        let (due_gen, delay) = scheduled(&effects).expect("reconnect scheduled");
        assert_eq!(delay, Duration::from_secs(3));

        let effects = m.on_reconnect_due(due_gen, &cx());
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.attempts(), 1);
        assert_eq!(connects(&effects).len(), 1);
    }

    #[test]
    fn repeated_connect_failures_back_off_further() {
        let mut m = ConnectionMachine::default();
        m.start(&cx());
        let mut delays = Vec::new();
        for _ in 0..8 {
            let g = m.generation();
            let effects = m.on_connect_failed(g, "bridge unreachable", &cx());
            let (due, delay) = scheduled(&effects).expect("scheduled");
            delays.push(delay);
            m.on_reconnect_due(due, &cx());
        }
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(delays[0], Duration::from_millis(4500));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(30)));
    }

    #[test]
    fn logged_out_close_goes_idle_without_retry() {
        let mut m = ready_machine();
        let g = m.generation();
        let effects = m.on_session_event(g, SessionEvent::Close(DisconnectCause::LoggedOut), &cx());
        assert_eq!(m.state(), ConnectionState::Idle);
        assert_eq!(m.attempts(), 0);
        assert_eq!(m.snapshot().last_disconnect, Some(DisconnectCause::LoggedOut));
        assert!(scheduled(&effects).is_none());
        assert!(m.settle(&cx()).is_empty());
    }

    #[test]
    fn pairing_expiry_recycles_session_with_short_delay() {
        let mut m = ConnectionMachine::default();
        m.start(&cx());
        let g = m.generation();
        let effects = m.on_session_event(g, SessionEvent::PairingChallenge("ABC".into()), &cx());
        let epoch = effects
            .iter()
            .find_map(|e| match e {
                Effect::ArmPairingTimer { epoch, .. } => Some(*epoch),
                _ => None,
            })
            .expect("timer armed");

        let effects = m.on_pairing_expired(g, epoch, &cx());
        assert_eq!(
            m.state(),
            ConnectionState::Disconnected(DisconnectCause::PairingExpired)
        );
        assert!(m.snapshot().pairing.is_none());
        assert!(effects.contains(&Effect::EndSession));
        assert_eq!(m.attempts(), 0);
        let (_, delay) = scheduled(&effects).expect("scheduled");
        assert_eq!(delay, Duration::from_secs(3));
    }

    #[test]
    fn pairing_timer_after_open_is_ignored() {
        let mut m = ConnectionMachine::default();
        m.start(&cx());
        let g = m.generation();
        m.on_session_event(g, SessionEvent::PairingChallenge("ABC".into()), &cx());
        m.on_session_event(g, SessionEvent::Open, &cx());
        assert!(m.on_pairing_expired(g, 1, &cx()).is_empty());
        assert_eq!(m.state(), ConnectionState::Ready);
    }

    #[test]
    fn logout_requires_session() {
        let mut m = ready_machine();
        assert_eq!(m.logout(false, &cx()), Err(GatewayError::NoSession));
        assert_eq!(m.state(), ConnectionState::Ready);
    }

    #[test]
    fn logout_goes_idle_then_schedules_fresh_pairing() {
        let mut m = ready_machine();
        let effects = m.logout(true, &cx()).expect("logout");
        assert_eq!(m.state(), ConnectionState::Closing);
        let logout_at = effects.iter().position(|e| *e == Effect::LogoutSession);
        let end_at = effects.iter().position(|e| *e == Effect::EndSession);
        let wipe_at = effects.iter().position(|e| *e == Effect::WipeCredentials);
        assert!(logout_at < end_at);
        assert!(wipe_at.is_some() && logout_at < wipe_at);

        let effects = m.settle(&cx());
        assert_eq!(m.state(), ConnectionState::Idle);
        assert_eq!(m.attempts(), 0);
        let (due, delay) = scheduled(&effects).expect("scheduled");
        assert_eq!(delay, Duration::from_secs(3));

        m.on_reconnect_due(due, &cx());
        assert_eq!(m.state(), ConnectionState::Connecting);
        let g = m.generation();
        m.on_session_event(g, SessionEvent::PairingChallenge("NEW".into()), &cx());
        assert_eq!(m.state(), ConnectionState::AwaitingPairing);
    }

    #[test]
    fn forced_reconnect_supersedes_pending_backoff() {
        let mut m = ready_machine();
        let g = m.generation();
        let effects = m.on_session_event(g, SessionEvent::Close(DisconnectCause::Unknown), &cx());
        let (stale_due, _) = scheduled(&effects).expect("scheduled");

        let effects = m.force_reconnect(&cx());
        assert!(effects.contains(&Effect::CancelReconnect));
        let effects = m.settle(&cx());
        assert_eq!(connects(&effects).len(), 1);
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.attempts(), 1);

        assert!(m.on_reconnect_due(stale_due, &cx()).is_empty());
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn delete_session_wipes_credentials_from_any_state() {
        let mut m = ConnectionMachine::default();
        m.start(&cx());
        let g = m.generation();
        m.on_session_event(g, SessionEvent::PairingChallenge("ABC".into()), &cx());
        let effects = m.delete_session(&cx());
        assert!(effects.contains(&Effect::WipeCredentials));
        assert!(effects.contains(&Effect::CancelPairingTimer));
        assert!(m.snapshot().pairing.is_none());
        let effects = m.settle(&cx());
        assert_eq!(m.state(), ConnectionState::Idle);
        assert!(scheduled(&effects).is_some());
    }

    #[test]
    fn stale_generation_events_are_dropped() {
        let mut m = ready_machine();
        let old = m.generation();
        m.force_reconnect(&cx());
        m.settle(&cx());
        assert!(m
            .on_session_event(old, SessionEvent::Close(DisconnectCause::Transient), &cx())
            .is_empty());
        assert!(m.on_session_event(old, SessionEvent::Open, &cx()).is_empty());
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn credential_changes_and_messages_become_effects() {
        let mut m = ready_machine();
        let g = m.generation();
        let creds = Credentials(json!({"token": "x"}));
        let effects = m.on_session_event(g, SessionEvent::CredentialsChanged(creds.clone()), &cx());
        assert_eq!(effects, vec![Effect::SaveCredentials(creds)]);

        let effects = m.on_session_event(
            g,
            SessionEvent::MessageReceived(InboundMessage {
                from: "6281234@c.us".into(),
                text: "hello".into(),
            }),
            &cx(),
        );
        assert!(matches!(&effects[..], [Effect::Activity(ActivityLevel::Info, msg)] if msg.contains("6281234@c.us")));
    }

    #[test]
    fn ensure_ready_only_in_ready() {
        let mut m = ConnectionMachine::default();
        assert_eq!(m.ensure_ready(), Err(GatewayError::NotReady));
        m.start(&cx());
        assert_eq!(m.ensure_ready(), Err(GatewayError::NotReady));
        let g = m.generation();
        m.on_session_event(g, SessionEvent::Open, &cx());
        assert_eq!(m.ensure_ready(), Ok(()));
    }
}
