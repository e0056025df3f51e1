//! Connection manager: the single owner of the live session.
//!
//! Runs the [`ConnectionMachine`] on one task. Collaborator events, connect results, timer
//! callbacks and caller commands all arrive on one inbox and are handled one at a time; the
//! effects of each input (including credential persistence) finish before the next input is
//! read. Ending a dead session is the exception and runs in the background. Status readers
//! never wait on the inbox: the snapshot is published behind a lock as soon as the state moves.

use crate::activity::{ActivityLevel, ActivityLog};
use crate::config::Config;
use crate::connection::collaborator::{Connector, EventSink, SessionEvent, SessionHandle};
use crate::connection::machine::{ConnectionMachine, ConnectionSnapshot, Context, Effect};
use crate::connection::pairing::PairingManager;
use crate::connection::policy::ReconnectPolicy;
use crate::credentials::CredentialStore;
use crate::error::GatewayError;
use crate::qr;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

const INBOX_CAPACITY: usize = 64;

/// Everything that can wake the manager.
pub(crate) enum Input {
    Session {
        generation: u64,
        event: SessionEvent,
    },
    Connected {
        generation: u64,
        result: Result<Arc<dyn SessionHandle>, String>,
    },
    ReconnectDue {
        generation: u64,
    },
    PairingExpired {
        generation: u64,
        epoch: u64,
    },
    Command(Command),
}

pub(crate) enum Command {
    /// Hand out the session for a send, if `Ready`.
    AcquireSession {
        reply: oneshot::Sender<Result<Arc<dyn SessionHandle>, GatewayError>>,
    },
    Reconnect {
        reply: oneshot::Sender<()>,
    },
    Logout {
        reply: oneshot::Sender<Result<(), GatewayError>>,
    },
    DeleteSession {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Tunables for the manager, usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub policy: ReconnectPolicy,
    pub pairing_expiry: Duration,
    /// Pause after logout / delete-session before reconnecting.
    pub action_delay: Duration,
    /// Upper bound of random jitter added to scheduled reconnects.
    pub jitter: Duration,
    /// Log each accepted QR code as unicode blocks.
    pub print_pairing: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicy::default(),
            pairing_expiry: crate::connection::pairing::DEFAULT_EXPIRY,
            action_delay: Duration::from_secs(3),
            jitter: Duration::ZERO,
            print_pairing: false,
        }
    }
}

impl ConnectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: ReconnectPolicy::from_config(&config.reconnect),
            pairing_expiry: config.pairing.expiry(),
            action_delay: Duration::try_from_secs_f64(config.reconnect.action_delay_seconds)
                .unwrap_or(Duration::from_secs(3)),
            jitter: Duration::from_millis(config.reconnect.jitter_ms),
            print_pairing: config.pairing.print_terminal,
        }
    }
}

/// Cheap, cloneable front door to the connection manager.
#[derive(Clone)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<Input>,
    snapshot: Arc<RwLock<ConnectionSnapshot>>,
    activity: Arc<ActivityLog>,
}

impl ConnectionHandle {
    /// Latest published state. Never waits on the manager.
    pub async fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.read().await.clone()
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    async fn command<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Input::Command(make(reply)))
            .await
            .map_err(|_| GatewayError::Transport("connection manager stopped".to_string()))?;
        rx.await
            .map_err(|_| GatewayError::Transport("connection manager stopped".to_string()))
    }

    /// Send `content` to `address`. Fails fast with `NotReady` outside `Ready`; a transport
    /// failure is reported once and not retried. Every outcome is recorded in the activity log.
    pub async fn send_message(&self, address: &str, content: &str) -> Result<(), GatewayError> {
        let acquired = self
            .command(|reply| Command::AcquireSession { reply })
            .await
            .and_then(|r| r);
        let session = match acquired {
            Ok(s) => s,
            Err(e) => {
                self.activity
                    .error(format!("failed to send message to {}: {}", address, e))
                    .await;
                return Err(e);
            }
        };
        match session.send(address, content).await {
            Ok(()) => {
                self.activity
                    .append(
                        ActivityLevel::Success,
                        format!("message sent to {}: \"{}\"", address, content),
                    )
                    .await;
                Ok(())
            }
            Err(e) => {
                self.activity
                    .error(format!("error sending message to {}: {}", address, e))
                    .await;
                Err(GatewayError::Transport(format!("failed to send message: {}", e)))
            }
        }
    }

    /// Drop the current session and reconnect immediately, bypassing backoff.
    pub async fn reconnect(&self) -> Result<(), GatewayError> {
        self.command(|reply| Command::Reconnect { reply }).await
    }

    /// Log out server-side and reconnect for a fresh pairing. `NoSession` when nothing is live.
    pub async fn logout(&self) -> Result<(), GatewayError> {
        self.command(|reply| Command::Logout { reply })
            .await
            .and_then(|r| r)
    }

    /// Wipe stored credentials and reconnect for a fresh pairing.
    pub async fn delete_session(&self) -> Result<(), GatewayError> {
        self.command(|reply| Command::DeleteSession { reply }).await
    }

    /// End the session and stop the manager task.
    pub async fn shutdown(&self) {
        let _ = self.command(|reply| Command::Shutdown { reply }).await;
    }
}

/// Start the manager task. It connects right away.
pub fn spawn(
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    store: Arc<dyn CredentialStore>,
    activity: Arc<ActivityLog>,
) -> (ConnectionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    let machine = ConnectionMachine::new(
        settings.policy,
        PairingManager::new(settings.pairing_expiry),
        settings.action_delay,
    );
    let snapshot = Arc::new(RwLock::new(machine.snapshot()));
    let manager = ConnectionManager {
        machine,
        connector,
        store,
        activity: activity.clone(),
        snapshot: snapshot.clone(),
        inbox: tx.clone(),
        session: None,
        reconnect_timer: None,
        pairing_timer: None,
        jitter: settings.jitter,
        print_pairing: settings.print_pairing,
    };
    let task = tokio::spawn(manager.run(rx));
    (
        ConnectionHandle {
            tx,
            snapshot,
            activity,
        },
        task,
    )
}

struct ConnectionManager {
    machine: ConnectionMachine,
    connector: Arc<dyn Connector>,
    store: Arc<dyn CredentialStore>,
    activity: Arc<ActivityLog>,
    snapshot: Arc<RwLock<ConnectionSnapshot>>,
    inbox: mpsc::Sender<Input>,
    session: Option<Arc<dyn SessionHandle>>,
    reconnect_timer: Option<JoinHandle<()>>,
    pairing_timer: Option<JoinHandle<()>>,
    jitter: Duration,
    print_pairing: bool,
}

impl ConnectionManager {
    async fn run(mut self, mut inbox: mpsc::Receiver<Input>) {
        let cx = self.context();
        let effects = self.machine.start(&cx);
        self.apply(effects).await;
        self.publish().await;

        while let Some(input) = inbox.recv().await {
            let cx = self.context();
            let effects = match input {
                Input::Session { generation, event } => {
                    self.machine.on_session_event(generation, event, &cx)
                }
                Input::Connected { generation, result } => {
                    self.on_connected(generation, result, &cx).await
                }
                Input::ReconnectDue { generation } => {
                    self.machine.on_reconnect_due(generation, &cx)
                }
                Input::PairingExpired { generation, epoch } => {
                    self.machine.on_pairing_expired(generation, epoch, &cx)
                }
                Input::Command(Command::Shutdown { reply }) => {
                    self.stop().await;
                    let _ = reply.send(());
                    return;
                }
                Input::Command(command) => {
                    self.on_command(command, &cx).await;
                    continue;
                }
            };
            // Readers see the transition before any effect touches the network.
            self.publish().await;
            self.apply(effects).await;
            let settled = self.machine.settle(&cx);
            self.apply(settled).await;
            self.publish().await;
        }
        self.stop().await;
    }

    fn context(&self) -> Context {
        Context {
            now: Utc::now(),
            jitter: random_jitter(self.jitter),
        }
    }

    async fn on_connected(
        &mut self,
        generation: u64,
        result: Result<Arc<dyn SessionHandle>, String>,
        cx: &Context,
    ) -> Vec<Effect> {
        match result {
            Ok(handle) => {
                if generation == self.machine.generation() && self.machine.state().is_live() {
                    if let Some(old) = self.session.replace(handle) {
                        end_detached(old, "replaced");
                    }
                } else {
                    log::debug!("ending session from superseded generation {}", generation);
                    end_detached(handle, "superseded");
                }
                Vec::new()
            }
            Err(e) => self.machine.on_connect_failed(generation, &e, cx),
        }
    }

    /// Commands reply only after their effects have run, so callers observe the new state.
    async fn on_command(&mut self, command: Command, cx: &Context) {
        match command {
            Command::AcquireSession { reply } => {
                let result = self
                    .machine
                    .ensure_ready()
                    .and_then(|()| self.session.clone().ok_or(GatewayError::NotReady));
                let _ = reply.send(result);
            }
            Command::Reconnect { reply } => {
                let effects = self.machine.force_reconnect(cx);
                self.finish(effects, cx).await;
                let _ = reply.send(());
            }
            Command::Logout { reply } => {
                match self.machine.logout(self.session.is_some(), cx) {
                    Ok(effects) => {
                        self.finish(effects, cx).await;
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::DeleteSession { reply } => {
                let effects = self.machine.delete_session(cx);
                self.finish(effects, cx).await;
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                self.stop().await;
                let _ = reply.send(());
            }
        }
    }

    async fn finish(&mut self, effects: Vec<Effect>, cx: &Context) {
        self.publish().await;
        self.apply(effects).await;
        self.publish().await;
        let settled = self.machine.settle(cx);
        self.apply(settled).await;
        self.publish().await;
    }

    async fn publish(&self) {
        *self.snapshot.write().await = self.machine.snapshot();
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Connect { generation } => self.connect(generation).await,
                Effect::EndSession => self.retire_session(),
                Effect::LogoutSession => {
                    if let Some(session) = self.session.as_ref() {
                        match session.logout().await {
                            Ok(()) => self.activity.info("logged out from chat network").await,
                            Err(e) => self.activity.error(format!("logout failed: {}", e)).await,
                        }
                    }
                }
                Effect::ScheduleReconnect { generation, delay } => {
                    abort(&mut self.reconnect_timer);
                    let tx = self.inbox.clone();
                    self.reconnect_timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(Input::ReconnectDue { generation }).await;
                    }));
                }
                Effect::CancelReconnect => abort(&mut self.reconnect_timer),
                Effect::ArmPairingTimer {
                    generation,
                    epoch,
                    token,
                    after,
                } => {
                    if self.print_pairing {
                        match qr::render_terminal(&token) {
                            Ok(code) => log::info!("scan this QR code with your phone:\n{}", code),
                            Err(e) => log::warn!("rendering QR code failed: {}", e),
                        }
                    }
                    abort(&mut self.pairing_timer);
                    let tx = self.inbox.clone();
                    self.pairing_timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = tx.send(Input::PairingExpired { generation, epoch }).await;
                    }));
                }
                Effect::CancelPairingTimer => abort(&mut self.pairing_timer),
                Effect::SaveCredentials(credentials) => {
                    match self.store.save(&credentials).await {
                        Ok(()) => log::debug!("credentials saved"),
                        Err(e) => {
                            self.activity
                                .error(format!("failed to save credentials: {}", e))
                                .await
                        }
                    }
                }
                Effect::WipeCredentials => match self.store.wipe().await {
                    Ok(()) => self.activity.info("stored session data deleted").await,
                    Err(e) => {
                        self.activity
                            .error(format!("failed to delete session data: {}", e))
                            .await
                    }
                },
                Effect::Activity(level, message) => self.activity.append(level, message).await,
            }
        }
    }

    async fn connect(&mut self, generation: u64) {
        self.retire_session();
        let credentials = match self.store.load().await {
            Ok(c) => c,
            Err(e) => {
                self.activity
                    .error(format!("failed to load credentials, pairing from scratch: {}", e))
                    .await;
                None
            }
        };
        let connector = self.connector.clone();
        let tx = self.inbox.clone();
        let sink = EventSink::new(generation, tx.clone());
        tokio::spawn(async move {
            let result = connector.connect(credentials, sink).await;
            let _ = tx.send(Input::Connected { generation, result }).await;
        });
    }

    /// Hand the session to a background task to end. Its generation is already dead, so
    /// nothing waits on the bridge answering.
    fn retire_session(&mut self) {
        if let Some(session) = self.session.take() {
            let activity = self.activity.clone();
            tokio::spawn(async move {
                if let Err(e) = session.end().await {
                    activity
                        .error(format!("failed to end session cleanly: {}", e))
                        .await;
                }
            });
        }
    }

    async fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.end().await {
                self.activity
                    .error(format!("failed to end session cleanly: {}", e))
                    .await;
            }
        }
    }

    async fn stop(&mut self) {
        abort(&mut self.reconnect_timer);
        abort(&mut self.pairing_timer);
        self.end_session().await;
        log::info!("connection manager stopped");
    }
}

fn end_detached(session: Arc<dyn SessionHandle>, which: &'static str) {
    tokio::spawn(async move {
        if let Err(e) = session.end().await {
            log::debug!("ending {} session failed: {}", which, e);
        }
    });
}

fn abort(timer: &mut Option<JoinHandle<()>>) {
    if let Some(t) = timer.take() {
        t.abort();
    }
}

/// Uniform jitter in `[0, max]`; `None` when disabled.
fn random_jitter(max: Duration) -> Option<Duration> {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return None;
    }
    let mut bytes = [0u8; 8];
    if let Err(e) = getrandom::getrandom(&mut bytes) {
        log::debug!("getrandom failed, skipping jitter: {}", e);
        return None;
    }
    Some(Duration::from_millis(u64::from_le_bytes(bytes) % (max_ms + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_disabled_at_zero() {
        assert_eq!(random_jitter(Duration::ZERO), None);
    }

    #[test]
    fn jitter_stays_within_bound() {
        for _ in 0..100 {
            let j = random_jitter(Duration::from_millis(250)).expect("jitter");
            assert!(j <= Duration::from_millis(250));
        }
    }

    #[test]
    fn settings_follow_config() {
        let mut config = Config::default();
        config.pairing.expiry_seconds = 20;
        config.reconnect.action_delay_seconds = 1.5;
        config.reconnect.jitter_ms = 400;
        let s = ConnectionSettings::from_config(&config);
        assert_eq!(s.pairing_expiry, Duration::from_secs(20));
        assert_eq!(s.action_delay, Duration::from_millis(1500));
        assert_eq!(s.jitter, Duration::from_millis(400));
        assert!(s.print_pairing);
    }
}
