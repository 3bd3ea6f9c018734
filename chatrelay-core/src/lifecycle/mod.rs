//! Connection lifecycle manager.
//!
//! A single task owns the live client, the reconnect timer and the
//! connection state. Everything else talks to it through a [`RelayHandle`]:
//! reconfiguration, sends and disconnects are commands processed one at a
//! time, client events and connect results come back tagged with the
//! generation of the client that produced them, and anything from an older
//! generation is dropped on arrival.

mod state;
mod subscription;

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

pub use state::{ConnectionState, LifecycleStatus};
use subscription::{Internal, Subscription};

use crate::channel::{ChannelEntry, ConnectionConfig, Credentials, normalize_channel};
use crate::client::{ClientEvent, ClientFactory};
use crate::config::RelayConfig;
use crate::envelope::EventEnvelope;
use crate::error::RelayError;
use crate::log::MessageLog;
use crate::pipeline::Pipeline;

/// Marker in a disconnect reason that means the close was requested locally.
const CLOSED_MARKER: &str = "closed";

enum Command {
    Reconfigure {
        config: ConnectionConfig,
        reply: oneshot::Sender<()>,
    },
    Send {
        channel: String,
        text: String,
        reply: oneshot::Sender<Result<(), RelayError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable front door to a running [`RelayManager`].
///
/// The manager stops once every handle is dropped or [`shutdown`](Self::shutdown)
/// is called.
#[derive(Clone)]
pub struct RelayHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<LifecycleStatus>,
    events: broadcast::Sender<EventEnvelope>,
    log: MessageLog,
}

impl RelayHandle {
    /// Re-derive the connection config from the channel set and credential
    /// store and reconcile against the live connection.
    ///
    /// Resolves once the manager has applied the change (teardown finished,
    /// new connect started if needed), not once the connection is up.
    pub async fn reconfigure(
        &self,
        channels: &[ChannelEntry],
        credentials: Option<&Credentials>,
    ) -> Result<(), RelayError> {
        self.apply(ConnectionConfig::derive(channels, credentials)).await
    }

    /// Reconcile against an already-derived config.
    pub async fn apply(&self, config: ConnectionConfig) -> Result<(), RelayError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Reconfigure { config, reply }).await?;
        rx.await.map_err(|_| RelayError::ManagerClosed)
    }

    /// Send `text` to `channel` over the live connection.
    ///
    /// Never retried; on [`RelayError::SendFailure`] the caller decides
    /// whether to resend.
    pub async fn send_message(&self, channel: &str, text: &str) -> Result<(), RelayError> {
        if text.trim().is_empty() {
            return Err(RelayError::EmptyMessage);
        }
        let (reply, rx) = oneshot::channel();
        self.request(Command::Send {
            channel: normalize_channel(channel),
            text: text.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| RelayError::ManagerClosed)?
    }

    /// Cancel any pending reconnect and close the live connection. Idempotent.
    pub async fn disconnect(&self) -> Result<(), RelayError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Disconnect { reply }).await?;
        rx.await.map_err(|_| RelayError::ManagerClosed)
    }

    /// Disconnect and stop the manager task.
    pub async fn shutdown(&self) -> Result<(), RelayError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| RelayError::ManagerClosed)
    }

    pub fn status(&self) -> LifecycleStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<LifecycleStatus> {
        self.status.clone()
    }

    /// Envelopes for every appended message and status change.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    async fn request(&self, cmd: Command) -> Result<(), RelayError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| RelayError::ManagerClosed)
    }
}

/// Spawn a manager on the current tokio runtime and return its handle.
pub fn spawn(config: RelayConfig, factory: impl ClientFactory) -> RelayHandle {
    let (manager, handle) = RelayManager::new(config, factory);
    tokio::spawn(manager.run());
    handle
}

/// Owner of the connection lifecycle. Drive it with [`run`](Self::run).
pub struct RelayManager {
    config: RelayConfig,
    factory: Arc<dyn ClientFactory>,
    commands: mpsc::Receiver<Command>,
    /// Commands pulled off the queue while coalescing reconfigurations.
    deferred: VecDeque<Command>,
    internal_tx: mpsc::Sender<Internal>,
    internal_rx: mpsc::Receiver<Internal>,
    status_tx: watch::Sender<LifecycleStatus>,
    pipeline: Pipeline,
    /// Config the manager is currently pursuing: that of the live client,
    /// or of the scheduled retry. `None` when idle or failed.
    target: Option<ConnectionConfig>,
    subscription: Option<Subscription>,
    generation: u64,
    /// An attempt has started and has not yet succeeded, failed or been torn down.
    connect_in_flight: bool,
    /// Generation of a torn-down client whose disconnect is still running.
    draining: Option<u64>,
    /// The in-flight attempt is waiting for `draining` before building its client.
    connect_pending: bool,
    state: ConnectionState,
    last_error: Option<String>,
    /// Consecutive failed attempts since the last successful connect.
    failures: u32,
    retry_at: Option<Instant>,
}

impl RelayManager {
    pub fn new(config: RelayConfig, factory: impl ClientFactory) -> (Self, RelayHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.event_buffer.max(1));
        let (internal_tx, internal_rx) = mpsc::channel(config.event_buffer.max(1));
        let (status_tx, status_rx) = watch::channel(LifecycleStatus::default());
        let log = MessageLog::bounded(config.max_messages);
        let pipeline = Pipeline::new(log.clone(), config.event_buffer);

        let handle = RelayHandle {
            commands: cmd_tx,
            status: status_rx,
            events: pipeline.sender(),
            log,
        };
        let manager = Self {
            config,
            factory: Arc::new(factory),
            commands: cmd_rx,
            deferred: VecDeque::new(),
            internal_tx,
            internal_rx,
            status_tx,
            pipeline,
            target: None,
            subscription: None,
            generation: 0,
            connect_in_flight: false,
            draining: None,
            connect_pending: false,
            state: ConnectionState::Disconnected,
            last_error: None,
            failures: 0,
            retry_at: None,
        };
        (manager, handle)
    }

    /// Run until shut down or until every handle is dropped.
    ///
    /// Nothing inside the loop awaits the protocol client: connects, sends
    /// and disconnects all run in spawned tasks and report back as
    /// [`Internal`] messages.
    pub async fn run(mut self) {
        tracing::debug!("Relay manager started");
        loop {
            if let Some(cmd) = self.deferred.pop_front() {
                if !self.handle_command(cmd) {
                    break;
                }
                continue;
            }

            let retry_at = self.retry_at;
            tokio::select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                Some(msg) = self.internal_rx.recv() => self.handle_internal(msg),
                _ = sleep_until(retry_at) => {
                    self.retry_at = None;
                    self.on_retry_timer();
                }
            }
        }
        self.stop();
        tracing::debug!("Relay manager stopped");
    }

    /// Returns false when the loop should exit.
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Reconfigure { config, reply } => self.reconfigure(config, vec![reply]),
            Command::Send {
                channel,
                text,
                reply,
            } => self.send(channel, text, reply),
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                self.stop();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn reconfigure(&mut self, mut config: ConnectionConfig, mut replies: Vec<oneshot::Sender<()>>) {
        let unchanged = match &self.target {
            Some(target) => target.equivalent(&config),
            None => config.is_empty() && self.state == ConnectionState::Disconnected,
        };
        if unchanged {
            tracing::debug!(channels = ?config.channels(), "Connection config unchanged");
            for reply in replies {
                let _ = reply.send(());
            }
            return;
        }

        self.teardown();

        // Anything queued up behind this reconfiguration supersedes it.
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                Command::Reconfigure { config: next, reply } => {
                    tracing::debug!("Coalescing queued reconfiguration");
                    config = next;
                    replies.push(reply);
                }
                other => {
                    self.deferred.push_back(other);
                    break;
                }
            }
        }

        self.failures = 0;
        if config.is_empty() {
            tracing::info!("Channel set empty, staying disconnected");
            self.target = None;
            self.set_state(ConnectionState::Disconnected);
        } else {
            tracing::info!(channels = ?config.channels(), "Connection config changed, reconnecting");
            self.target = Some(config);
            self.start_connect();
        }
        for reply in replies {
            let _ = reply.send(());
        }
    }

    fn disconnect(&mut self) {
        if self.subscription.is_none()
            && self.retry_at.is_none()
            && self.state == ConnectionState::Disconnected
        {
            return;
        }
        tracing::info!("Disconnect requested");
        self.teardown();
        self.target = None;
        self.failures = 0;
        self.set_state(ConnectionState::Disconnected);
    }

    fn stop(&mut self) {
        self.teardown();
        self.target = None;
        if self.state != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn send(&mut self, channel: String, text: String, reply: oneshot::Sender<Result<(), RelayError>>) {
        let sub = match (&self.state, &self.subscription) {
            (ConnectionState::Connected, Some(sub)) => sub,
            _ => {
                let _ = reply.send(Err(RelayError::NotConnected));
                return;
            }
        };
        let client = sub.client();
        let generation = sub.generation();
        let sink = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = client
                .send(&channel, &text)
                .await
                .map_err(|e| format!("{e:#}"));
            // If the manager is gone the reply is dropped and the caller sees ManagerClosed.
            let _ = sink
                .send(Internal::SendResult {
                    generation,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Event { generation, event } => {
                if !self.is_current(generation) {
                    tracing::trace!(generation, "Dropping event from stale client");
                    return;
                }
                match event {
                    ClientEvent::Connected => self.on_connected(),
                    ClientEvent::Disconnected { reason } => self.on_disconnected(reason),
                    ClientEvent::Message {
                        channel,
                        tags,
                        text,
                        is_self,
                    } => {
                        self.pipeline.ingest(&channel, tags, &text, is_self);
                    }
                }
            }
            Internal::ConnectResult { generation, result } => {
                if !self.is_current(generation) {
                    tracing::trace!(generation, "Dropping connect result from stale client");
                    return;
                }
                self.connect_in_flight = false;
                match result {
                    Ok(()) => self.on_connected(),
                    Err(reason) => self.on_failure(RelayError::ConnectFailure(reason)),
                }
            }
            Internal::SendResult {
                generation,
                result,
                reply,
            } => {
                if let Err(reason) = &result {
                    tracing::warn!(error = %reason, "Send failed");
                    if self.is_current(generation) {
                        self.last_error = Some(RelayError::SendFailure(reason.clone()).to_string());
                        self.publish();
                    }
                }
                let _ = reply.send(result.map_err(RelayError::SendFailure));
            }
            Internal::Drained { generation } => self.on_drained(generation),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|sub| sub.generation() == generation)
    }

    /// Start an attempt toward `target`. The client itself is only built
    /// once the previous one has finished closing.
    fn start_connect(&mut self) {
        if self.connect_in_flight {
            tracing::debug!("Connect already in flight, not starting another");
            return;
        }
        if self.target.is_none() {
            return;
        }
        let attempt = self.failures + 1;
        self.connect_in_flight = true;
        self.set_state(ConnectionState::Connecting { attempt });
        match self.draining {
            Some(generation) => {
                tracing::debug!(generation, "Waiting for previous client to close");
                self.connect_pending = true;
            }
            None => self.build_client(),
        }
    }

    fn build_client(&mut self) {
        let Some(config) = self.target.clone() else {
            self.connect_in_flight = false;
            return;
        };
        self.generation += 1;
        let mut sub = Subscription::attach(
            self.generation,
            &config,
            self.factory.as_ref(),
            self.internal_tx.clone(),
        );
        sub.start_connect(self.internal_tx.clone());
        self.subscription = Some(sub);
        tracing::info!(
            attempt = self.failures + 1,
            generation = self.generation,
            "Connecting"
        );
    }

    fn on_drained(&mut self, generation: u64) {
        if self.draining != Some(generation) {
            return;
        }
        self.draining = None;
        if std::mem::take(&mut self.connect_pending) {
            self.build_client();
        }
    }

    fn on_connected(&mut self) {
        if self.state == ConnectionState::Connected {
            return;
        }
        tracing::info!(generation = self.generation, "Connected");
        self.failures = 0;
        self.last_error = None;
        self.set_state(ConnectionState::Connected);
    }

    fn on_disconnected(&mut self, reason: String) {
        if reason.to_lowercase().contains(CLOSED_MARKER) {
            tracing::info!(reason = %reason, "Connection closed");
            self.teardown();
            self.target = None;
            self.set_state(ConnectionState::Disconnected);
        } else {
            self.on_failure(RelayError::UnexpectedDisconnect(reason));
        }
    }

    /// Record a connectivity failure and either schedule a retry or give up.
    fn on_failure(&mut self, error: RelayError) {
        self.teardown();
        self.failures += 1;

        if self.failures >= self.config.max_attempts {
            tracing::error!(attempts = self.failures, error = %error, "Giving up on connection");
            self.last_error = Some(
                RelayError::RetriesExhausted {
                    attempts: self.failures,
                    last: error.to_string(),
                }
                .to_string(),
            );
            self.target = None;
            self.set_state(ConnectionState::Failed {
                attempts: self.failures,
            });
            return;
        }

        let delay = self.config.reconnect_delay();
        tracing::warn!(
            error = %error,
            attempt = self.failures,
            delay_secs = delay.as_secs(),
            "Connection failed, retrying"
        );
        self.last_error = Some(error.to_string());
        self.retry_at = Some(Instant::now() + delay);
        let at = chrono::Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.set_state(ConnectionState::ReconnectScheduled {
            at,
            attempt: self.failures + 1,
        });
    }

    fn on_retry_timer(&mut self) {
        if matches!(self.state, ConnectionState::ReconnectScheduled { .. }) {
            tracing::debug!("Reconnect timer fired");
            self.start_connect();
        }
    }

    /// Cancel the timer and any attempt, and release the live client. The
    /// client's disconnect finishes in the background and reports back as
    /// [`Internal::Drained`].
    fn teardown(&mut self) {
        self.retry_at = None;
        self.connect_in_flight = false;
        self.connect_pending = false;
        if let Some(sub) = self.subscription.take() {
            self.draining = Some(sub.generation());
            sub.teardown(self.config.teardown_timeout(), self.internal_tx.clone());
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        tracing::debug!(from = self.state.label(), to = state.label(), "State transition");
        self.state = state;
        self.publish();
    }

    fn publish(&mut self) {
        let status = LifecycleStatus {
            state: self.state.clone(),
            last_error: self.last_error.clone(),
        };
        self.pipeline.publish_status(&status);
        self.status_tx.send_replace(status);
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
