//! Connection controller
//!
//! A single task owns the transport, the lifecycle state, the reconnect policy, the
//! outbound queue and the heartbeat. Callers talk to it through [`ConnectionManager`],
//! whose entry points post commands and never fail. Transport callbacks arrive as
//! events tagged with the epoch of the link that produced them, so events from a
//! transport that was already replaced are ignored.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use url::Url;

use super::environment::{EnvironmentEvent, EnvironmentHandle, NetworkProbe};
use super::heartbeat::HeartbeatMonitor;
use super::queue::OutboundQueue;
use super::registry::{Subscription, SubscriptionRegistry};
use super::state::{backoff_delay, ConnectionState, ReconnectState};
use crate::config::{ClientConfig, ConfigError, FileTokenStore, NoToken, TokenStore};
use crate::notice::{Notice, NoticeSink};
use crate::protocol::{
    InboundMessage, InboundPayload, OutboundEnvelope, ProtocolResult, SystemEvent,
};
use crate::transport::{BoxedSink, BoxedStream, Transport, TransportError};

/// How long a graceful close may take before the transport is simply dropped
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Requests from callers to the controller task
#[derive(Debug)]
pub(crate) enum Command {
    Send(String),
    Reconnect,
    Environment(EnvironmentEvent),
    Shutdown(oneshot::Sender<()>),
}

/// Callback from a link task
struct TransportEvent {
    epoch: u64,
    kind: TransportEventKind,
}

enum TransportEventKind {
    Opened(BoxedSink),
    Message(String),
    Failed(String),
    Closed,
}

type OpenFuture = BoxFuture<'static, Result<(BoxedSink, BoxedStream), TransportError>>;

/// Handle to a running connection manager
///
/// Created once with [`ConnectionManager::init`] and shared by reference. Dropping the
/// handle shuts the manager down; [`ConnectionManager::shutdown`] does the same and
/// waits until every resource has been released.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    registry: SubscriptionRegistry,
    status: watch::Receiver<ConnectionState>,
    last_message: watch::Receiver<Option<Arc<InboundMessage>>>,
    attempts: Arc<AtomicU32>,
    probe: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Start the manager, reading the token from `config.token_file` if set
    ///
    /// Must be called from within a tokio runtime.
    pub fn init<T, N>(config: ClientConfig, transport: T, notices: N) -> Self
    where
        T: Transport,
        N: NoticeSink,
    {
        match config.token_file.clone() {
            Some(path) => Self::init_with_token_store(config, transport, notices, FileTokenStore::new(path)),
            None => Self::init_with_token_store(config, transport, notices, NoToken),
        }
    }

    /// Start the manager with an explicit token store
    pub fn init_with_token_store<T, N, K>(config: ClientConfig, transport: T, notices: N, tokens: K) -> Self
    where
        T: Transport,
        N: NoticeSink,
        K: TokenStore,
    {
        let (controller, manager) = build(config, Box::new(transport), Box::new(notices), Box::new(tokens));
        tokio::spawn(controller.run());
        manager
    }

    /// Send a serialized payload, queueing it while no transport is open
    pub fn send_message(&self, payload: impl Into<String>) {
        self.post(Command::Send(payload.into()));
    }

    /// Serialize `message` as JSON and send it
    pub fn send_json<M: Serialize>(&self, message: &M) -> ProtocolResult<()> {
        self.send_message(serde_json::to_string(message)?);
        Ok(())
    }

    /// Serialize a prepared envelope and send it
    pub fn send_envelope(&self, envelope: &OutboundEnvelope) -> ProtocolResult<()> {
        self.send_message(envelope.to_json()?);
        Ok(())
    }

    /// Listen for messages of `event_type` until the returned handle is dropped
    pub fn subscribe<F>(&self, event_type: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.registry.subscribe(event_type, callback)
    }

    /// Remove every listener for `event_type`
    pub fn unsubscribe(&self, event_type: &str) -> usize {
        self.registry.unsubscribe_all(event_type)
    }

    /// Drop the current transport, reset the retry budget and connect again
    pub fn reconnect(&self) {
        self.post(Command::Reconnect);
    }

    /// Get the current connection state
    pub fn connection_status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    /// Receiver that observes every status change
    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    /// The most recently received message
    pub fn last_message(&self) -> Option<Arc<InboundMessage>> {
        self.last_message.borrow().clone()
    }

    /// Get the number of reconnect attempts since the last successful connect
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Handle for reporting visibility and network transitions
    pub fn environment(&self) -> EnvironmentHandle {
        EnvironmentHandle::new(self.commands.clone())
    }

    /// Get the subscription registry shared with the controller
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Stop the manager and wait until timers, watchers and the transport are released
    pub async fn shutdown(mut self) {
        if let Some(probe) = self.probe.take() {
            probe.abort();
        }
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    fn post(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Connection manager is not running, command dropped");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(probe) = self.probe.take() {
            probe.abort();
        }
        let (done_tx, _) = oneshot::channel();
        let _ = self.commands.send(Command::Shutdown(done_tx));
    }
}

/// Wire a controller to its handle without starting it
fn build(
    config: ClientConfig,
    transport: Box<dyn Transport>,
    notices: Box<dyn NoticeSink>,
    tokens: Box<dyn TokenStore>,
) -> (Controller, ConnectionManager) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(ConnectionState::Disconnected);
    let (last_message_tx, last_message_rx) = watch::channel(None);
    let registry = SubscriptionRegistry::new();
    let attempts = Arc::new(AtomicU32::new(0));

    let probe = config.network_probe_interval().and_then(|period| {
        let endpoint = config.endpoint().ok()?;
        let probe = NetworkProbe::for_endpoint(&endpoint, period)?;
        Some(probe.spawn(EnvironmentHandle::new(commands_tx.clone())))
    });

    let controller = Controller {
        heartbeat: HeartbeatMonitor::new(config.heartbeat_interval()),
        config,
        transport,
        notices,
        tokens,
        registry: registry.clone(),
        state: ConnectionState::Disconnected,
        status_tx,
        last_message_tx,
        reconnect: ReconnectState::default(),
        attempts: Arc::clone(&attempts),
        queue: OutboundQueue::new(),
        writer: None,
        link: None,
        epoch: 0,
        commands: commands_rx,
        events_tx,
        events: events_rx,
    };

    let manager = ConnectionManager {
        commands: commands_tx,
        registry,
        status: status_rx,
        last_message: last_message_rx,
        attempts,
        probe,
    };

    (controller, manager)
}

/// State owned by the controller task
struct Controller {
    config: ClientConfig,
    transport: Box<dyn Transport>,
    notices: Box<dyn NoticeSink>,
    tokens: Box<dyn TokenStore>,
    registry: SubscriptionRegistry,
    state: ConnectionState,
    status_tx: watch::Sender<ConnectionState>,
    last_message_tx: watch::Sender<Option<Arc<InboundMessage>>>,
    reconnect: ReconnectState,
    /// Mirror of `reconnect.attempts` readable from the handle
    attempts: Arc<AtomicU32>,
    heartbeat: HeartbeatMonitor,
    queue: OutboundQueue,
    writer: Option<BoxedSink>,
    link: Option<JoinHandle<()>>,
    epoch: u64,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Controller {
    async fn run(mut self) {
        if self.config.connect_on_init {
            self.connect();
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send(payload)) => self.send_message(payload).await,
                    Some(Command::Reconnect) => self.reconnect().await,
                    Some(Command::Environment(event)) => self.on_environment(event).await,
                    Some(Command::Shutdown(done)) => {
                        self.teardown().await;
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        self.teardown().await;
                        return;
                    }
                },
                Some(event) = self.events.recv() => self.on_transport_event(event).await,
                _ = self.heartbeat.tick() => self.send_heartbeat().await,
                _ = self.reconnect.fired() => {
                    debug!("Reconnect timer fired");
                    self.connect();
                }
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection state {} -> {}", self.state, state);
            self.state = state;
            self.status_tx.send_replace(state);
        }
    }

    fn set_attempts(&mut self, attempts: u32) {
        self.reconnect.attempts = attempts;
        self.attempts.store(attempts, Ordering::SeqCst);
    }

    /// Endpoint URL with the token query parameter, if a token is stored
    fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let mut url = self.config.endpoint()?;
        if let Some(token) = self.tokens.load() {
            url.query_pairs_mut().append_pair("token", &token);
        }
        Ok(url)
    }

    fn connect(&mut self) {
        self.reconnect.cancel();
        self.abandon_link();

        let url = match self.endpoint_url() {
            Ok(url) => url,
            Err(e) => {
                error!("Failed to create transport: {}", e);
                self.set_state(ConnectionState::Error);
                return;
            }
        };

        self.set_state(ConnectionState::Connecting);
        info!("Connecting to {} (attempt epoch {})", self.config.url, self.epoch);

        let opening = self.transport.open(url);
        let events = self.events_tx.clone();
        self.link = Some(tokio::spawn(run_link(self.epoch, opening, events)));
    }

    /// Forget the current link so none of its events are acted upon
    fn abandon_link(&mut self) {
        self.epoch += 1;
        self.writer = None;
        if let Some(link) = self.link.take() {
            link.abort();
        }
    }

    /// Close the transport, giving the peer a close frame when possible
    async fn close_transport(&mut self) {
        self.heartbeat.stop();
        if let Some(mut writer) = self.writer.take() {
            match timeout(CLOSE_TIMEOUT, writer.close()).await {
                Ok(Ok(())) => debug!("Transport closed"),
                Ok(Err(e)) => debug!("Error while closing transport: {}", e),
                Err(_) => debug!("Timed out closing transport"),
            }
        }
        self.abandon_link();
    }

    async fn reconnect(&mut self) {
        info!("Reconnecting");
        self.reconnect.cancel();
        self.close_transport().await;
        self.set_attempts(0);
        self.connect();
    }

    async fn send_message(&mut self, payload: String) {
        if self.state == ConnectionState::Connected {
            if let Some(writer) = self.writer.as_mut() {
                match writer.send(payload.clone()).await {
                    Ok(()) => {
                        debug!("Sent message ({} bytes)", payload.len());
                        return;
                    }
                    Err(e) => warn!("Send failed, queueing message: {}", e),
                }
            }
        }

        self.queue.enqueue(payload);
        if self.state == ConnectionState::Disconnected {
            self.connect();
        }
    }

    async fn send_heartbeat(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let heartbeat = match OutboundEnvelope::heartbeat().to_json() {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode heartbeat: {}", e);
                return;
            }
        };
        match writer.send(heartbeat).await {
            Ok(()) => debug!("Heartbeat sent"),
            Err(e) => warn!("Heartbeat failed: {}", e),
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        if event.epoch != self.epoch {
            debug!("Ignoring event from superseded transport (epoch {})", event.epoch);
            return;
        }

        match event.kind {
            TransportEventKind::Opened(writer) => self.on_open(writer).await,
            TransportEventKind::Message(text) => self.on_message(&text),
            TransportEventKind::Failed(reason) => self.on_error(&reason),
            TransportEventKind::Closed => self.on_close(),
        }
    }

    async fn on_open(&mut self, writer: BoxedSink) {
        info!("Connected to {}", self.config.url);
        self.writer = Some(writer);
        self.reconnect.cancel();
        self.set_attempts(0);
        self.set_state(ConnectionState::Connected);

        if let Some(writer) = self.writer.as_mut() {
            match self.queue.flush(writer).await {
                Ok(0) => {}
                Ok(sent) => info!("Flushed {} queued messages", sent),
                Err(e) => warn!("Queue flush stopped: {}", e),
            }
        }

        self.heartbeat.start();
        self.notices.notify(Notice::success("Connected to real-time updates"));
    }

    fn on_message(&mut self, text: &str) {
        let message = match InboundMessage::from_json(text) {
            Ok(message) => Arc::new(message),
            Err(e) => {
                error!("Dropping malformed message: {}", e);
                return;
            }
        };
        debug!("Received '{}' message", message.event_type);
        self.last_message_tx.send_replace(Some(Arc::clone(&message)));

        match &message.payload {
            InboundPayload::System(event) => self.on_system_event(event),
            InboundPayload::Json(_) => {
                let report = self.registry.dispatch(&message);
                if report.failed > 0 {
                    warn!(
                        "{} of {} listeners for '{}' failed",
                        report.failed,
                        report.failed + report.delivered,
                        message.event_type
                    );
                }
            }
        }
    }

    fn on_system_event(&self, event: &SystemEvent) {
        let notice = match event {
            SystemEvent::AnalysisStarted { topic } => {
                Notice::info(format!("Analysis started{}", topic_suffix(topic)))
            }
            SystemEvent::AnalysisCompleted { topic } => {
                Notice::success(format!("Analysis completed{}", topic_suffix(topic)))
            }
            SystemEvent::AnalysisError { error, topic } => Notice::error(format!(
                "Analysis failed{}: {}",
                topic_suffix(topic),
                error.as_deref().unwrap_or("unknown error")
            )),
            SystemEvent::ServerMaintenance { message } => Notice::warning(
                message
                    .clone()
                    .unwrap_or_else(|| "Server maintenance in progress".to_string()),
            )
            .persistent(),
            SystemEvent::Unknown => {
                debug!("Ignoring unknown system message");
                return;
            }
        };
        self.notices.notify(notice);
    }

    fn on_error(&mut self, reason: &str) {
        error!("Transport error: {}", reason);
        self.set_state(ConnectionState::Error);
    }

    fn on_close(&mut self) {
        info!("Connection closed");
        self.writer = None;
        self.link = None;
        self.heartbeat.stop();
        self.set_state(ConnectionState::Disconnected);

        if !self.config.auto_reconnect {
            return;
        }

        let attempts = self.reconnect.attempts;
        let max_attempts = self.config.max_reconnect_attempts;
        if attempts < max_attempts {
            let delay = backoff_delay(self.config.base_delay(), self.config.max_delay(), attempts);
            self.reconnect.schedule(delay);
            self.set_attempts(attempts + 1);
            warn!(
                "Reconnecting in {}ms (attempt {}/{})",
                delay.as_millis(),
                attempts + 1,
                max_attempts
            );
            self.notices.notify(Notice::warning(format!(
                "Connection lost. Reconnecting in {}ms (attempt {}/{})",
                delay.as_millis(),
                attempts + 1,
                max_attempts
            )));
        } else {
            error!("Giving up after {} reconnect attempts", attempts);
            self.set_state(ConnectionState::Error);
            self.notices.notify(
                Notice::error("Unable to reach real-time updates. Reconnect manually to try again.")
                    .persistent(),
            );
        }
    }

    async fn on_environment(&mut self, event: EnvironmentEvent) {
        match event {
            EnvironmentEvent::Visible if self.state == ConnectionState::Disconnected => {
                info!("Became visible while disconnected, reconnecting");
                self.reconnect().await;
            }
            EnvironmentEvent::Online
                if matches!(
                    self.state,
                    ConnectionState::Disconnected | ConnectionState::Error
                ) =>
            {
                info!("Network back online, reconnecting");
                self.reconnect().await;
            }
            EnvironmentEvent::Offline => {
                warn!("Network went offline");
                self.notices
                    .notify(Notice::warning("Network connection lost"));
            }
            other => debug!("Environment {:?} while {}, nothing to do", other, self.state),
        }
    }

    async fn teardown(&mut self) {
        info!("Shutting down connection manager");
        self.reconnect.cancel();
        self.close_transport().await;
        if !self.queue.is_empty() {
            warn!("Discarding {} undelivered messages", self.queue.len());
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

fn topic_suffix(topic: &Option<String>) -> String {
    match topic {
        Some(topic) => format!(" for {}", topic),
        None => String::new(),
    }
}

/// Drive one transport attempt, reporting its lifecycle as events
async fn run_link(epoch: u64, opening: OpenFuture, events: mpsc::UnboundedSender<TransportEvent>) {
    let emit = |kind| events.send(TransportEvent { epoch, kind }).is_ok();

    match opening.await {
        Ok((writer, mut reader)) => {
            if !emit(TransportEventKind::Opened(writer)) {
                return;
            }
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(text) => {
                        if !emit(TransportEventKind::Message(text)) {
                            return;
                        }
                    }
                    Err(e) => {
                        emit(TransportEventKind::Failed(e.to_string()));
                        break;
                    }
                }
            }
        }
        Err(e) => {
            emit(TransportEventKind::Failed(e.to_string()));
        }
    }

    emit(TransportEventKind::Closed);
}
