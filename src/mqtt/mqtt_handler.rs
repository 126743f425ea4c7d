//! Connection Manager - broker session lifecycle
//!
//! Owns the single transport session of a panel and drives its state machine:
//!
//! ```text
//! Disconnected ──connect──► Connecting ──CONNACK ok──► Connected
//!      ▲                        │                          │
//!      │                  refused/error              error │
//!      │                        ▼                          ▼
//!      └──────disconnect──── Failed(reason) ◄──────────────┘
//! ```
//!
//! The transport event loop is polled by a [`SessionWorker`] on its own tokio task
//! (the network side). The worker classifies deliveries through the
//! [`InboundRouter`] and reports everything through the dispatch queue; it never
//! touches control state.

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use statum::{machine, state};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{BrokerConfig, ReconnectPolicy, SessionTarget};
use super::dispatch_queue::DispatchSender;
use super::message_manager::{InboundRouter, PanelEvent};
use super::topic_codec::{classify_topic, Direction};
use crate::error::PanelError;

/// How long `disconnect` waits for a graceful DISCONNECT before cancelling
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Last failure reason; behaves like `Disconnected` for reconnecting
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Non-blocking requests into the transport
///
/// Implemented by [`rumqttc::AsyncClient`]; every call only enqueues a request for
/// the event loop and returns immediately.
pub trait BrokerLink: Send + Sync {
    fn request_subscribe(&self, filter: &str) -> Result<(), PanelError>;
    fn request_publish(&self, topic: &str, payload: &[u8]) -> Result<(), PanelError>;
    fn request_disconnect(&self) -> Result<(), PanelError>;
}

impl BrokerLink for AsyncClient {
    fn request_subscribe(&self, filter: &str) -> Result<(), PanelError> {
        self.try_subscribe(filter, QoS::AtMostOnce)
            .map_err(|e| PanelError::ConnectionError(e.to_string()))
    }

    fn request_publish(&self, topic: &str, payload: &[u8]) -> Result<(), PanelError> {
        self.try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| PanelError::ConnectionError(e.to_string()))
    }

    fn request_disconnect(&self) -> Result<(), PanelError> {
        self.try_disconnect()
            .map_err(|e| PanelError::ConnectionError(e.to_string()))
    }
}

/// What happened to a publish request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the transport
    Sent,
    /// No connected session; nothing was sent
    Offline,
    /// Transport or schema refused the request
    Failed(String),
}

/// Destination for outbound commands
pub trait CommandSink {
    /// Base topic of the live session, if any
    fn base_topic(&self) -> Option<&str>;
    fn publish(&self, topic: &str, payload: &str) -> PublishOutcome;
}

/// Control flow after handling one transport event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
    Failed(String),
}

#[state]
#[derive(Debug, Clone)]
pub enum SessionPhase {
    Idle,
    Polling,
    Closed,
}

/// Network-side half of one broker session
#[machine]
pub struct SessionWorker<S: SessionPhase> {
    session: u64,
    link: Arc<dyn BrokerLink>,
    router: InboundRouter,
    filter: String,
    queue: DispatchSender,
    reconnect: ReconnectPolicy,
    attempts: u32,
    subscribed: bool,
}

impl<S: SessionPhase> SessionWorker<S> {
    pub fn session(&self) -> u64 {
        self.session
    }

    fn set_state(&self, state: ConnectionState) {
        debug!("Session {} -> {}", self.session, state);
        self.queue.send(PanelEvent::Connection {
            session: self.session,
            state,
        });
    }
}

impl SessionWorker<Idle> {
    pub fn create(
        session: u64,
        link: Arc<dyn BrokerLink>,
        target: &SessionTarget,
        queue: DispatchSender,
        reconnect: ReconnectPolicy,
    ) -> Self {
        Self::new(
            session,
            link,
            InboundRouter::new(target.base_topic.clone()),
            target.subscription_filter(),
            queue,
            reconnect,
            0,     // attempts
            false, // subscribed
        )
    }

    pub fn start(self) -> SessionWorker<Polling> {
        info!(
            "Session {} polling, will subscribe to {}",
            self.session, self.filter
        );
        self.transition()
    }
}

impl SessionWorker<Polling> {
    /// Reacts to one transport event
    ///
    /// Deliveries are only classified after the wildcard subscription has been
    /// requested for the current connection.
    pub fn handle_event(&mut self, event: Event) -> Flow {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    return Flow::Failed(format!("connection refused ({:?})", ack.code));
                }

                self.attempts = 0;
                self.set_state(ConnectionState::Connected);

                match self.link.request_subscribe(&self.filter) {
                    Ok(()) => {
                        info!("Session {} subscribed to {}", self.session, self.filter);
                        self.subscribed = true;
                        self.queue.send(PanelEvent::Subscribed {
                            session: self.session,
                            filter: self.filter.clone(),
                        });
                        Flow::Continue
                    }
                    Err(e) => Flow::Failed(format!("subscribe failed: {}", e)),
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                if !self.subscribed {
                    debug!("Dropping delivery before subscription: {}", publish.topic);
                    return Flow::Continue;
                }
                if let Some(event) = self
                    .router
                    .route(&publish.topic, &publish.payload)
                    .into_event()
                {
                    self.queue.send(event);
                }
                Flow::Continue
            }
            Event::Incoming(Packet::Disconnect) => {
                Flow::Failed("broker closed the session".to_string())
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                debug!("Session {} sent DISCONNECT", self.session);
                Flow::Stop
            }
            other => {
                debug!("Session {} event: {:?}", self.session, other);
                Flow::Continue
            }
        }
    }

    /// Records a failure and, if the policy allows, waits for the next attempt
    ///
    /// Returns false when the worker should stop.
    async fn fail_and_backoff(&mut self, reason: String, cancel: &CancellationToken) -> bool {
        error!("Session {} failed: {}", self.session, reason);
        self.subscribed = false;
        self.set_state(ConnectionState::Failed(reason));

        self.attempts += 1;
        let Some(delay) = self.reconnect.backoff(self.attempts) else {
            return false;
        };

        info!(
            "Session {} retrying in {:?} (attempt {}/{})",
            self.session, delay, self.attempts, self.reconnect.max_attempts
        );
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => {
                self.set_state(ConnectionState::Connecting);
                true
            }
        }
    }

    /// Polls the transport until it stops, fails for good or is cancelled
    pub async fn run_until_cancelled(
        mut self,
        mut eventloop: EventLoop,
        cancel: CancellationToken,
    ) -> SessionWorker<Closed> {
        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Session {} cancelled", self.session);
                    break;
                }
                polled = eventloop.poll() => polled,
            };

            let flow = match polled {
                Ok(event) => self.handle_event(event),
                Err(e) => Flow::Failed(describe_connection_error(&e)),
            };

            match flow {
                Flow::Continue => {}
                Flow::Stop => break,
                Flow::Failed(reason) => {
                    if !self.fail_and_backoff(reason, &cancel).await {
                        break;
                    }
                }
            }
        }

        self.transition()
    }
}

impl SessionWorker<Closed> {
    pub fn finish(self) {
        info!("Session {} closed", self.session);
    }
}

fn describe_connection_error(error: &ConnectionError) -> String {
    match error {
        ConnectionError::ConnectionRefused(code) => format!("connection refused ({:?})", code),
        other => other.to_string(),
    }
}

struct ActiveSession {
    id: u64,
    target: SessionTarget,
    link: Arc<dyn BrokerLink>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Application-side owner of the broker session
///
/// At most one session exists at a time. `connect` and `disconnect` return as
/// soon as the network task is started or stopped; `publish` never waits.
pub struct ConnectionManager {
    broker: BrokerConfig,
    reconnect: ReconnectPolicy,
    runtime: Handle,
    queue: DispatchSender,
    /// Last state applied on the application thread
    state: ConnectionState,
    session: Option<ActiveSession>,
    next_session: u64,
}

impl ConnectionManager {
    pub fn new(
        broker: BrokerConfig,
        reconnect: ReconnectPolicy,
        runtime: Handle,
        queue: DispatchSender,
    ) -> Self {
        Self {
            broker,
            reconnect,
            runtime,
            queue,
            state: ConnectionState::Disconnected,
            session: None,
            next_session: 1,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.clone()
    }

    /// Applies a lifecycle change reported by a session worker
    ///
    /// Returns false and changes nothing when `session` is not the live session.
    pub fn record_state(&mut self, session: u64, state: &ConnectionState) -> bool {
        if self.session_id() != Some(session) {
            return false;
        }
        self.state = state.clone();
        true
    }

    /// Id of the live session, if any
    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(|session| session.id)
    }

    pub fn target(&self) -> Option<&SessionTarget> {
        self.session.as_ref().map(|session| &session.target)
    }

    /// Opens a new session and returns its id
    ///
    /// Fails with a `ConfigError` for invalid input or while a session is
    /// connected. A leftover connecting or failed session is torn down first.
    /// Returns once the network task is running; the transition to `Connected`
    /// arrives through the dispatch queue.
    pub async fn connect(
        &mut self,
        host: &str,
        port: u16,
        base_topic: &str,
    ) -> Result<u64, PanelError> {
        let target = SessionTarget::new(host, port, base_topic)?;

        if self.state().is_connected() {
            return Err(PanelError::ConfigError(format!(
                "already connected to {}:{}",
                target.host, target.port
            )));
        }
        if self.session.is_some() {
            info!("Tearing down previous session before reconnecting");
            self.disconnect().await;
        }

        let mut options =
            MqttOptions::new(self.broker.client_id.clone(), target.host.clone(), target.port);
        options
            .set_keep_alive(self.broker.keep_alive())
            .set_clean_session(true);
        if let (Some(user), Some(pw)) = (&self.broker.username, &self.broker.password) {
            options.set_credentials(user.clone(), pw.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, self.broker.request_capacity);
        Ok(self.spawn_session(target, Arc::new(client), eventloop))
    }

    fn spawn_session(
        &mut self,
        target: SessionTarget,
        link: Arc<dyn BrokerLink>,
        eventloop: EventLoop,
    ) -> u64 {
        let id = self.next_session;
        self.next_session += 1;

        info!(
            "Session {} connecting to {}:{} (base {})",
            id, target.host, target.port, target.base_topic
        );
        self.state = ConnectionState::Connecting;

        let worker = SessionWorker::create(
            id,
            link.clone(),
            &target,
            self.queue.clone(),
            self.reconnect.clone(),
        )
        .start();

        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let task = self.runtime.spawn(async move {
            worker
                .run_until_cancelled(eventloop, worker_cancel)
                .await
                .finish();
        });

        self.session = Some(ActiveSession {
            id,
            target,
            link,
            cancel,
            task,
        });
        id
    }

    /// Stops the session; no callback fires after this returns
    ///
    /// Idempotent. Returns true if a session was torn down.
    pub async fn disconnect(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            debug!("Disconnect requested without an active session");
            self.state = ConnectionState::Disconnected;
            return false;
        };

        if let Err(e) = session.link.request_disconnect() {
            debug!("Session {} could not request DISCONNECT: {}", session.id, e);
        }

        let mut task = session.task;
        let joined = match tokio::time::timeout(DISCONNECT_GRACE, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                debug!("Session {} did not stop in time, cancelling", session.id);
                session.cancel.cancel();
                task.await
            }
        };
        if let Err(e) = joined {
            error!("Session {} task ended abnormally: {}", session.id, e);
        }

        self.state = ConnectionState::Disconnected;
        info!("Session {} disconnected", session.id);
        true
    }

    /// Installs a connected session backed by `link` without a transport
    #[cfg(test)]
    pub(crate) fn attach_test_session(
        &mut self,
        target: SessionTarget,
        link: Arc<dyn BrokerLink>,
    ) -> u64 {
        let id = self.next_session;
        self.next_session += 1;
        self.session = Some(ActiveSession {
            id,
            target,
            link,
            cancel: CancellationToken::new(),
            task: self.runtime.spawn(async {}),
        });
        self.state = ConnectionState::Connected;
        id
    }

    #[cfg(test)]
    pub(crate) fn queue_sender(&self) -> DispatchSender {
        self.queue.clone()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("Cancelling session {} on drop", session.id);
            session.cancel.cancel();
        }
    }
}

impl CommandSink for ConnectionManager {
    fn base_topic(&self) -> Option<&str> {
        self.target().map(|target| target.base_topic.as_str())
    }

    fn publish(&self, topic: &str, payload: &str) -> PublishOutcome {
        let Some(session) = self.session.as_ref().filter(|_| self.state.is_connected()) else {
            debug!("Offline, dropping publish to {}", topic);
            return PublishOutcome::Offline;
        };

        match classify_topic(topic, &session.target.base_topic) {
            Ok(address) if address.direction == Direction::Set => {}
            _ => {
                warn!("Refusing to publish to non-command topic {}", topic);
                return PublishOutcome::Failed(format!("{} is not a command topic", topic));
            }
        }

        match session.link.request_publish(topic, payload.as_bytes()) {
            Ok(()) => {
                debug!("Published {} -> {}", topic, payload);
                PublishOutcome::Sent
            }
            Err(e) => {
                warn!("Publish to {} failed: {}", topic, e);
                PublishOutcome::Failed(e.to_string())
            }
        }
    }
}
