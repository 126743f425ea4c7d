//! # Panel Engine
//!
//! Application-thread side of the panel. [`PanelEngine`] owns everything that may
//! only be touched by the single consumer: control state, the event log and the
//! receiving end of the dispatch queue. The presentation layer drives it through
//! three inputs and observes it through [`PanelObserver`].
//!
//! ```text
//! on_user_command ──► CommandDispatcher ──► ConnectionManager ──► broker
//!                                                │
//!                                          SessionWorker (network task)
//!                                                │ PanelEvent
//!                                                ▼
//! pump / pump_wait ◄── DispatchReceiver ◄── DispatchSender
//!       │
//!       ├─► ControlStore ──► on_state_changed
//!       └─► EventLog ──────► on_log_appended
//! ```
//!
//! Nothing here blocks for longer than the bounded wait in [`PanelEngine::pump_wait`].

pub mod command_dispatcher;
pub mod control_state;
pub mod event_log;

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::PanelConfig;
use crate::error::PanelError;
use crate::mqtt::dispatch_queue::{dispatch_queue, DispatchReceiver};
use crate::mqtt::message_manager::{DiscardReason, InboundEvent, PanelEvent};
use crate::mqtt::mqtt_handler::{ConnectionManager, ConnectionState, PublishOutcome};
use crate::mqtt::topic_codec::{ControlType, ControlValue, Unrecognized, COMMAND_INDEX};

pub use command_dispatcher::{CommandDispatcher, Dispatched};
pub use control_state::{ControlState, ControlStore};
pub use event_log::{EventLog, LogDirection, LogEntry, LogKind};

/// Callbacks into the presentation layer, all invoked on the application thread
pub trait PanelObserver: Send {
    /// Once per applied state report
    fn on_state_changed(
        &mut self,
        _control: ControlType,
        _index: u32,
        _value: &ControlValue,
        _at: DateTime<Local>,
    ) {
    }

    fn on_log_appended(&mut self, _entry: &LogEntry) {}

    fn on_connection_state_changed(&mut self, _state: &ConnectionState) {}
}

/// Observer that ignores everything
#[derive(Debug, Default)]
pub struct NoopObserver;

impl PanelObserver for NoopObserver {}

pub struct PanelEngine {
    connection: ConnectionManager,
    dispatcher: CommandDispatcher,
    queue: DispatchReceiver,
    controls: ControlStore,
    log: EventLog,
    drain_wait: Duration,
    observer: Box<dyn PanelObserver>,
}

impl PanelEngine {
    /// Builds an engine on the current tokio runtime
    pub fn new(config: &PanelConfig, observer: Box<dyn PanelObserver>) -> Result<Self, PanelError> {
        let runtime = Handle::try_current()
            .map_err(|e| PanelError::InitializationError(format!("no tokio runtime: {}", e)))?;
        Self::with_runtime(config, observer, runtime)
    }

    /// Builds an engine whose network tasks run on `runtime`
    pub fn with_runtime(
        config: &PanelConfig,
        observer: Box<dyn PanelObserver>,
        runtime: Handle,
    ) -> Result<Self, PanelError> {
        config.validate()?;

        let (queue_tx, queue_rx) = dispatch_queue();
        let connection = ConnectionManager::new(
            config.broker.clone(),
            config.reconnect.clone(),
            runtime,
            queue_tx,
        );

        info!(
            "Panel engine ready (log capacity {}, dimmer debounce {}ms)",
            config.panel.log_capacity, config.panel.dimmer_debounce_ms
        );
        Ok(Self {
            connection,
            dispatcher: CommandDispatcher::new(config.panel.dimmer_debounce()),
            queue: queue_rx,
            controls: ControlStore::new(),
            log: EventLog::new(config.panel.log_capacity),
            drain_wait: config.panel.drain_wait(),
            observer,
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn controls(&self) -> &ControlStore {
        &self.controls
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Bounded wait configured for [`PanelEngine::pump_wait`]
    pub fn drain_wait(&self) -> Duration {
        self.drain_wait
    }

    /// Starts a session; returns once its network task is running
    ///
    /// Configuration errors are logged and returned before any connection attempt.
    pub async fn on_connect_requested(
        &mut self,
        host: &str,
        port: u16,
        base_topic: &str,
    ) -> Result<(), PanelError> {
        if self.connection.session_id().is_some() && !self.connection_state().is_connected() {
            self.on_disconnect_requested().await;
        }

        match self.connection.connect(host, port, base_topic).await {
            Ok(session) => {
                debug!("Session {} requested", session);
                self.notify_connection(&ConnectionState::Connecting);
                self.append_log(LogEntry::system(format!(
                    "Connecting to {}:{}...",
                    host.trim(),
                    port
                )));
                Ok(())
            }
            Err(e) => {
                warn!("Connect request rejected: {}", e);
                self.append_log(LogEntry::error(LogDirection::System, None, e.to_string()));
                Err(e)
            }
        }
    }

    /// Stops the session; returns after the network task has ended
    pub async fn on_disconnect_requested(&mut self) {
        if self.connection.disconnect().await {
            self.notify_connection(&ConnectionState::Disconnected);
            self.append_log(LogEntry::system("Disconnected."));
        }
    }

    /// Issues a command for the index-1 control of `value`'s type
    ///
    /// Local state is updated right away; no state-changed callback fires for it.
    pub fn on_user_command(&mut self, value: ControlValue) {
        self.controls
            .apply(COMMAND_INDEX, value.clone(), Local::now());

        if let Some(dispatched) = self
            .dispatcher
            .dispatch(&self.connection, value, Instant::now())
        {
            self.record_dispatch(dispatched);
        }
    }

    /// Applies everything queued so far without waiting
    pub fn pump(&mut self) -> usize {
        self.flush_commands(false);

        let events = self.queue.drain();
        let applied = events.len();
        for event in events {
            self.apply_event(event);
        }
        applied
    }

    /// Waits at most `max_wait` for the first event, then drains the rest
    pub async fn pump_wait(&mut self, max_wait: Duration) -> usize {
        let mut applied = 0;
        if let Some(event) = self.queue.next_timeout(max_wait).await {
            self.apply_event(event);
            applied += 1;
        }
        applied + self.pump()
    }

    /// Publishes held commands and closes the session
    pub async fn shutdown(&mut self) {
        self.flush_commands(true);
        self.on_disconnect_requested().await;
        self.pump();
    }

    fn flush_commands(&mut self, force: bool) {
        let flushed = if force {
            self.dispatcher.flush_pending(&self.connection)
        } else {
            self.dispatcher.flush_due(&self.connection, Instant::now())
        };
        if let Some(dispatched) = flushed {
            self.record_dispatch(dispatched);
        }
    }

    fn record_dispatch(&mut self, dispatched: Dispatched) {
        match (dispatched.outcome, dispatched.topic) {
            (PublishOutcome::Sent, Some(topic)) => {
                self.append_log(LogEntry::tx(&topic, &dispatched.payload));
            }
            (PublishOutcome::Failed(reason), topic) => {
                let target = topic.unwrap_or_else(|| dispatched.value.control_type().to_string());
                self.append_log(LogEntry::error(
                    LogDirection::Tx,
                    None,
                    format!("Publish to {} failed: {}", target, reason),
                ));
            }
            (PublishOutcome::Offline, _) => {
                debug!(
                    "{} ({} command)",
                    PanelError::PublishWhileOffline,
                    dispatched.value.control_type()
                );
            }
            (PublishOutcome::Sent, None) => {}
        }
    }

    fn apply_event(&mut self, event: PanelEvent) {
        match event {
            PanelEvent::Inbound(inbound) => self.apply_inbound(inbound),
            PanelEvent::Discarded {
                topic,
                payload,
                reason,
                ..
            } => match reason {
                DiscardReason::Decode(e) => {
                    let entry = LogEntry::error(LogDirection::Rx, Some(&topic), e.to_string());
                    warn!("{}: {} ({:?})", topic, PanelError::from(e), payload);
                    self.append_log(entry);
                }
                DiscardReason::Unrecognized(why) => {
                    let entry = LogEntry::rx(LogKind::Ignored, &topic, why);
                    debug!(
                        "{} ({:?})",
                        PanelError::from(Unrecognized { topic, reason: why }),
                        payload
                    );
                    self.append_log(entry);
                }
            },
            PanelEvent::Connection { session, state } => {
                if !self.connection.record_state(session, &state) {
                    debug!("Ignoring {} from closed session {}", state, session);
                    return;
                }
                self.notify_connection(&state);
                match &state {
                    ConnectionState::Connected => self.append_log(LogEntry::system("Connected!")),
                    ConnectionState::Connecting => {
                        self.append_log(LogEntry::system("Reconnecting..."))
                    }
                    ConnectionState::Failed(reason) => self.append_log(LogEntry::error(
                        LogDirection::System,
                        None,
                        format!("Connection failed: {}", reason),
                    )),
                    ConnectionState::Disconnected => {}
                }
            }
            PanelEvent::Subscribed { session, filter } => {
                if self.is_current(session) {
                    self.append_log(LogEntry::system(format!("Subscribed to {}", filter)));
                }
            }
        }
    }

    fn apply_inbound(&mut self, inbound: InboundEvent) {
        let InboundEvent {
            topic,
            address,
            payload,
            value,
            received_at,
        } = inbound;

        if address.index == COMMAND_INDEX {
            self.append_log(LogEntry::rx(LogKind::RxFeedback, &topic, &payload));
            return;
        }

        self.controls.apply(address.index, value.clone(), received_at);
        self.observer
            .on_state_changed(address.control, address.index, &value, received_at);
        self.append_log(LogEntry::rx(LogKind::RxAuto, &topic, &payload));
    }

    fn is_current(&self, session: u64) -> bool {
        self.connection.session_id() == Some(session)
    }

    fn notify_connection(&mut self, state: &ConnectionState) {
        self.observer.on_connection_state_changed(state);
    }

    fn append_log(&mut self, entry: LogEntry) {
        let entry = self.log.append(entry);
        self.observer.on_log_appended(entry);
    }
}
