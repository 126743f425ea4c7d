//! Outbound Command Dispatcher
//!
//! Turns typed commands from the control layer into publishes on the index-1
//! `set` topics. Commands are independent and unconditional; the only optional
//! policy is coalescing dimmer changes so a dragged slider publishes its final
//! value once input has been quiet for a short interval.

use std::time::{Duration, Instant};
use tracing::debug;

use crate::mqtt::mqtt_handler::{CommandSink, PublishOutcome};
use crate::mqtt::topic_codec::{encode_command_topic, encode_value, ControlValue, COMMAND_INDEX};

/// Result of handing one command to the sink
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub value: ControlValue,
    /// None when there was no session to derive the topic from
    pub topic: Option<String>,
    pub payload: String,
    pub outcome: PublishOutcome,
}

/// Latest-value-wins holder for dimmer commands
#[derive(Debug, Clone)]
struct Debouncer {
    quiet: Duration,
    pending: Option<(ControlValue, Instant)>,
}

impl Debouncer {
    fn hold(&mut self, value: ControlValue, now: Instant) {
        self.pending = Some((value, now));
    }

    fn take_due(&mut self, now: Instant) -> Option<ControlValue> {
        match &self.pending {
            Some((_, changed)) if now.duration_since(*changed) >= self.quiet => {
                self.pending.take().map(|(value, _)| value)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandDispatcher {
    debounce: Option<Debouncer>,
}

impl CommandDispatcher {
    /// `dimmer_quiet` of zero publishes every dimmer change immediately
    pub fn new(dimmer_quiet: Duration) -> Self {
        let debounce = (!dimmer_quiet.is_zero()).then_some(Debouncer {
            quiet: dimmer_quiet,
            pending: None,
        });
        Self { debounce }
    }

    /// Publishes `value` on its index-1 command topic
    ///
    /// Returns None when a dimmer change is held back for coalescing.
    pub fn dispatch(
        &mut self,
        sink: &impl CommandSink,
        value: ControlValue,
        now: Instant,
    ) -> Option<Dispatched> {
        if matches!(value, ControlValue::Dimmer(_)) {
            if let Some(debouncer) = self.debounce.as_mut() {
                debug!("Holding dimmer command {}", value);
                debouncer.hold(value, now);
                return None;
            }
        }
        Some(send(sink, value))
    }

    /// Publishes a held dimmer value once its quiet interval has passed
    pub fn flush_due(&mut self, sink: &impl CommandSink, now: Instant) -> Option<Dispatched> {
        let value = self.debounce.as_mut()?.take_due(now)?;
        Some(send(sink, value))
    }

    /// Publishes a held dimmer value regardless of timing
    pub fn flush_pending(&mut self, sink: &impl CommandSink) -> Option<Dispatched> {
        let (value, _) = self.debounce.as_mut()?.pending.take()?;
        Some(send(sink, value))
    }

    pub fn has_pending(&self) -> bool {
        self.debounce
            .as_ref()
            .is_some_and(|debouncer| debouncer.pending.is_some())
    }
}

fn send(sink: &impl CommandSink, value: ControlValue) -> Dispatched {
    let payload = encode_value(&value);
    let Some(base) = sink.base_topic() else {
        debug!("No session, dropping {} command", value.control_type());
        return Dispatched {
            value,
            topic: None,
            payload,
            outcome: PublishOutcome::Offline,
        };
    };

    let topic = encode_command_topic(base, value.control_type(), COMMAND_INDEX);
    let outcome = sink.publish(&topic, &payload);
    Dispatched {
        value,
        topic: Some(topic),
        payload,
        outcome,
    }
}
