//! Inbound message classification
//!
//! [`InboundRouter`] runs on the network task for every raw `(topic, payload)`
//! delivery. It only classifies and decodes; its result is handed to the
//! dispatch queue and applied later on the application thread.

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use super::mqtt_handler::ConnectionState;
use super::topic_codec::{self, ControlValue, DecodeError, Direction, TopicAddress};

/// Decoded state report, consumed exactly once by the application thread
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub topic: String,
    pub address: TopicAddress,
    pub payload: String,
    pub value: ControlValue,
    pub received_at: DateTime<Local>,
}

/// Why an inbound message did not become an [`InboundEvent`]
#[derive(Debug, Clone, PartialEq)]
pub enum DiscardReason {
    Unrecognized(&'static str),
    Decode(DecodeError),
}

/// Everything the network side reports to the application thread
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    /// Successfully decoded state report
    Inbound(InboundEvent),

    /// Message logged for diagnosis and otherwise dropped
    Discarded {
        topic: String,
        payload: String,
        reason: DiscardReason,
        received_at: DateTime<Local>,
    },

    /// Lifecycle transition observed by the session worker
    Connection {
        session: u64,
        state: ConnectionState,
    },

    /// Wildcard subscription issued after a successful acknowledgment
    Subscribed { session: u64, filter: String },
}

/// Result of routing one delivery
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Deliver(InboundEvent),
    Discard {
        topic: String,
        payload: String,
        reason: DiscardReason,
    },
    /// Echo of a `set` topic, ignored without a log entry
    Echo(TopicAddress),
}

impl Routed {
    /// Queue item for this outcome, if any
    pub fn into_event(self) -> Option<PanelEvent> {
        match self {
            Routed::Deliver(event) => Some(PanelEvent::Inbound(event)),
            Routed::Discard {
                topic,
                payload,
                reason,
            } => Some(PanelEvent::Discarded {
                topic,
                payload,
                reason,
                received_at: Local::now(),
            }),
            Routed::Echo(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InboundRouter {
    base_topic: String,
}

impl InboundRouter {
    pub fn new(base_topic: impl Into<String>) -> Self {
        Self {
            base_topic: base_topic.into(),
        }
    }

    pub fn base_topic(&self) -> &str {
        &self.base_topic
    }

    pub fn route(&self, topic: &str, payload: &[u8]) -> Routed {
        let payload_text = String::from_utf8_lossy(payload).into_owned();

        let address = match topic_codec::classify_topic(topic, &self.base_topic) {
            Ok(address) => address,
            Err(unrecognized) => {
                debug!("Ignoring message: {}", unrecognized);
                return Routed::Discard {
                    topic: topic.to_string(),
                    payload: payload_text,
                    reason: DiscardReason::Unrecognized(unrecognized.reason),
                };
            }
        };

        if address.direction != Direction::Val {
            debug!("Ignoring echoed command on {}", topic);
            return Routed::Echo(address);
        }

        match topic_codec::decode_value(address.control, payload) {
            Ok(value) => {
                debug!("Routed {} -> {:?}", topic, value);
                Routed::Deliver(InboundEvent {
                    topic: topic.to_string(),
                    address,
                    payload: payload_text,
                    value,
                    received_at: Local::now(),
                })
            }
            Err(e) => {
                warn!("Dropping malformed payload on {}: {}", topic, e);
                Routed::Discard {
                    topic: topic.to_string(),
                    payload: payload_text,
                    reason: DiscardReason::Decode(e),
                }
            }
        }
    }
}
