//! Error definitions for the panel engine

use crate::mqtt::topic_codec::{DecodeError, Unrecognized};
use thiserror::Error;

/// Errors raised by the panel engine
///
/// Every variant is handled at the layer that detects it. Network-side failures
/// become log entries and state transitions, never unwinding into the consumer loop.
#[derive(Debug, Error)]
pub enum PanelError {
    /// Invalid host, port, topic or other configuration input
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Transport-level failure (refused, timeout, rejected credentials)
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Malformed payload for the declared control type
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Message outside the known topic schema
    #[error("{0}")]
    UnrecognizedTopic(#[from] Unrecognized),

    /// Command issued with no connected session
    #[error("Not connected, command dropped")]
    PublishWhileOffline,

    /// Engine could not be set up
    #[error("Initialization error: {0}")]
    InitializationError(String),
}
