//! # MQTT Integration Module
//!
//! Broker-facing half of the panel. Everything here either runs on the network
//! task or hands data across to it; state and log ownership stay in [`crate::panel`].
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs          - Broker settings, validated session targets, reconnect policy
//! ├── topic_codec.rs     - Topic schema and payload encoding per control type
//! ├── message_manager.rs - Routing of inbound publishes into panel events
//! ├── dispatch_queue.rs  - Network task to application thread handoff
//! └── mqtt_handler.rs    - Session state machine and connection lifecycle
//! ```
//!
//! ## Topic Schema
//!
//! Every control lives at `<base>/<control>/<index>/<set|val>`. Index 1 is the
//! panel's own command channel, higher indices are reported by devices. The
//! panel subscribes to `<base>/#` and only ever publishes to index-1 `set` topics.
//!
//! ## Threading
//!
//! The [`mqtt_handler::SessionWorker`] polls the rumqttc event loop on a tokio
//! task and never touches application state directly. Decoded messages and
//! lifecycle changes go through the [`dispatch_queue`] tagged with their session
//! id, so the consumer can drop anything from a session it has already closed.

pub mod config;
pub mod dispatch_queue;
pub mod message_manager;
pub mod mqtt_handler;
pub mod topic_codec;
