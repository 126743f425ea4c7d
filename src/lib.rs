pub mod config;
pub mod error;
pub mod mqtt;
pub mod panel;

pub use config::{PanelConfig, PanelSettings};
pub use error::PanelError;
pub use mqtt::mqtt_handler::ConnectionState;
pub use mqtt::topic_codec::{ControlType, ControlValue};
pub use panel::{LogEntry, PanelEngine, PanelObserver};
