//! # MQTT transport
//!
//! Owns the single long-lived broker connection of a session.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings
//! ├── connection.rs       - Event loop task, ConnectionState, Publisher
//! ├── error.rs            - TransportError
//! └── message_manager.rs  - Raw message representation
//! ```
//!
//! The event loop task is the only writer of [`ConnectionState`]. On a
//! transport error it drops the link, reports `Disconnected` and lets the
//! next poll of `rumqttc` reconnect after a fixed pause; no backoff policy
//! is layered on top.
//!
//! Publishing is fire-and-forget at QoS 0 and is refused while the link is
//! not `Connected`, so callers can surface the failure instead of losing it.

pub mod config;
pub mod connection;
pub mod error;
pub mod message_manager;

pub use config::MqttConfig;
pub use connection::{ConnectionManager, ConnectionState, MqttPublisher, MqttStatus, Publisher};
pub use error::TransportError;
pub use message_manager::MqttMessage;
