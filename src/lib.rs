//! # lampsync
//!
//! Client-side state synchronization for an MQTT lamp installation: a
//! terrace lamp driven by a light sensor and a night window, plus up to
//! three room lamps.
//!
//! ```text
//! ConnectionManager ──► TopicRouter ──► DeviceSynchronizer ──► SessionView
//!        ▲                                     │
//!        │                                RuleEngine (poll)
//!        └──── Publisher ◄──── ControlSession ◄──── Intent
//! ```
//!
//! Intensity and threshold are held on a 0-100 scale everywhere except on
//! the wire; see [`protocol::DeviceScale`].

pub mod automation;
pub mod config;
pub mod device;
pub mod history;
pub mod mqtt;
pub mod protocol;
pub mod router;
pub mod session;
