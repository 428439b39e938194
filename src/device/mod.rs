//! Device state model and synchronization
//!
//! [`DeviceSnapshot`] is the in-memory picture of the remote controllers;
//! [`DeviceSynchronizer`] is the only writer of it.

pub mod snapshot;
pub mod synchronizer;

pub use snapshot::{DeviceSnapshot, LampId, TerraceMode};
pub use synchronizer::{
    DeviceSynchronizer, PendingConfirmation, StatusOutcome, ThresholdOutcome,
};
