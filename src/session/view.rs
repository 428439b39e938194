use crate::config::StrategyKind;
use crate::device::{DeviceSnapshot, LampId};
use crate::history::{ChartPoint, HistoryEntry};
use crate::mqtt::ConnectionState;
use chrono::{DateTime, Local};
use std::time::Duration;

/// Identity supplied by the auth collaborator. Display-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub username: String,
    pub is_admin: bool,
}

/// One-shot failure message, dismissed automatically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub raised_at: DateTime<Local>,
}

impl Notice {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raised_at: Local::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayTimerView {
    pub lamp: LampId,
    pub remaining: Duration,
}

/// Read-only picture of a session for display collaborators
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionView {
    pub snapshot: DeviceSnapshot,
    pub connection: ConnectionState,
    pub strategy: StrategyKind,
    /// Threshold published and not yet confirmed
    pub pending_threshold: Option<u8>,
    pub editing_threshold: bool,
    pub delay_timers: Vec<DelayTimerView>,
    /// Oldest first
    pub history: Vec<HistoryEntry>,
    pub chart: Vec<ChartPoint>,
    pub notice: Option<Notice>,
    pub operator: Option<Operator>,
}

impl SessionView {
    pub fn history_recent_first(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter().rev()
    }

    pub fn lamp(&self, lamp: LampId) -> bool {
        self.snapshot.lamp(lamp)
    }
}
