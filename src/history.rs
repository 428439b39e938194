//! Bounded activity history and intensity chart buffers
//!
//! Both buffers share one discipline: append-only, insertion order is
//! display order, and once the capacity is reached the oldest entry is
//! evicted. Nothing in the control path reads these back; they are a record
//! for display collaborators.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Capacity-bounded FIFO log
#[derive(Clone, Debug)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedLog<T> {
    /// Creates an empty log. A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, item: T) {
        self.entries.push_back(item);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.entries.iter()
    }

    /// Newest first, the order the activity log is presented in
    pub fn iter_recent_first(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().rev()
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }
}

impl<T: Clone> BoundedLog<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

/// One human readable line of the activity log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl HistoryEntry {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Intensity sample for the chart, already on the 0-100 scale
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub time_label: String,
    pub intensity: u8,
}

impl ChartPoint {
    pub fn at(timestamp: DateTime<Local>, intensity: u8) -> Self {
        Self {
            time_label: timestamp.format("%H:%M:%S").to_string(),
            intensity,
        }
    }
}

pub type ActivityHistory = BoundedLog<HistoryEntry>;
pub type ChartSeries = BoundedLog<ChartPoint>;
