//! Command/echo reconciliation for the device snapshot
//!
//! The device broadcasts its state periodically while commands travel on a
//! separate topic without acknowledgement. A broadcast that left the device
//! before a command was applied would otherwise overwrite the optimistic
//! local value ("snap-back"). The threshold therefore moves through three
//! states:
//!
//! ```text
//!            edit                 debounced publish
//!   Idle ──────────► Editing ───────────────────────► Awaiting{expected, deadline}
//!    ▲                  │ publish failed                   │
//!    │                  ▼                                  │ matching report
//!    └──────────────────┴──────────────────────────────────┘ or deadline passed
//! ```
//!
//! While `Editing` or `Awaiting`, reported thresholds that differ from the
//! local value are ignored. A matching report commits the value, and a
//! passed deadline clears the expectation unconditionally (fail open).
//!
//! Lamp states follow a simpler rule: optimistic updates are applied on
//! command and the next authoritative report always wins.

use super::snapshot::{DeviceSnapshot, LampId, TerraceMode};
use crate::protocol::StatusReport;
use tokio::time::Instant;
use tracing::{debug, info};

/// The single threshold value currently in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingConfirmation {
    pub expected: u8,
    pub deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThresholdSync {
    Idle,
    Editing,
    Awaiting(PendingConfirmation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOutcome {
    /// No local intent pending, the report was taken as is
    Accepted { value: u8, changed: bool },
    /// The report matched the expected value
    Confirmed(u8),
    /// Stale or racing report, not applied
    Ignored { reported: u8, local: u8 },
}

/// Summary of what an authoritative report changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusOutcome {
    pub mode_change: Option<TerraceMode>,
    pub threshold: Option<ThresholdOutcome>,
    pub lamp_changes: Vec<(LampId, bool)>,
    pub intensity: u8,
}

#[derive(Debug, Clone)]
pub struct DeviceSynchronizer {
    snapshot: DeviceSnapshot,
    threshold_sync: ThresholdSync,
}

impl DeviceSynchronizer {
    pub fn new(snapshot: DeviceSnapshot) -> Self {
        Self {
            snapshot,
            threshold_sync: ThresholdSync::Idle,
        }
    }

    pub fn snapshot(&self) -> &DeviceSnapshot {
        &self.snapshot
    }

    pub fn pending_confirmation(&self) -> Option<PendingConfirmation> {
        match self.threshold_sync {
            ThresholdSync::Awaiting(pending) => Some(pending),
            _ => None,
        }
    }

    pub fn is_editing_threshold(&self) -> bool {
        self.threshold_sync == ThresholdSync::Editing
    }

    /// Optimistic local edit. Any value still awaiting confirmation is
    /// superseded, not queued.
    pub fn edit_threshold(&mut self, value: u8) {
        let value = value.min(100);
        if let ThresholdSync::Awaiting(pending) = self.threshold_sync {
            debug!(
                "Edit to {} supersedes pending confirmation of {}",
                value, pending.expected
            );
        }
        self.snapshot.terrace_threshold = value;
        self.threshold_sync = ThresholdSync::Editing;
    }

    /// Records the value that was just published and how long to wait for it
    pub fn expect_threshold(&mut self, expected: u8, deadline: Instant) {
        debug!("Expecting threshold {} until {:?}", expected, deadline);
        self.threshold_sync = ThresholdSync::Awaiting(PendingConfirmation { expected, deadline });
    }

    /// Drops local threshold intent after a publish could not be sent, so the
    /// next authoritative report reconciles the visible value
    pub fn abandon_threshold_edit(&mut self) {
        self.threshold_sync = ThresholdSync::Idle;
    }

    /// Clears an expectation whose deadline has passed. Returns the value
    /// that was given up on.
    pub fn expire_confirmation(&mut self, now: Instant) -> Option<u8> {
        match self.threshold_sync {
            ThresholdSync::Awaiting(pending) if pending.deadline <= now => {
                info!(
                    "No confirmation for threshold {} before deadline, accepting device reports again",
                    pending.expected
                );
                self.threshold_sync = ThresholdSync::Idle;
                Some(pending.expected)
            }
            _ => None,
        }
    }

    fn reconcile_threshold(&mut self, reported: u8, now: Instant) -> ThresholdOutcome {
        self.expire_confirmation(now);
        let local = self.snapshot.terrace_threshold;

        match self.threshold_sync {
            ThresholdSync::Idle => {
                self.snapshot.terrace_threshold = reported;
                ThresholdOutcome::Accepted {
                    value: reported,
                    changed: reported != local,
                }
            }
            ThresholdSync::Awaiting(pending) if pending.expected == reported => {
                debug!("Threshold {} confirmed by device", reported);
                self.snapshot.terrace_threshold = reported;
                self.threshold_sync = ThresholdSync::Idle;
                ThresholdOutcome::Confirmed(reported)
            }
            ThresholdSync::Awaiting(_) | ThresholdSync::Editing => {
                debug!("Ignoring reported threshold {} (local {})", reported, local);
                ThresholdOutcome::Ignored { reported, local }
            }
        }
    }

    /// Applies a threshold arriving on the echo topic
    pub fn apply_threshold_echo(&mut self, reported: u8, now: Instant) -> ThresholdOutcome {
        self.reconcile_threshold(reported, now)
    }

    /// Applies a full status broadcast from the terrace controller
    pub fn apply_status(&mut self, report: &StatusReport, now: Instant) -> StatusOutcome {
        let mut outcome = StatusOutcome {
            intensity: report.intensity,
            ..StatusOutcome::default()
        };

        self.snapshot.light_intensity = report.intensity;

        if self.snapshot.terrace_mode != report.mode {
            info!(
                "Device reports mode {} (was {})",
                report.mode, self.snapshot.terrace_mode
            );
            self.snapshot.terrace_mode = report.mode;
            outcome.mode_change = Some(report.mode);
        }

        if let Some(reported) = report.threshold {
            outcome.threshold = Some(self.reconcile_threshold(reported, now));
        }

        if let Some(on) = report.terrace_lamp {
            if self.set_lamp(LampId::Terrace, on) {
                outcome.lamp_changes.push((LampId::Terrace, on));
            }
        }

        outcome
            .lamp_changes
            .extend(self.apply_lamp_reports(&report.room_lamps));
        outcome
    }

    /// Applies authoritative lamp reports; unknown lamps are skipped.
    /// Returns only the lamps whose state actually changed.
    pub fn apply_lamp_reports(&mut self, reports: &[(LampId, bool)]) -> Vec<(LampId, bool)> {
        reports
            .iter()
            .filter_map(|&(lamp, on)| {
                (self.snapshot.has_lamp(lamp) && self.set_lamp(lamp, on)).then_some((lamp, on))
            })
            .collect()
    }

    /// Optimistic lamp update right after a command was published
    pub fn set_lamp_optimistic(&mut self, lamp: LampId, on: bool) {
        self.set_lamp(lamp, on);
    }

    fn set_lamp(&mut self, lamp: LampId, on: bool) -> bool {
        match self.snapshot.lamp_status.get_mut(&lamp) {
            Some(state) if *state != on => {
                *state = on;
                true
            }
            _ => false,
        }
    }
}
