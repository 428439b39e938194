//! Automation strategies for the terrace lamp

use crate::config::StrategyKind;
use crate::device::{DeviceSnapshot, LampId};
use chrono::NaiveTime;
use std::fmt;

/// Evening-to-morning window; wraps past midnight when `start > end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NightWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl NightWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Start inclusive, end exclusive
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

impl Default for NightWindow {
    fn default() -> Self {
        Self::new(
            NaiveTime::from_hms_opt(17, 30, 0).unwrap_or_default(),
            NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default(),
        )
    }
}

/// What a rule evaluation sees
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub snapshot: &'a DeviceSnapshot,
    pub time_of_day: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    NightWindow,
    LightSensor,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerReason::NightWindow => write!(f, "night window"),
            TriggerReason::LightSensor => write!(f, "light sensor"),
        }
    }
}

/// A requested terrace lamp transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LampDecision {
    pub lamp: LampId,
    pub on: bool,
    pub reason: TriggerReason,
}

pub trait AutomationStrategy: Send + Sync + 'static {
    /// Returns a decision only when the lamp has to change state
    fn evaluate(&mut self, input: &RuleInput<'_>) -> Option<LampDecision>;

    fn kind(&self) -> StrategyKind;
}

/// `on = night window OR intensity below threshold`, edge-triggered against
/// the known lamp state
#[derive(Debug, Clone)]
pub struct ClientRule {
    window: NightWindow,
}

impl ClientRule {
    pub fn new(window: NightWindow) -> Self {
        Self { window }
    }
}

impl AutomationStrategy for ClientRule {
    fn evaluate(&mut self, input: &RuleInput<'_>) -> Option<LampDecision> {
        let snapshot = input.snapshot;
        let is_night = self.window.contains(input.time_of_day);
        let is_dark = snapshot.light_intensity < snapshot.terrace_threshold;
        let desired = is_night || is_dark;

        if desired == snapshot.lamp(LampId::Terrace) {
            return None;
        }

        Some(LampDecision {
            lamp: LampId::Terrace,
            on: desired,
            reason: if is_night {
                TriggerReason::NightWindow
            } else {
                TriggerReason::LightSensor
            },
        })
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::ClientRule
    }
}

/// The device decides; the client never commands in auto mode
#[derive(Debug, Clone, Default)]
pub struct DeviceMirror;

impl AutomationStrategy for DeviceMirror {
    fn evaluate(&mut self, _input: &RuleInput<'_>) -> Option<LampDecision> {
        None
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::DeviceMirror
    }
}
