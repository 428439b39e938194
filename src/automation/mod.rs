//! Automatic control of the terrace lamp
//!
//! The engine is polled on a fixed interval rather than reacting to every
//! intensity report, and it only yields a decision on a state transition.
//! Nothing is evaluated while the terrace runs in manual mode.

pub mod strategy;

pub use strategy::{
    AutomationStrategy, ClientRule, DeviceMirror, LampDecision, NightWindow, RuleInput,
    TriggerReason,
};

use crate::config::{AutomationConfig, StrategyKind};
use crate::device::{DeviceSnapshot, TerraceMode};
use chrono::NaiveTime;
use color_eyre::Result;
use tracing::{debug, info};

pub struct RuleEngine {
    strategy: Box<dyn AutomationStrategy>,
}

impl RuleEngine {
    pub fn new(strategy: Box<dyn AutomationStrategy>) -> Self {
        info!("Rule engine using {:?} strategy", strategy.kind());
        Self { strategy }
    }

    pub fn from_config(config: &AutomationConfig) -> Result<Self> {
        let strategy: Box<dyn AutomationStrategy> = match config.strategy {
            StrategyKind::ClientRule => Box::new(ClientRule::new(NightWindow::new(
                config.night_start_time()?,
                config.night_end_time()?,
            ))),
            StrategyKind::DeviceMirror => Box::new(DeviceMirror),
        };
        Ok(Self::new(strategy))
    }

    pub fn kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// One poll tick
    pub fn tick(
        &mut self,
        snapshot: &DeviceSnapshot,
        time_of_day: NaiveTime,
    ) -> Option<LampDecision> {
        if snapshot.terrace_mode != TerraceMode::Auto {
            debug!("Terrace in manual mode, skipping rule evaluation");
            return None;
        }

        let decision = self.strategy.evaluate(&RuleInput {
            snapshot,
            time_of_day,
        });
        if let Some(decision) = &decision {
            debug!("Rule decision: {:?}", decision);
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LampId;

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    #[test]
    fn manual_mode_suppresses_evaluation() {
        let mut engine = RuleEngine::from_config(&AutomationConfig::default()).unwrap();
        let mut snapshot = DeviceSnapshot::initial(40, false);
        snapshot.light_intensity = 5;
        snapshot.terrace_mode = TerraceMode::Manual;

        assert_eq!(engine.tick(&snapshot, noon()), None);

        snapshot.terrace_mode = TerraceMode::Auto;
        assert!(engine.tick(&snapshot, noon()).is_some());
    }

    #[test]
    fn unchanged_desire_yields_one_decision() {
        let mut engine = RuleEngine::from_config(&AutomationConfig::default()).unwrap();
        let mut snapshot = DeviceSnapshot::initial(40, false);
        snapshot.light_intensity = 5;

        let mut decisions = 0;
        for _ in 0..10 {
            if let Some(decision) = engine.tick(&snapshot, noon()) {
                decisions += 1;
                snapshot.lamp_status.insert(LampId::Terrace, decision.on);
            }
        }
        assert_eq!(decisions, 1);
    }

    #[test]
    fn builds_device_mirror_from_config() {
        let config = AutomationConfig {
            strategy: StrategyKind::DeviceMirror,
            ..AutomationConfig::default()
        };
        let engine = RuleEngine::from_config(&config).unwrap();
        assert_eq!(engine.kind(), StrategyKind::DeviceMirror);
    }
}
