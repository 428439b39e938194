//! # Configuration
//!
//! One TOML file, one struct per section. Every section has defaults so a
//! missing or partial file still yields a working session; a missing file is
//! written out with the defaults on first start.
//!
//! Lookup order: `$LAMPSYNC_CONFIG`, then `<config_dir>/lampsync/config.toml`.

use crate::mqtt::MqttConfig;
use chrono::NaiveTime;
use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn, Level};

const CONFIG_ENV: &str = "LAMPSYNC_CONFIG";
const CONFIG_DIR: &str = "lampsync";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Terrace controller status broadcasts
    pub status: String,
    /// Terrace mode and LED commands
    pub command: String,
    pub threshold_set: String,
    /// Optional confirmation channel for threshold changes
    pub threshold_echo: Option<String>,
    pub room_command: String,
    pub room_status: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            status: "POLINES/FADLI/IL".to_string(),
            command: "POLINES/PADLI/IL".to_string(),
            threshold_set: "POLINES/BADLI/IL".to_string(),
            threshold_echo: None,
            room_command: "POLINES/LAMPU_RUANG/COMMAND".to_string(),
            room_status: "POLINES/LAMPU_RUANG/STATUS".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub debounce_ms: u64,
    pub confirmation_timeout_ms: u64,
    pub rule_poll_secs: u64,
    pub notice_ttl_ms: u64,
}

impl TimingConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn rule_poll(&self) -> Duration {
        Duration::from_secs(self.rule_poll_secs)
    }

    pub fn notice_ttl(&self) -> Duration {
        Duration::from_millis(self.notice_ttl_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 400,
            confirmation_timeout_ms: 4000,
            rule_poll_secs: 5,
            notice_ttl_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// The client evaluates night window and light threshold
    #[default]
    ClientRule,
    /// The device runs its own automation; the client only mirrors it
    DeviceMirror,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub strategy: StrategyKind,
    /// `HH:MM`, local time
    pub night_start: String,
    pub night_end: String,
}

impl AutomationConfig {
    pub fn night_start_time(&self) -> Result<NaiveTime> {
        parse_clock(&self.night_start)
    }

    pub fn night_end_time(&self) -> Result<NaiveTime> {
        parse_clock(&self.night_end)
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::ClientRule,
            night_start: "17:30".to_string(),
            night_end: "06:00".to_string(),
        }
    }
}

fn parse_clock(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|e| eyre!("Invalid time of day '{}': {}", raw, e))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Full-scale value of intensity and threshold on the wire
    pub scale_max: u16,
    /// Threshold shown before the first status arrives (0-100)
    pub initial_threshold: u8,
    pub room3_enabled: bool,
    /// Room lamps honour the manual-mode guard like the terrace lamp
    pub gate_room_lamps: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            scale_max: 1023,
            initial_threshold: 40,
            room3_enabled: true,
            gate_room_lamps: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub history_capacity: usize,
    pub chart_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            history_capacity: 50,
            chart_capacity: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl LoggingConfig {
    pub fn level(&self) -> Level {
        self.level.parse().unwrap_or_else(|_| {
            warn!("Unknown log level '{}', using info", self.level);
            Level::INFO
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub broker: MqttConfig,
    pub topics: TopicConfig,
    pub timing: TimingConfig,
    pub automation: AutomationConfig,
    pub device: DeviceConfig,
    pub buffers: BufferConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        let mut path = dirs::config_dir().ok_or_else(|| eyre!("No config directory available"))?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    /// Loads and validates the configuration, writing the defaults first if
    /// the file does not exist yet
    pub async fn load_or_create(path: &Path) -> Result<Self> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check config file {}: {}", path.display(), e))?;

        if !exists {
            warn!("Config file {} missing, writing defaults", path.display());
            let config = AppConfig::default();
            config.save(path).await?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
        config.validate()?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file {}: {}", path.display(), e))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let topics = [
            ("status", &self.topics.status),
            ("command", &self.topics.command),
            ("threshold_set", &self.topics.threshold_set),
            ("room_command", &self.topics.room_command),
            ("room_status", &self.topics.room_status),
        ];
        for (name, topic) in topics {
            if topic.trim().is_empty() {
                return Err(eyre!("Topic '{}' must not be empty", name));
            }
        }
        if let Some(echo) = &self.topics.threshold_echo {
            if echo.trim().is_empty() {
                return Err(eyre!("Topic 'threshold_echo' must not be empty when set"));
            }
        }

        if self.device.scale_max == 0 {
            return Err(eyre!("device.scale_max must be positive"));
        }
        if self.device.initial_threshold > 100 {
            return Err(eyre!("device.initial_threshold must be within 0-100"));
        }
        if self.buffers.history_capacity == 0 || self.buffers.chart_capacity == 0 {
            return Err(eyre!("Buffer capacities must be positive"));
        }
        if self.timing.debounce_ms == 0 || self.timing.rule_poll_secs == 0 {
            return Err(eyre!("Debounce and rule poll intervals must be positive"));
        }

        let start = self.automation.night_start_time()?;
        let end = self.automation.night_end_time()?;
        if start == end {
            return Err(eyre!("Night window start and end must differ"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [broker]
            host = "10.0.0.5"

            [automation]
            strategy = "device_mirror"
            "#,
        )
        .unwrap();

        assert_eq!(config.broker.host, "10.0.0.5");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.automation.strategy, StrategyKind::DeviceMirror);
        assert_eq!(config.automation.night_start, "17:30");
        assert_eq!(config.timing.debounce_ms, 400);
        assert!(config.device.room3_enabled);
    }

    #[test]
    fn rejects_inconsistent_values() {
        let mut config = AppConfig::default();
        config.automation.night_end = "17:30".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.device.initial_threshold = 150;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.automation.night_start = "late".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = AppConfig::load_or_create(&path).await.unwrap();
        assert_eq!(created, AppConfig::default());
        assert!(path.exists());

        let loaded = AppConfig::load_or_create(&path).await.unwrap();
        assert_eq!(loaded, created);
    }
}
