use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    /// Pause between a transport error and the next reconnect attempt
    pub reconnect_delay_ms: u64,
    /// Capacity of the request and inbound message channels
    pub channel_capacity: usize,
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            client_id: "lampsync-client".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 5,
            reconnect_delay_ms: 2000,
            channel_capacity: 100,
        }
    }
}

impl fmt::Display for MqttConfig {
    // Password stays out of logs
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.username {
            Some(user) => write!(f, "{}@{}:{}", user, self.host, self.port),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}
