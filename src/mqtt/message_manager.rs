use chrono::{DateTime, Local};
use std::fmt;

/// A raw message as it came off (or goes onto) the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Local>,
}

impl fmt::Display for MqttMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = String::from_utf8_lossy(&self.payload);
        let preview: String = text.chars().take(40).collect();
        write!(f, "{} - {}: {}", self.timestamp.format("%H:%M:%S"), self.topic, preview)
    }
}

impl MqttMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        MqttMessage {
            topic: topic.into(),
            payload: payload.into(),
            timestamp: Local::now(),
        }
    }
}
