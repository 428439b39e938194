//! Topic router: exact-match dispatch of raw messages to payload decoders

use crate::config::TopicConfig;
use crate::mqtt::MqttMessage;
use crate::protocol::{self, DeviceScale, Inbound, ProtocolError};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("a handler for topic {0} is already registered")]
    DuplicateTopic(String),

    #[error("topic name must not be empty")]
    EmptyTopic,
}

type Decoder<M> = Box<dyn Fn(&[u8]) -> Result<M, ProtocolError> + Send + Sync>;

pub struct TopicRouter<M> {
    routes: HashMap<String, Decoder<M>>,
}

impl<M> TopicRouter<M> {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Registers the decoder for a topic. Each topic gets exactly one handler.
    pub fn register<F>(&mut self, topic: impl Into<String>, decoder: F) -> Result<(), RouterError>
    where
        F: Fn(&[u8]) -> Result<M, ProtocolError> + Send + Sync + 'static,
    {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(RouterError::EmptyTopic);
        }
        if self.routes.contains_key(&topic) {
            return Err(RouterError::DuplicateTopic(topic));
        }
        debug!("Registered handler for {}", topic);
        self.routes.insert(topic, Box::new(decoder));
        Ok(())
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.routes.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Decodes a message for its topic. Unknown topics and payloads that fail
    /// to decode are logged and dropped.
    pub fn dispatch(&self, message: &MqttMessage) -> Option<M> {
        let Some(decoder) = self.routes.get(&message.topic) else {
            debug!("No handler for topic {}", message.topic);
            return None;
        };

        match decoder(&message.payload) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!("Discarding message on {}: {}", message.topic, e);
                None
            }
        }
    }
}

impl<M> Default for TopicRouter<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Topics the session subscribes to, in the order they are registered
pub fn inbound_topics(topics: &TopicConfig) -> Vec<String> {
    let mut subscriptions = vec![topics.status.clone(), topics.room_status.clone()];
    subscriptions.extend(topics.threshold_echo.clone());
    subscriptions
}

/// Router for every topic the session listens on
pub fn inbound_router(
    topics: &TopicConfig,
    scale: DeviceScale,
) -> Result<TopicRouter<Inbound>, RouterError> {
    let mut router = TopicRouter::new();
    router.register(topics.status.clone(), move |payload| {
        protocol::decode_status(payload, scale)
    })?;
    router.register(topics.room_status.clone(), protocol::decode_room_status)?;
    if let Some(echo) = &topics.threshold_echo {
        router.register(echo.clone(), move |payload| {
            protocol::decode_threshold_echo(payload, scale)
        })?;
    }
    Ok(router)
}
