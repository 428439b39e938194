use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::error::TransportError;
use super::message_manager::MqttMessage;

const MAX_ERROR_MESSAGES: usize = 10;

/// Coarse link state reported to consumers. Only the event loop task moves it.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Reconnecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Error => "Error",
        };
        write!(f, "{}", text)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connection_state: ConnectionState,
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<DateTime<Local>>,
}

/// Fire-and-forget publish primitive used by the command layer
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    fn connection_state(&self) -> ConnectionState;
}

struct LinkShared {
    state: watch::Sender<ConnectionState>,
    status: watch::Sender<MqttStatus>,
}

impl LinkShared {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (status, _) = watch::channel(MqttStatus::default());
        Self { state, status }
    }

    fn transition(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!("MQTT connection state: {} -> {}", current, next);
            *current = next;
            true
        });
        self.status.send_modify(|status| status.connection_state = next);
    }

    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn record_error(&self, message: String) {
        self.status.send_modify(|status| {
            status.error_messages.push(message);
            let overflow = status.error_messages.len().saturating_sub(MAX_ERROR_MESSAGES);
            status.error_messages.drain(..overflow);
        });
    }

    fn record_received(&self) {
        self.status.send_modify(|status| {
            status.messages_received += 1;
            status.last_activity = Some(Local::now());
        });
    }

    fn record_sent(&self) {
        self.status.send_modify(|status| {
            status.messages_sent += 1;
            status.last_activity = Some(Local::now());
        });
    }
}

/// Cloneable publishing side of the connection
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    shared: Arc<LinkShared>,
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let state = self.shared.current();
        if state != ConnectionState::Connected {
            warn!("Refusing publish to {} while {}", topic, state);
            return Err(TransportError::NotConnected(state));
        }

        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)?;
        self.shared.record_sent();
        debug!("Published to {}", topic);
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        self.shared.current()
    }
}

/// Owns the single broker connection and its event loop task
pub struct ConnectionManager {
    client: AsyncClient,
    shared: Arc<LinkShared>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Starts connecting to the broker and returns the inbound message stream.
    ///
    /// `subscriptions` are (re)issued on every ConnAck, so they survive
    /// reconnects of a clean session.
    pub fn connect(
        config: &MqttConfig,
        subscriptions: Vec<String>,
    ) -> (Self, mpsc::Receiver<MqttMessage>) {
        info!("Connecting to MQTT broker {}", config);

        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive());
        if let (Some(user), Some(pw)) = (&config.username, &config.password) {
            options.set_credentials(user.clone(), pw.clone());
        }

        let capacity = config.channel_capacity.max(1);
        let (client, eventloop) = AsyncClient::new(options, capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);

        let shared = Arc::new(LinkShared::new());
        shared.transition(ConnectionState::Connecting);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            subscriptions,
            inbound_tx,
            shared.clone(),
            config.reconnect_delay(),
            cancel.clone(),
        ));
        debug!("MQTT event loop task spawned");

        (
            Self {
                client,
                shared,
                cancel,
                task: Some(task),
            },
            inbound_rx,
        )
    }

    pub fn status(&self) -> ConnectionState {
        self.shared.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<MqttStatus> {
        self.shared.status.subscribe()
    }

    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
            shared: self.shared.clone(),
        }
    }

    /// Sends a DISCONNECT and stops the event loop
    pub async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.shared.current() == ConnectionState::Connected {
            if let Err(e) = self.client.try_disconnect() {
                warn!("Failed to queue DISCONNECT: {}", e);
            }
        }

        let Some(mut task) = self.task.take() else {
            debug!("MQTT event loop already stopped");
            return Ok(());
        };

        let result = match tokio::time::timeout(Duration::from_secs(1), &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                debug!("Event loop did not finish after DISCONNECT, cancelling");
                self.cancel.cancel();
                task.await
            }
        };
        self.shared.transition(ConnectionState::Disconnected);
        result.map_err(|e| TransportError::Task(e.to_string()))
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Vec<String>,
    inbound_tx: mpsc::Sender<MqttMessage>,
    shared: Arc<LinkShared>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) {
    info!("MQTT event loop started");

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!("ConnAck received: {:?}", ack.code);
                shared.transition(ConnectionState::Connected);
                for topic in &subscriptions {
                    match client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                        Ok(()) => debug!("Subscribed to {}", topic),
                        Err(e) => warn!("Failed to subscribe to {}: {}", topic, e),
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                shared.record_received();
                let message = MqttMessage::from_topic(publish.topic.clone(), publish.payload.to_vec());
                if inbound_tx.send(message).await.is_err() {
                    info!("Inbound consumer dropped, stopping MQTT event loop");
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("DISCONNECT sent, stopping MQTT event loop");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT connection error: {}", e);
                shared.record_error(e.to_string());
                shared.transition(ConnectionState::Error);

                // Drop the link instead of leaving it half open; the next
                // poll reconnects.
                eventloop.clean();
                shared.transition(ConnectionState::Disconnected);

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
                shared.transition(ConnectionState::Reconnecting);
            }
        }
    }

    shared.transition(ConnectionState::Disconnected);
    info!("MQTT event loop finished");
}
