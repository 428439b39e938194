use super::connection::ConnectionState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Publishing is refused unless the link is up
    #[error("not connected to broker (state: {0})")]
    NotConnected(ConnectionState),

    #[error("client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("event loop task failed: {0}")]
    Task(String),
}
