use crate::router::RouterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to initialize session: {0}")]
    Initialization(String),

    #[error("topic routing setup failed: {0}")]
    Routing(#[from] RouterError),

    #[error("unrecognized intent: {0:?}")]
    InvalidIntent(String),

    #[error("session channel closed")]
    ChannelClosed,

    #[error("session task failed: {0}")]
    Task(String),
}
