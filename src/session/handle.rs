use super::control::{ControlSession, SessionInputs, SessionRequest};
use super::error::SessionError;
use super::intent::Intent;
use super::view::{Operator, SessionView};
use crate::config::AppConfig;
use crate::mqtt::{ConnectionState, MqttMessage, Publisher};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const REQUEST_CAPACITY: usize = 32;

/// Handle for a control session running in its own tokio task
///
/// Dropping the handle stops the session.
pub struct SessionHandle {
    requests: mpsc::Sender<SessionRequest>,
    view_rx: watch::Receiver<SessionView>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Creates the session, activates it and spawns its loop
    pub fn spawn(
        config: &AppConfig,
        publisher: Arc<dyn Publisher>,
        inbound: mpsc::Receiver<MqttMessage>,
        connection: watch::Receiver<ConnectionState>,
    ) -> Result<Self, SessionError> {
        let session = ControlSession::create(config, publisher)?;
        let view_rx = session.subscribe_view();

        let (requests, request_rx) = mpsc::channel(REQUEST_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let inputs = SessionInputs {
            inbound,
            requests: request_rx,
            connection,
        };

        let task_handle = tokio::spawn(async move {
            debug!("Starting control session task");
            let active = session.activate();
            let disposing = active.run_until_shutdown(inputs, shutdown_rx).await;
            disposing.shutdown();
        });

        info!("Control session spawned");
        Ok(Self {
            requests,
            view_rx,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        })
    }

    pub async fn send(&self, intent: Intent) -> Result<(), SessionError> {
        self.request(SessionRequest::Intent(intent)).await
    }

    pub async fn set_operator(&self, operator: Option<Operator>) -> Result<(), SessionError> {
        self.request(SessionRequest::SetOperator(operator)).await
    }

    async fn request(&self, request: SessionRequest) -> Result<(), SessionError> {
        self.requests.send(request).await.map_err(|_| {
            error!("Control session is no longer running");
            SessionError::ChannelClosed
        })
    }

    pub fn view(&self) -> SessionView {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_rx.clone()
    }

    /// Stops the session loop, cancels its timers and waits for the task
    pub async fn dispose(&mut self) -> Result<(), SessionError> {
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                warn!("Control session task already terminated");
            }
        }

        match self.task_handle.take() {
            Some(handle) => handle.await.map_err(|e| {
                error!("Control session task failed: {}", e);
                SessionError::Task(e.to_string())
            }),
            None => {
                debug!("Control session already disposed");
                Ok(())
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
