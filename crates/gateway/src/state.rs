use std::sync::Arc;

use {
    async_trait::async_trait,
    stickerbot_supervisor::{ConnectionSupervisor, QrPresenter, StartOutcome, SupervisorStatus},
};

/// Operator view of the session, implemented by the supervisor.
#[async_trait]
pub trait SessionControl: Send + Sync {
    async fn status(&self) -> SupervisorStatus;
    async fn restart(&self) -> StartOutcome;
}

#[async_trait]
impl SessionControl for ConnectionSupervisor {
    async fn status(&self) -> SupervisorStatus {
        ConnectionSupervisor::status(self).await
    }

    async fn restart(&self) -> StartOutcome {
        ConnectionSupervisor::restart(self).await
    }
}

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<dyn SessionControl>,
    pub qr: Arc<QrPresenter>,
}

impl AppState {
    pub fn new(session: Arc<dyn SessionControl>, qr: Arc<QrPresenter>) -> Self {
        Self { session, qr }
    }
}
