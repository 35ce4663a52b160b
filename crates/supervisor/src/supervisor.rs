//! Session supervisor: one transport session, reconnected on recoverable
//! closes within a bounded budget.
//!
//! Every session gets a generation number. Events are tagged with the
//! generation of the session that produced them and anything from an older
//! generation is dropped, so a released session can never move the state
//! machine. Retries are scheduled on a timer task that posts back into the
//! event loop instead of re-entering `start` from a close handler.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    stickerbot_transport::{
        CloseReason, ConnectionUpdate, InboundMessage, LinkState, Outbound, OutboundPayload,
        SessionHandle, Transport, TransportEvent, TransportEventSink,
    },
    tokio::sync::{Mutex, RwLock, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    auth_store::AuthStateStore,
    error::Result,
    policy::ReconnectPolicy,
    qr::QrPresenter,
    state::{ConnectionState, SupervisorStatus},
};

type ActiveSession = Arc<RwLock<Option<Arc<dyn SessionHandle>>>>;

/// Consumes inbound messages of the open session.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage);
}

/// Result of a [`ConnectionSupervisor::start`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A session is already connecting or open; nothing was done.
    AlreadyActive,
    ShuttingDown,
}

enum SupervisorEvent {
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    RetryDue,
}

/// Event sink handed to one session; tags everything with its generation.
struct GenerationSink {
    generation: u64,
    tx: mpsc::UnboundedSender<SupervisorEvent>,
}

#[async_trait]
impl TransportEventSink for GenerationSink {
    async fn emit(&self, event: TransportEvent) {
        let generation = self.generation;
        if self
            .tx
            .send(SupervisorEvent::Transport { generation, event })
            .is_err()
        {
            debug!(generation, "supervisor stopped, dropping transport event");
        }
    }
}

#[derive(Debug)]
struct Slot {
    state: ConnectionState,
    generation: u64,
    reconnect_attempts: u32,
    budget_exhausted: bool,
    retry: Option<CancellationToken>,
    last_close_reason: Option<String>,
}

impl Slot {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    fn accepts(&self, generation: u64) -> bool {
        self.is_current(generation) && self.state.is_active()
    }

    fn cancel_retry(&mut self) {
        if let Some(token) = self.retry.take() {
            token.cancel();
        }
    }
}

pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthStateStore>,
    qr: Arc<QrPresenter>,
    policy: ReconnectPolicy,
    slot: Mutex<Slot>,
    active: ActiveSession,
    events_tx: mpsc::UnboundedSender<SupervisorEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SupervisorEvent>>>,
    shutdown: CancellationToken,
}

impl ConnectionSupervisor {
    pub fn new(
        transport: Arc<dyn Transport>,
        auth: Arc<dyn AuthStateStore>,
        qr: Arc<QrPresenter>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            auth,
            qr,
            policy,
            slot: Mutex::new(Slot {
                state: ConnectionState::Idle,
                generation: 0,
                reconnect_attempts: 0,
                budget_exhausted: false,
                retry: None,
                last_close_reason: None,
            }),
            active: Arc::new(RwLock::new(None)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn qr(&self) -> &Arc<QrPresenter> {
        &self.qr
    }

    /// Sends through whichever session is currently attached.
    pub fn outbound(&self) -> Arc<dyn Outbound> {
        Arc::new(SessionOutbound {
            active: Arc::clone(&self.active),
        })
    }

    /// Open a session unless one is already connecting or open.
    ///
    /// Cancels any pending retry. A failure to open counts as a recoverable
    /// close and goes through the normal retry path.
    pub async fn start(&self) -> StartOutcome {
        let (generation, attempt) = {
            let mut slot = self.slot.lock().await;
            if self.shutdown.is_cancelled() {
                return StartOutcome::ShuttingDown;
            }
            if slot.state.is_active() {
                debug!(state = %slot.state, "session already active, start ignored");
                return StartOutcome::AlreadyActive;
            }
            slot.cancel_retry();
            slot.generation += 1;
            slot.state = ConnectionState::Connecting;
            slot.budget_exhausted = false;
            (slot.generation, slot.reconnect_attempts)
        };

        info!(
            generation,
            attempt,
            transport = self.transport.id(),
            "starting session"
        );
        match self.open(generation).await {
            Ok(handle) => self.attach(generation, handle).await,
            Err(e) => {
                warn!(generation, error = %e, "failed to open session");
                let reason = CloseReason::Other {
                    code: None,
                    message: Some(format!("open failed: {e}")),
                };
                self.handle_close(generation, reason).await;
            },
        }
        StartOutcome::Started
    }

    /// Reset the retry budget and start again. No-op while a session is
    /// connecting or open.
    pub async fn restart(&self) -> StartOutcome {
        {
            let mut slot = self.slot.lock().await;
            if slot.state.is_active() {
                info!(state = %slot.state, "restart ignored, session already active");
                return StartOutcome::AlreadyActive;
            }
            slot.cancel_retry();
            slot.reconnect_attempts = 0;
            slot.budget_exhausted = false;
        }
        info!("session restart requested");
        self.start().await
    }

    /// Stop retrying and release the session. `start` is refused afterwards.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = {
            let mut slot = self.slot.lock().await;
            slot.cancel_retry();
            slot.generation += 1;
            slot.state = ConnectionState::Idle;
            self.active.write().await.take()
        };
        self.qr.clear();
        release(handle).await;
        info!("supervisor shut down");
    }

    pub async fn status(&self) -> SupervisorStatus {
        let slot = self.slot.lock().await;
        SupervisorStatus {
            state: slot.state,
            reconnect_attempts: slot.reconnect_attempts,
            max_attempts: self.policy.max_attempts,
            budget_exhausted: slot.budget_exhausted,
            pairing_pending: self.qr.is_pending(),
            retry_scheduled: slot.retry.as_ref().is_some_and(|t| !t.is_cancelled()),
            last_close_reason: slot.last_close_reason.clone(),
        }
    }

    /// Process session events until shutdown. Inbound messages are handed
    /// to `handler` on their own tasks so a slow conversion never blocks
    /// connection handling.
    pub async fn run(self: Arc<Self>, handler: Arc<dyn InboundHandler>) {
        let Some(mut rx) = self.events_rx.lock().await.take() else {
            warn!("supervisor event loop already running");
            return;
        };

        loop {
            let event = tokio::select! {
                () = self.shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                SupervisorEvent::Transport { generation, event } => {
                    self.handle_event(generation, event, &handler).await;
                },
                SupervisorEvent::RetryDue => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        this.start().await;
                    });
                },
            }
        }
        info!("supervisor event loop stopped");
    }

    async fn open(&self, generation: u64) -> Result<Arc<dyn SessionHandle>> {
        let credentials = self.auth.load().await?;
        let sink = Arc::new(GenerationSink {
            generation,
            tx: self.events_tx.clone(),
        });
        Ok(self.transport.open_session(credentials, sink).await?)
    }

    async fn attach(&self, generation: u64, handle: Arc<dyn SessionHandle>) {
        let attached = {
            let slot = self.slot.lock().await;
            if slot.accepts(generation) {
                *self.active.write().await = Some(Arc::clone(&handle));
                true
            } else {
                false
            }
        };
        if !attached {
            debug!(generation, "session superseded while opening, releasing it");
            release(Some(handle)).await;
        }
    }

    async fn handle_event(
        &self,
        generation: u64,
        event: TransportEvent,
        handler: &Arc<dyn InboundHandler>,
    ) {
        // Credentials may still rotate after the close frame; persist them as
        // long as no newer session has started.
        let slot = self.slot.lock().await;
        let wanted = match &event {
            TransportEvent::CredentialsUpdate(_) => slot.is_current(generation),
            _ => slot.accepts(generation),
        };
        drop(slot);
        if !wanted {
            debug!(generation, "ignoring event from released session");
            return;
        }

        match event {
            TransportEvent::CredentialsUpdate(credentials) => {
                if let Err(e) = self.auth.save(&credentials).await {
                    error!(error = %e, "failed to persist credentials");
                }
            },
            TransportEvent::ConnectionUpdate(update) => {
                self.handle_update(generation, update).await;
            },
            TransportEvent::Message(message) => {
                let handler = Arc::clone(handler);
                tokio::spawn(async move {
                    handler.handle(message).await;
                });
            },
        }
    }

    async fn handle_update(&self, generation: u64, update: ConnectionUpdate) {
        if let Some(code) = update.pairing_code.as_deref() {
            let connecting = self.slot.lock().await.state == ConnectionState::Connecting;
            if !connecting {
                debug!(generation, "pairing code outside connecting state ignored");
            } else if let Err(e) = self.qr.publish(code) {
                warn!(error = %e, "failed to publish pairing code");
            }
        }

        match update.state {
            Some(LinkState::Open) => self.mark_open(generation).await,
            Some(LinkState::Closed) => {
                let reason = update.close_reason.unwrap_or(CloseReason::Other {
                    code: None,
                    message: None,
                });
                self.handle_close(generation, reason).await;
            },
            Some(LinkState::Connecting) | None => {},
        }
    }

    async fn mark_open(&self, generation: u64) {
        {
            let mut slot = self.slot.lock().await;
            if !slot.accepts(generation) {
                return;
            }
            slot.state = ConnectionState::Open;
            slot.reconnect_attempts = 0;
            slot.budget_exhausted = false;
            slot.last_close_reason = None;
            slot.cancel_retry();
        }
        self.qr.clear();
        info!(generation, "session open");
    }

    async fn handle_close(&self, generation: u64, reason: CloseReason) {
        let handle = {
            let mut slot = self.slot.lock().await;
            if !slot.accepts(generation) {
                return;
            }
            slot.last_close_reason = Some(reason.to_string());

            if reason.is_terminal() {
                slot.state = ConnectionState::ClosedTerminal;
                error!(
                    %reason,
                    "session closed permanently; clear credentials with `stickerbot reset-auth` and pair again"
                );
            } else if self.policy.allows(slot.reconnect_attempts) {
                slot.state = ConnectionState::ClosedRecoverable;
                slot.reconnect_attempts += 1;
                let attempt = slot.reconnect_attempts;
                let delay = self.policy.delay_for(attempt);
                slot.retry = Some(self.schedule_retry(delay));
                warn!(
                    %reason,
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "session closed, reconnect scheduled"
                );
            } else {
                slot.state = ConnectionState::ClosedRecoverable;
                slot.budget_exhausted = true;
                error!(
                    %reason,
                    attempts = slot.reconnect_attempts,
                    "reconnect budget exhausted; session stays down until restarted"
                );
            }
            self.active.write().await.take()
        };
        self.qr.clear();
        release(handle).await;
    }

    fn schedule_retry(&self, delay: Duration) -> CancellationToken {
        let token = self.shutdown.child_token();
        let cancelled = token.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => debug!("reconnect timer cancelled"),
                () = tokio::time::sleep(delay) => {
                    if tx.send(SupervisorEvent::RetryDue).is_err() {
                        debug!("supervisor stopped, reconnect dropped");
                    }
                },
            }
        });
        token
    }
}

async fn release(handle: Option<Arc<dyn SessionHandle>>) {
    if let Some(handle) = handle
        && let Err(e) = handle.close().await
    {
        debug!(error = %e, "error while releasing session");
    }
}

/// [`Outbound`] over the supervisor's current session.
pub struct SessionOutbound {
    active: ActiveSession,
}

#[async_trait]
impl Outbound for SessionOutbound {
    async fn send(&self, to: &str, payload: OutboundPayload) -> stickerbot_transport::Result<()> {
        let handle = self.active.read().await.clone().ok_or_else(|| {
            stickerbot_transport::Error::unavailable("no open WhatsApp session")
        })?;
        handle.send(to, payload).await
    }
}
