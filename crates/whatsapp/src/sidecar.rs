//! WebSocket connection to the sidecar.
//!
//! One connection carries one WhatsApp session. A background task owns the
//! socket: it writes queued frames, resolves pending sends from
//! `send_result` frames and forwards everything else to the session's event
//! sink. If the socket drops while the session is still wanted, the sink sees
//! a `connection_lost` close so the supervisor can reconnect.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use {
    futures::{SinkExt, StreamExt},
    stickerbot_transport::{
        CloseReason, ConnectionUpdate, Error, Result, TransportEvent, TransportEventSink,
    },
    tokio::sync::{mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::protocol::{GatewayMessage, SidecarMessage};

/// Outcome of one `send` frame as reported by the sidecar.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub success: bool,
    pub error: Option<String>,
}

type PendingSends = Arc<Mutex<HashMap<String, oneshot::Sender<SendOutcome>>>>;

pub struct SidecarConnection {
    write_tx: mpsc::UnboundedSender<String>,
    pending: PendingSends,
    cancel: CancellationToken,
}

impl SidecarConnection {
    /// Connect to `url` and start the socket task.
    pub async fn connect(url: &str, sink: Arc<dyn TransportEventSink>) -> Result<Self> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| Error::external(format!("connect to sidecar at {url}"), e))?;
        debug!(url, "connected to WhatsApp sidecar");

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let pending: PendingSends = Arc::default();
        let cancel = CancellationToken::new();
        tokio::spawn(socket_loop(
            ws,
            write_rx,
            Arc::clone(&pending),
            sink,
            cancel.clone(),
        ));

        Ok(Self {
            write_tx,
            pending,
            cancel,
        })
    }

    /// Queue a frame for the socket task.
    pub fn send_frame(&self, frame: &GatewayMessage) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        self.write_tx
            .send(text)
            .map_err(|_| Error::unavailable("sidecar connection closed"))
    }

    /// Register interest in the `send_result` for `request_id`.
    pub fn expect_result(&self, request_id: &str) -> oneshot::Receiver<SendOutcome> {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id.to_string(), tx);
        rx
    }

    pub fn forget(&self, request_id: &str) {
        lock(&self.pending).remove(request_id);
    }

    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled() && !self.write_tx.is_closed()
    }

    /// Stop the socket task without reporting a close to the sink.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SidecarConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connect, retrying while the sidecar is still starting up.
pub async fn connect_with_retry(
    url: &str,
    sink: Arc<dyn TransportEventSink>,
    attempts: u32,
) -> Result<SidecarConnection> {
    let mut attempt = 1;
    loop {
        match SidecarConnection::connect(url, Arc::clone(&sink)).await {
            Ok(conn) => return Ok(conn),
            Err(e) if attempt < attempts => {
                let delay = Duration::from_millis(500) * attempt;
                debug!(attempt, error = %e, "sidecar not reachable yet, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}

async fn socket_loop<S>(
    ws: S,
    mut write_rx: mpsc::UnboundedReceiver<String>,
    pending: PendingSends,
    sink: Arc<dyn TransportEventSink>,
    cancel: CancellationToken,
) where
    S: futures::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut writer, mut reader) = ws.split();

    let lost = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                // Flush frames queued before the cancel, such as `close`.
                while let Ok(text) = write_rx.try_recv() {
                    if writer.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                if let Err(e) = writer.send(Message::Close(None)).await {
                    debug!(error = %e, "failed to close sidecar socket");
                }
                break false;
            },
            Some(text) = write_rx.recv() => {
                if let Err(e) = writer.send(Message::Text(text.into())).await {
                    warn!(error = %e, "failed to write to sidecar");
                    break true;
                }
            },
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch(text.as_str(), &pending, &sink).await,
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = writer.send(Message::Pong(data)).await {
                        warn!(error = %e, "failed to answer sidecar ping");
                        break true;
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("sidecar closed the connection");
                    break true;
                },
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    warn!(error = %e, "sidecar connection error");
                    break true;
                },
            },
        }
    };

    // Pending senders are dropped here; their callers see the connection as
    // gone.
    lock(&pending).clear();

    if lost && !cancel.is_cancelled() {
        cancel.cancel();
        sink.emit(TransportEvent::ConnectionUpdate(ConnectionUpdate::closed(
            CloseReason::ConnectionLost,
        )))
        .await;
    }
}

async fn dispatch(text: &str, pending: &PendingSends, sink: &Arc<dyn TransportEventSink>) {
    let message: SidecarMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "unparseable frame from sidecar");
            return;
        },
    };

    match message {
        SidecarMessage::SendResult {
            request_id,
            success,
            error,
        } => match lock(pending).remove(&request_id) {
            Some(tx) => {
                // The caller may have timed out already.
                let _ = tx.send(SendOutcome { success, error });
            },
            None => debug!(request_id, "send result for unknown request"),
        },
        SidecarMessage::Error { message } => warn!(%message, "sidecar reported an error"),
        other => {
            if let Some(event) = other.into_event() {
                sink.emit(event).await;
            }
        },
    }
}
