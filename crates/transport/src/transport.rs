use std::sync::Arc;

use {async_trait::async_trait, bytes::Bytes};

use crate::{
    Result,
    types::{Credentials, OutboundPayload, TransportEvent},
};

// ── Event sink ──────────────────────────────────────────────────────────────

/// Receives every event a transport session produces.
///
/// Implementations must be cheap: transports await `emit` in arrival order,
/// so a slow sink stalls the session's read loop.
#[async_trait]
pub trait TransportEventSink: Send + Sync {
    async fn emit(&self, event: TransportEvent);
}

// ── Capability traits ───────────────────────────────────────────────────────

/// Core transport trait. The production implementation is the WhatsApp Web
/// sidecar; tests provide in-memory fakes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport identifier (e.g. "whatsapp-web").
    fn id(&self) -> &str;

    /// Open a session with the given credentials.
    ///
    /// Empty credentials ask the transport to start a fresh pairing, which
    /// surfaces as a `ConnectionUpdate` carrying a pairing code. Every event
    /// of the session goes to `sink` until the handle is closed.
    async fn open_session(
        &self,
        credentials: Credentials,
        sink: Arc<dyn TransportEventSink>,
    ) -> Result<Arc<dyn SessionHandle>>;
}

/// Send messages through an open session.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send(&self, to: &str, payload: OutboundPayload) -> Result<()>;

    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        self.send(to, OutboundPayload::Text(text.to_string())).await
    }

    async fn send_sticker(&self, to: &str, sticker: Bytes) -> Result<()> {
        self.send(to, OutboundPayload::Sticker(sticker)).await
    }
}

/// Handle to one open transport session.
#[async_trait]
pub trait SessionHandle: Outbound {
    /// Release the session. Events emitted after this call are not expected
    /// but callers must tolerate them.
    async fn close(&self) -> Result<()>;
}
