//! JSON frames exchanged with the Baileys sidecar.
//!
//! Every frame is a JSON object with a `type` discriminator. Binary media
//! travels base64-encoded.

use {
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    bytes::Bytes,
    serde::{Deserialize, Serialize},
    stickerbot_transport::{
        CloseReason, ConnectionUpdate, Credentials, InboundMessage, OutboundPayload, Payload,
        TransportEvent,
    },
    tracing::warn,
};

// ── Gateway → sidecar ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    /// Start a Baileys socket. Empty credentials start a fresh pairing.
    Open {
        credentials: serde_json::Value,
        browser: [String; 3],
    },
    Send {
        request_id: String,
        to: String,
        payload: SendPayload,
    },
    /// End the Baileys socket without logging out.
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SendPayload {
    Text { text: String },
    Sticker { data: String },
}

impl From<OutboundPayload> for SendPayload {
    fn from(payload: OutboundPayload) -> Self {
        match payload {
            OutboundPayload::Text(text) => Self::Text { text },
            OutboundPayload::Sticker(bytes) => Self::Sticker {
                data: BASE64.encode(&bytes),
            },
        }
    }
}

// ── Sidecar → gateway ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Qr {
        qr: String,
    },
    Open {
        #[serde(default)]
        jid: Option<String>,
    },
    Closed {
        #[serde(default)]
        status_code: Option<u16>,
        #[serde(default)]
        reason: Option<String>,
    },
    CredsUpdate {
        credentials: serde_json::Value,
    },
    Message(WireMessage),
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

/// An inbound WhatsApp message as flattened by the sidecar.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub chat: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    /// `text`, `image`, `video`, or whatever else Baileys reported.
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    /// Base64 media, present for `image` and `video`.
    #[serde(default)]
    pub data: Option<String>,
}

impl WireMessage {
    fn into_inbound(self) -> InboundMessage {
        let payload = match self.kind.as_str() {
            "text" => Payload::Text(self.text.unwrap_or_default()),
            "image" | "video" => match decode_media(self.data.as_deref()) {
                Some(bytes) if self.kind == "image" => Payload::Image(bytes),
                Some(bytes) => Payload::Video(bytes),
                None => {
                    warn!(id = %self.id, kind = %self.kind, "media message without usable data");
                    Payload::Unsupported { kind: self.kind }
                },
            },
            _ => Payload::Unsupported { kind: self.kind },
        };
        InboundMessage {
            id: self.id,
            chat: self.chat,
            sender: self.sender,
            from_me: self.from_me,
            payload,
        }
    }
}

fn decode_media(data: Option<&str>) -> Option<Bytes> {
    let bytes = BASE64.decode(data?).ok()?;
    (!bytes.is_empty()).then(|| Bytes::from(bytes))
}

/// Close reason from the sidecar's numeric code and/or symbolic reason.
pub fn close_reason(status_code: Option<u16>, reason: Option<String>) -> CloseReason {
    match (status_code, reason) {
        (Some(code), reason) => match CloseReason::from_status_code(code) {
            CloseReason::Other { code, message: None } => CloseReason::Other {
                code,
                message: reason,
            },
            known => known,
        },
        (None, Some(reason)) => CloseReason::from_symbol(&reason),
        (None, None) => CloseReason::Other {
            code: None,
            message: None,
        },
    }
}

impl SidecarMessage {
    /// The transport event this frame carries, if any. Send results and
    /// errors are handled by the connection itself.
    pub fn into_event(self) -> Option<TransportEvent> {
        match self {
            Self::Qr { qr } => Some(TransportEvent::ConnectionUpdate(ConnectionUpdate::pairing(
                qr,
            ))),
            Self::Open { .. } => Some(TransportEvent::ConnectionUpdate(ConnectionUpdate::open())),
            Self::Closed {
                status_code,
                reason,
            } => Some(TransportEvent::ConnectionUpdate(ConnectionUpdate::closed(
                close_reason(status_code, reason),
            ))),
            Self::CredsUpdate { credentials } => Some(TransportEvent::CredentialsUpdate(
                Credentials::new(credentials),
            )),
            Self::Message(message) => Some(TransportEvent::Message(message.into_inbound())),
            Self::SendResult { .. } | Self::Error { .. } => None,
        }
    }
}
