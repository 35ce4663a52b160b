use {
    bytes::Bytes,
    serde::{Deserialize, Serialize},
};

// ── Credentials ─────────────────────────────────────────────────────────────

/// Opaque session credentials.
///
/// Only the transport understands the contents; everything else stores and
/// forwards the document untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(serde_json::Value);

impl Credentials {
    /// Credential set for a first run (triggers pairing).
    #[must_use]
    pub fn empty() -> Self {
        Self(serde_json::Value::Null)
    }

    #[must_use]
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

// ── Connection updates ──────────────────────────────────────────────────────

/// Link state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Connecting,
    Open,
    Closed,
}

/// Why a session closed.
///
/// Numeric codes follow the WhatsApp Web disconnect status codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The device was unlinked; stored credentials are dead.
    LoggedOut,
    /// The server rejected our protocol version or device type.
    VersionMismatch,
    ConnectionClosed,
    ConnectionLost,
    Replaced,
    BadSession,
    RestartRequired,
    ServiceUnavailable,
    /// Any other close, kept for logging.
    Other {
        code: Option<u16>,
        message: Option<String>,
    },
}

impl CloseReason {
    pub fn from_status_code(code: u16) -> Self {
        match code {
            401 => Self::LoggedOut,
            405 | 411 => Self::VersionMismatch,
            408 => Self::ConnectionLost,
            428 => Self::ConnectionClosed,
            440 => Self::Replaced,
            500 => Self::BadSession,
            503 => Self::ServiceUnavailable,
            515 => Self::RestartRequired,
            other => Self::Other {
                code: Some(other),
                message: None,
            },
        }
    }

    /// Parse a symbolic reason as sent by the sidecar.
    pub fn from_symbol(symbol: &str) -> Self {
        match symbol.to_ascii_lowercase().as_str() {
            "logged_out" | "loggedout" | "logout" => Self::LoggedOut,
            "version_mismatch" | "multidevice_mismatch" => Self::VersionMismatch,
            "connection_closed" => Self::ConnectionClosed,
            "connection_lost" | "timed_out" => Self::ConnectionLost,
            "connection_replaced" | "replaced" => Self::Replaced,
            "bad_session" => Self::BadSession,
            "restart_required" => Self::RestartRequired,
            "unavailable_service" | "service_unavailable" => Self::ServiceUnavailable,
            _ => Self::Other {
                code: None,
                message: Some(symbol.to_string()),
            },
        }
    }

    /// Terminal closes need a fresh pairing; every other close may retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut | Self::VersionMismatch)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged out"),
            Self::VersionMismatch => f.write_str("protocol version rejected"),
            Self::ConnectionClosed => f.write_str("connection closed"),
            Self::ConnectionLost => f.write_str("connection lost"),
            Self::Replaced => f.write_str("connection replaced"),
            Self::BadSession => f.write_str("bad session"),
            Self::RestartRequired => f.write_str("restart required"),
            Self::ServiceUnavailable => f.write_str("service unavailable"),
            Self::Other { code, message } => match (code, message) {
                (Some(code), Some(msg)) => write!(f, "{msg} ({code})"),
                (Some(code), None) => write!(f, "status {code}"),
                (None, Some(msg)) => f.write_str(msg),
                (None, None) => f.write_str("unknown"),
            },
        }
    }
}

/// A connection-state change, possibly carrying a fresh pairing code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionUpdate {
    pub pairing_code: Option<String>,
    pub state: Option<LinkState>,
    pub close_reason: Option<CloseReason>,
}

impl ConnectionUpdate {
    pub fn pairing(code: impl Into<String>) -> Self {
        Self {
            pairing_code: Some(code.into()),
            state: Some(LinkState::Connecting),
            close_reason: None,
        }
    }

    pub fn open() -> Self {
        Self {
            state: Some(LinkState::Open),
            ..Self::default()
        }
    }

    pub fn closed(reason: CloseReason) -> Self {
        Self {
            pairing_code: None,
            state: Some(LinkState::Closed),
            close_reason: Some(reason),
        }
    }
}

// ── Messages ────────────────────────────────────────────────────────────────

/// Inbound payload, classified by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Image(Bytes),
    Video(Bytes),
    /// Stickers, audio, documents, reactions, protocol messages...
    Unsupported { kind: String },
}

/// A message received on the session.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    /// Chat to reply to.
    pub chat: String,
    /// Participant that wrote the message (group chats).
    pub sender: Option<String>,
    pub from_me: bool,
    pub payload: Payload,
}

/// Outbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPayload {
    Text(String),
    /// Encoded WebP sticker.
    Sticker(Bytes),
}

/// Everything a transport session emits.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    CredentialsUpdate(Credentials),
    ConnectionUpdate(ConnectionUpdate),
    Message(InboundMessage),
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(401, true)]
    #[case(405, true)]
    #[case(411, true)]
    #[case(408, false)]
    #[case(428, false)]
    #[case(440, false)]
    #[case(500, false)]
    #[case(503, false)]
    #[case(515, false)]
    #[case(999, false)]
    fn status_code_terminality(#[case] code: u16, #[case] terminal: bool) {
        assert_eq!(CloseReason::from_status_code(code).is_terminal(), terminal);
    }

    #[rstest]
    #[case("logged_out", CloseReason::LoggedOut)]
    #[case("LOGGED_OUT", CloseReason::LoggedOut)]
    #[case("version_mismatch", CloseReason::VersionMismatch)]
    #[case("restart_required", CloseReason::RestartRequired)]
    fn symbolic_reasons(#[case] symbol: &str, #[case] expected: CloseReason) {
        assert_eq!(CloseReason::from_symbol(symbol), expected);
    }

    #[test]
    fn unknown_symbol_is_recoverable() {
        let reason = CloseReason::from_symbol("stream errored");
        assert!(!reason.is_terminal());
        assert_eq!(reason.to_string(), "stream errored");
    }

    #[test]
    fn empty_credentials() {
        assert!(Credentials::empty().is_empty());
        assert!(Credentials::new(serde_json::json!({})).is_empty());
        assert!(!Credentials::new(serde_json::json!({"me": {"id": "1"}})).is_empty());
    }

    #[test]
    fn credentials_serialize_transparently() {
        let creds = Credentials::new(serde_json::json!({"noiseKey": "abc"}));
        let json = serde_json::to_string(&creds).unwrap_or_default();
        assert_eq!(json, r#"{"noiseKey":"abc"}"#);
    }
}
