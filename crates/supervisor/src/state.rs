use serde::Serialize;

/// Lifecycle of the supervised session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Nothing started yet, or shut down.
    Idle,
    Connecting,
    Open,
    /// Closed; a retry may be scheduled.
    ClosedRecoverable,
    /// Closed for good; needs fresh pairing.
    ClosedTerminal,
}

impl ConnectionState {
    /// A session exists or is being established.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::ClosedRecoverable => "closed_recoverable",
            Self::ClosedTerminal => "closed_terminal",
        };
        f.write_str(s)
    }
}

/// Snapshot served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub max_attempts: u32,
    pub budget_exhausted: bool,
    pub pairing_pending: bool,
    pub retry_scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_close_reason: Option<String>,
}
