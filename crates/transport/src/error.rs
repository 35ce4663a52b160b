use std::error::Error as StdError;

/// Crate-wide result type for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed transport errors shared by every transport implementation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid.
    #[error("invalid transport input: {message}")]
    InvalidInput { message: String },

    /// No session is open, or the transport is not ready.
    #[error("transport unavailable: {message}")]
    Unavailable { message: String },

    /// The remote side rejected an outbound send.
    #[error("send rejected: {message}")]
    Rejected { message: String },

    /// Wrapped source error from an external dependency.
    #[error("transport operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn rejected(message: impl std::fmt::Display) -> Self {
        Self::Rejected {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
