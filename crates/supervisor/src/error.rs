use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("credential store: {context}: {source}")]
    Auth {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("credential store: malformed credentials: {0}")]
    MalformedCredentials(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] stickerbot_transport::Error),

    #[error(transparent)]
    Media(#[from] stickerbot_media::Error),

    #[error("failed to render pairing code: {message}")]
    Qr { message: String },
}

impl Error {
    #[must_use]
    pub fn auth(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Auth {
            context: context.into(),
            source,
        }
    }

    #[must_use]
    pub fn qr(message: impl std::fmt::Display) -> Self {
        Self::Qr {
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
