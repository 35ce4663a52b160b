//! Session lifecycle for the sticker bot.
//!
//! [`ConnectionSupervisor`] owns the single transport session: it persists
//! rotated credentials, publishes pairing codes, classifies closes and
//! schedules reconnects. Inbound messages go to a [`MessageRouter`], which
//! answers text commands and turns images and videos into stickers.

pub mod auth_store;
pub mod error;
pub mod policy;
pub mod qr;
pub mod router;
pub mod state;
pub mod supervisor;

pub use {
    auth_store::{AuthStateStore, FileAuthStore},
    error::{Error, Result},
    policy::ReconnectPolicy,
    qr::{PairingImage, QrPresenter},
    router::{MessageRouter, RouteOutcome},
    state::{ConnectionState, SupervisorStatus},
    supervisor::{ConnectionSupervisor, InboundHandler, SessionOutbound, StartOutcome},
};
