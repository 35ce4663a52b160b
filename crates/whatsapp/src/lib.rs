//! WhatsApp Web transport.
//!
//! The WhatsApp Web protocol runs in a Node.js Baileys sidecar. This crate
//! spawns the sidecar, talks to it over a local WebSocket with a small JSON
//! protocol and exposes it as a [`stickerbot_transport::Transport`].

pub mod process;
pub mod protocol;
pub mod sidecar;
pub mod transport;

pub use {
    process::{SidecarConfig, SidecarProcess, find_sidecar_dir, start_sidecar},
    protocol::{GatewayMessage, SendPayload, SidecarMessage},
    transport::{WhatsAppSession, WhatsAppTransport},
};

/// Port the sidecar listens on unless configured otherwise.
pub const DEFAULT_SIDECAR_PORT: u16 = 3481;
