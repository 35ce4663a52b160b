//! HTTP surface of the bot: liveness for hosting platforms, the pairing QR
//! page and operator endpoints for status and restart.

pub mod server;
pub mod state;

pub use {
    server::{build_app, serve},
    state::{AppState, SessionControl},
};
