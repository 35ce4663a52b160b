//! Chat transport capability.
//!
//! A transport opens one logical session from stored credentials, pushes
//! connection, credential and inbound-message events into a sink, and accepts
//! outbound sends through the returned session handle. The wire protocol
//! itself lives behind the [`Transport`] trait.

pub mod error;
pub mod transport;
pub mod types;

pub use {
    error::{Error, Result},
    transport::{Outbound, SessionHandle, Transport, TransportEventSink},
    types::{
        CloseReason, ConnectionUpdate, Credentials, InboundMessage, LinkState, OutboundPayload,
        Payload, TransportEvent,
    },
};
