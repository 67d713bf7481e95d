//! Streaming transport to the assistant backend

mod client;
pub mod protocol;

pub use client::{ConnectionEvent, ConnectionState, Transport, TransportClient, TransportEvent};
pub use protocol::{InboundMessage, OutboundControlMessage, decode_inbound};

pub(crate) use client::sleep_until_opt;
