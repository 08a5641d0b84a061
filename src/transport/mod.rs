//! Transport module - the socket side of the client.
//!
//! Owns the TCP connection, reconnects on any failure, frames inbound bytes
//! into [`Frame`](crate::protocol::Frame)s and serializes outbound writes
//! through the [`writer`](crate::writer) task. It knows nothing about
//! request semantics.

mod tcp;

pub use tcp::{ConnectionState, Transport, TransportConfig, TransportEvent};
