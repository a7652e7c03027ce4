//! Crate-level error taxonomy.
//!
//! Each layer declares its own error enum next to its implementation
//! ([`FramingError`](crate::framing::FramingError),
//! [`PacketError`](crate::link::PacketError),
//! [`LinkError`](crate::link::LinkError),
//! [`TransportError`](crate::transport::TransportError)); this module holds
//! the errors shared across layers and the top-level [`Error`] surfaced by
//! the adapter facade.

use thiserror::Error;

use crate::link::LinkError;
use crate::transport::TransportError;

/// Errors reported by a byte-stream endpoint.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Underlying device I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation requires an open channel.
    #[error("channel is not open")]
    NotOpen,

    /// The channel was already opened.
    #[error("channel is already open")]
    AlreadyOpen,

    /// Endpoint-specific failure.
    #[error("{0}")]
    Endpoint(String),
}

/// Errors from the caller-supplied domain decoder.
///
/// The transport layer only logs these and drops the offending packet;
/// they never abort the event stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload bytes do not form a valid domain structure.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Payload ended before the structure was complete.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// Payload names an event this decoder does not know.
    #[error("unknown event id: {0:#06x}")]
    UnknownEvent(u16),
}

/// Top-level errors surfaced by the [`Adapter`](crate::adapter::Adapter) facade.
#[derive(Debug, Error)]
pub enum Error {
    /// Reliable link failure (handshake, retransmission, state).
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// Transport multiplexer failure (response matching, worker lifecycle).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Byte-stream endpoint failure.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// `open` was called on an adapter that is already open.
    #[error("adapter is already open")]
    AlreadyOpen,

    /// Operation requires an open adapter.
    #[error("adapter is not open")]
    NotOpen,
}
