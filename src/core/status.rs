//! Status and log vocabulary surfaced through the application callbacks.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Out-of-band conditions reported through the status callback.
///
/// These complement the error returns: an [`Error`](crate::core::Error)
/// tells the caller of `send`/`open` what failed, while a `StatusEvent`
/// informs the application about link conditions regardless of which
/// thread observed them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// A reliable packet was sent the maximum number of times without an
    /// acknowledgement.
    MaxRetriesReached,
    /// A packet arrived that made no sense in the current link state.
    UnexpectedPacket,
    /// A domain structure could not be encoded for transmission.
    EncodeError,
    /// An inbound packet could not be decoded.
    DecodeError,
    /// Writing to the byte-stream endpoint failed.
    SendError,
    /// The byte-stream endpoint became unavailable.
    IoResourcesUnavailable,
    /// The peer was reset as part of link establishment.
    ResetPerformed,
    /// The link handshake completed; the connection is active.
    ConnectionActive,
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MaxRetriesReached => "max retries reached",
            Self::UnexpectedPacket => "unexpected packet",
            Self::EncodeError => "encode error",
            Self::DecodeError => "decode error",
            Self::SendError => "send error",
            Self::IoResourcesUnavailable => "i/o resources unavailable",
            Self::ResetPerformed => "reset performed",
            Self::ConnectionActive => "connection active",
        };
        f.write_str(name)
    }
}

/// Severity attached to messages delivered through the log callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogSeverity {
    /// Per-packet tracing.
    Trace,
    /// State transitions and packet summaries.
    Debug,
    /// Notable but expected conditions.
    Info,
    /// Recoverable protocol violations.
    Warning,
    /// Failures surfaced to the caller.
    Error,
    /// Unrecoverable conditions.
    Fatal,
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Packet counters kept by the link layer.
///
/// Shared between the link threads and callers; reads are relaxed since the
/// counters are diagnostic only.
#[derive(Debug, Default)]
pub struct PacketCounters {
    incoming: AtomicU32,
    outgoing: AtomicU32,
    errors: AtomicU32,
}

impl PacketCounters {
    /// Record one inbound packet.
    pub fn count_incoming(&self) -> u32 {
        self.incoming.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record one outbound packet.
    pub fn count_outgoing(&self) -> u32 {
        self.outgoing.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record one malformed packet.
    pub fn count_error(&self) -> u32 {
        self.errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Snapshot the counters.
    pub fn snapshot(&self) -> PacketStats {
        PacketStats {
            incoming: self.incoming.load(Ordering::Relaxed),
            outgoing: self.outgoing.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the link packet counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketStats {
    /// Packets received and decoded.
    pub incoming: u32,
    /// Packets written to the byte stream.
    pub outgoing: u32,
    /// Packets discarded as malformed.
    pub errors: u32,
}
