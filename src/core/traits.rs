//! The byte-stream endpoint boundary and the callback signatures used
//! throughout the stack.
//!
//! The bridge never touches a device directly; it talks to a
//! [`ByteChannel`], which is any full-duplex byte pipe that can push
//! inbound bytes to a callback from its own reader thread. The crate ships
//! a serialport-backed implementation behind the `serial` feature; tests
//! use an in-memory scripted peer.

use std::sync::Arc;

use super::error::{ChannelError, DecodeError};
use super::status::{LogSeverity, StatusEvent};

/// Inbound-data callback. Invoked from the channel's reader thread with
/// each chunk of bytes as it arrives; chunks carry no framing guarantees.
pub type DataHandler = Box<dyn FnMut(&[u8]) + Send>;

/// Status callback. May be invoked from any of the bridge's threads.
pub type StatusHandler = Arc<dyn Fn(StatusEvent, &str) + Send + Sync>;

/// Log callback. May be invoked from any of the bridge's threads.
pub type LogHandler = Arc<dyn Fn(LogSeverity, &str) + Send + Sync>;

/// Application event callback. Only ever invoked from the transport's
/// dedicated event worker thread, one event at a time, in arrival order.
pub type EventHandler<E> = Box<dyn FnMut(E) + Send>;

/// Caller-supplied domain decoder turning raw event payload bytes into a
/// decoded event structure.
pub type EventDecoder<E> = fn(&[u8]) -> Result<E, DecodeError>;

/// A full-duplex byte-stream endpoint (UART, socket, in-memory pipe).
///
/// # Requirements
///
/// - `open` MUST deliver every inbound byte, in order, to `on_data`;
///   the callback runs on a thread owned by the channel and MUST NOT be
///   invoked concurrently with itself.
/// - `send` MUST write the bytes atomically with respect to other `send`
///   calls (no interleaving of two buffers on the wire).
/// - Unrecoverable read/write failures are reported through `on_status`
///   with [`StatusEvent::IoResourcesUnavailable`].
/// - `close` MUST stop the reader thread before returning; after `close`,
///   `on_data` is not invoked again.
pub trait ByteChannel: Send {
    /// Open the endpoint and start delivering inbound bytes to `on_data`.
    fn open(
        &mut self,
        on_data: DataHandler,
        on_status: StatusHandler,
        on_log: LogHandler,
    ) -> Result<(), ChannelError>;

    /// Write one buffer to the endpoint.
    fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError>;

    /// Close the endpoint and stop its reader thread.
    fn close(&mut self) -> Result<(), ChannelError>;
}
