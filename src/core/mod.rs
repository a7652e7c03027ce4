//! Core types shared by every layer of the bridge.
//!
//! - [`constants`]: protocol constants and configuration defaults
//! - [`error`]: crate-level error taxonomy
//! - [`status`]: status/log vocabulary surfaced through the application callbacks
//! - [`traits`]: the byte-stream endpoint boundary and callback signatures

pub mod constants;
pub mod error;
pub mod status;
pub mod traits;

pub use error::{ChannelError, DecodeError, Error};
pub use status::{LogSeverity, PacketStats, StatusEvent};
pub use traits::{ByteChannel, DataHandler, EventDecoder, EventHandler, LogHandler, StatusHandler};
