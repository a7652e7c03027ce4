//! # SDRPC
//!
//! Host-side RPC bridge for serialized **SoftDevice** APIs over a serial
//! link. The crate turns a raw byte stream (typically a UART) into a
//! reliable command/response/event channel:
//!
//! - **Framing**: SLIP byte stuffing with unambiguous frame boundaries
//! - **Link layer**: stop-and-wait ARQ with sequence numbers, timed
//!   retransmission and a SYNC/CONFIG link-establishment handshake
//! - **Transport**: one-command-in-flight request/response matching plus a
//!   dedicated worker that drains asynchronous event packets
//! - **Adapter**: a single `open`/`close`/`send` facade per physical
//!   connection
//!
//! Domain payloads (BLE command and event structures) are opaque to this
//! crate; callers supply the encode/decode functions at the boundary.
//!
//! ## Feature Flags
//!
//! - `serial` (default): serialport-backed physical layer
//!
//! ## Example
//!
//! ```no_run
//! use sdrpc::adapter::Adapter;
//! use sdrpc::link::LinkLayerConfig;
//! use sdrpc::serial::{SerialChannel, SerialSettings};
//! use sdrpc::transport::TransportConfig;
//! use std::sync::Arc;
//!
//! // Events are decoded by a caller-supplied function; here they are kept raw.
//! fn decode_event(raw: &[u8]) -> Result<Vec<u8>, sdrpc::core::DecodeError> {
//!     Ok(raw.to_vec())
//! }
//!
//! let settings = SerialSettings::new("/dev/ttyACM0", 1_000_000);
//! let channel = SerialChannel::new(settings);
//! let adapter = Adapter::new(
//!     Box::new(channel),
//!     LinkLayerConfig::default(),
//!     TransportConfig::default(),
//!     decode_event,
//! );
//!
//! adapter.open(
//!     Arc::new(|status, message| eprintln!("status {status}: {message}")),
//!     Box::new(|event: Vec<u8>| println!("event: {event:02x?}")),
//!     Arc::new(|severity, message| eprintln!("[{severity}] {message}")),
//! )?;
//!
//! let response = adapter.send(&[0x60, 0x00])?;
//! println!("response: {response:02x?}");
//! adapter.close()?;
//! # Ok::<(), sdrpc::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// SLIP framing codec and frame assembly
pub mod framing;

// Reliable packet channel (three-wire style link layer)
pub mod link;

// Command/response/event multiplexer
pub mod transport;

// Public facade
pub mod adapter;

// Serial physical layer (feature-gated)
#[cfg(feature = "serial")]
#[cfg_attr(docsrs, doc(cfg(feature = "serial")))]
pub mod serial;

#[cfg(test)]
pub(crate) mod testutil;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::adapter::Adapter;
    pub use crate::core::{
        ByteChannel, ChannelError, DecodeError, Error, LogSeverity, PacketStats, StatusEvent,
    };
    pub use crate::link::{LinkError, LinkLayer, LinkLayerConfig, LinkState};
    pub use crate::transport::{PacketKind, RpcTransport, TransportConfig, TransportError};

    #[cfg(feature = "serial")]
    pub use crate::serial::{SerialChannel, SerialSettings};
}

// Re-export commonly used items at crate root
pub use crate::adapter::Adapter;
pub use crate::core::{Error, LogSeverity, StatusEvent};
pub use crate::link::{LinkLayerConfig, LinkState};
pub use crate::transport::TransportConfig;
