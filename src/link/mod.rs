//! Reliable packet channel over an unreliable byte stream.
//!
//! A three-wire style data-link layer: every reliable packet carries a
//! mod-8 sequence number and is retransmitted on a timer until the peer
//! acknowledges it (stop-and-wait, window size 1). Before any traffic is
//! accepted, a SYNC/CONFIG handshake brings the link to the Active state.
//!
//! - [`packet`]: bit-exact header/CRC codec and link-control byte patterns
//! - [`state`]: link lifecycle states and the state machine's exit flags
//! - [`layer`]: the [`LinkLayer`] itself (threads, retransmission, handshake)

pub mod layer;
pub mod packet;
pub mod state;

pub use layer::{LinkError, LinkLayer, LinkLayerConfig};
pub use packet::{LinkCapabilities, Packet, PacketError, PacketType};
pub use state::LinkState;
