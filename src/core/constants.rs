//! Protocol constants and configuration defaults.
//!
//! The wire-level values are fixed by the peer firmware and MUST NOT be
//! changed. The timing values are only defaults; every one of them can be
//! overridden through [`LinkLayerConfig`](crate::link::LinkLayerConfig) and
//! [`TransportConfig`](crate::transport::TransportConfig).

use std::time::Duration;

// =============================================================================
// LINK PACKET LAYOUT
// =============================================================================

/// Link packet header size (control byte, type/length bytes, checksum).
pub const HEADER_LENGTH: usize = 4;

/// CRC16 trailer size for packets carrying a data-integrity check.
pub const CRC_LENGTH: usize = 2;

/// Maximum payload carried by one link packet (12-bit length field).
pub const MAX_PAYLOAD_LENGTH: usize = 0x0FFF;

/// Sequence and acknowledgement numbers are 3 bits wide.
pub const SEQ_MODULUS: u8 = 8;

// =============================================================================
// TIMING DEFAULTS
// =============================================================================

/// Default interval between retransmissions of an unacknowledged packet.
pub const DEFAULT_RETRANSMISSION_INTERVAL: Duration = Duration::from_millis(250);

/// Default number of times a reliable packet is sent before giving up.
pub const DEFAULT_RETRY_LIMIT: u32 = 6;

/// Default time to wait for the link to reach the Active state in `open`.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default time to hold off communication after resetting the peer,
/// giving it time to reboot.
pub const DEFAULT_RESET_HOLD: Duration = Duration::from_millis(300);

/// Default time to wait for the response to a command.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(1500);

// =============================================================================
// SERIAL DEFAULTS
// =============================================================================

/// Default baud rate for the serial physical layer.
#[cfg(feature = "serial")]
pub const DEFAULT_BAUD_RATE: u32 = 1_000_000;

/// Read chunk size used by the serial reader thread.
#[cfg(feature = "serial")]
pub const SERIAL_READ_CHUNK: usize = 256;

/// Default blocking-read timeout of the serial reader thread. Bounds how
/// long `close` waits for the reader to notice the stop flag.
#[cfg(feature = "serial")]
pub const DEFAULT_SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(100);
