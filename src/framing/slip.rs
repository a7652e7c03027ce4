//! SLIP byte stuffing (RFC 1055).
//!
//! Frames are delimited by [`END`] bytes; occurrences of [`END`] and
//! [`ESC`] inside the payload are replaced by two-byte escape sequences so
//! frame boundaries stay unambiguous for arbitrary binary payloads.

use thiserror::Error;

/// Frame delimiter.
pub const END: u8 = 0xC0;
/// Escape introducer.
pub const ESC: u8 = 0xDB;
/// Escaped substitute for [`END`].
pub const ESC_END: u8 = 0xDC;
/// Escaped substitute for [`ESC`].
pub const ESC_ESC: u8 = 0xDD;

/// Errors detected while decoding a frame.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    /// The frame ended in the middle of an escape sequence.
    #[error("escape byte at end of frame")]
    Truncated,

    /// An escape introducer was followed by an unknown substitute.
    #[error("invalid escape sequence 0xDB 0x{0:02X}")]
    InvalidEscape(u8),
}

/// Encode `payload` into a delimited, escaped frame.
///
/// The frame is bounded by [`END`] on both sides; the leading delimiter
/// flushes any line noise accumulated on the receiving side.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    // Worst case every byte escapes, plus the two delimiters.
    let mut frame = Vec::with_capacity(payload.len() * 2 + 2);
    frame.push(END);

    for &byte in payload {
        match byte {
            END => {
                frame.push(ESC);
                frame.push(ESC_END);
            }
            ESC => {
                frame.push(ESC);
                frame.push(ESC_ESC);
            }
            _ => frame.push(byte),
        }
    }

    frame.push(END);
    frame
}

/// Decode an escaped frame back into its payload.
///
/// Delimiter bytes are skipped wherever they occur, so input with or
/// without its bounding [`END`]s decodes identically and consecutive
/// delimiters (empty frames) are tolerated.
pub fn decode(frame: &[u8]) -> Result<Vec<u8>, FramingError> {
    let mut payload = Vec::with_capacity(frame.len());
    let mut bytes = frame.iter().copied();

    while let Some(byte) = bytes.next() {
        match byte {
            END => continue,
            ESC => match bytes.next() {
                Some(ESC_END) => payload.push(END),
                Some(ESC_ESC) => payload.push(ESC),
                Some(other) => return Err(FramingError::InvalidEscape(other)),
                None => return Err(FramingError::Truncated),
            },
            _ => payload.push(byte),
        }
    }

    Ok(payload)
}
