//! Frame-boundary recovery for unframed read chunks.
//!
//! A byte channel delivers whatever the device driver had buffered, so a
//! single read may hold half a frame, several frames, or line noise
//! between frames. [`FrameAssembler`] scans for [`END`](super::slip::END)
//! delimiters and emits each complete frame payload (delimiters stripped,
//! escapes still in place) exactly once.

use super::slip::END;

/// Incremental frame splitter.
///
/// Bytes seen outside a frame are discarded; two consecutive delimiters
/// are treated as the start of a new frame rather than an empty one, so a
/// noisy line that produces runs of `0xC0` cannot emit garbage frames.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    in_frame: bool,
}

impl FrameAssembler {
    /// Create an assembler with no buffered state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read chunk, invoking `emit` for every completed frame.
    ///
    /// The emitted slice is the frame interior: escape sequences intact,
    /// bounding delimiters removed.
    pub fn push<F>(&mut self, bytes: &[u8], mut emit: F)
    where
        F: FnMut(&[u8]),
    {
        for &byte in bytes {
            if byte == END {
                if self.in_frame && !self.buffer.is_empty() {
                    emit(&self.buffer);
                    self.buffer.clear();
                    self.in_frame = false;
                } else {
                    // Either a frame start, or back-to-back delimiters:
                    // stay (or re-sync) at the start of a fresh frame.
                    self.buffer.clear();
                    self.in_frame = true;
                }
            } else if self.in_frame {
                self.buffer.push(byte);
            }
            // Bytes before the first delimiter are line noise; drop them.
        }
    }

    /// Discard any partially assembled frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.in_frame = false;
    }
}
