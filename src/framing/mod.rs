//! SLIP framing: byte stuffing and frame-boundary recovery.
//!
//! [`slip`] is the stateless codec; [`assembler`] recovers frame
//! boundaries from the unframed chunks a byte channel delivers.

pub mod assembler;
pub mod slip;

pub use assembler::FrameAssembler;
pub use slip::{END, ESC, ESC_END, ESC_ESC, FramingError};
