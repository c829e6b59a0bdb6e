//! Packstream, the self-describing binary value format carried inside Bolt
//! messages.
//!
//! The codec is signature-agnostic: tagged structures are encoded and
//! decoded verbatim, and the message catalog (`bolt::message`) decides what
//! a given signature means. Rich types (nodes, temporal values) are
//! interpreted one layer up, in `graph`.

pub mod decode;
pub mod encode;
pub mod value;

pub use decode::{decode, decode_exact, Decoder};
pub use encode::{encode, encode_to_vec};
pub use value::{Structure, Value, ValueMap};

use thiserror::Error;

/// Nesting bound for the decoder. Deeper input is rejected rather than
/// recursed into.
pub const MAX_NESTING_DEPTH: usize = 256;

/// 32-bit collection sizes must stay below 2^31.
pub const MAX_SIZE_32: usize = i32::MAX as usize;

/// Codec-level failure. Lifted to `Error::Protocol` before leaving the
/// connection layer.
#[derive(Debug, Error)]
pub enum PackstreamError {
    #[error("unknown marker byte 0x{0:02X}")]
    UnknownMarker(u8),

    #[error("input exhausted: needed {needed} more bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },

    #[error("length {0} exceeds the 2^31-1 size bound")]
    LengthOverflow(u64),

    #[error("nesting deeper than {MAX_NESTING_DEPTH}")]
    DepthExceeded,

    #[error("string position holds invalid UTF-8")]
    InvalidUtf8,

    #[error("duplicate map key `{0}`")]
    DuplicateKey(String),

    #[error("structure with {0} fields exceeds the 15-field bound")]
    StructTooLarge(usize),

    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}
