//! Error taxonomy for the wire protocol
//!
//! A partial frame is never an error: decoders return `Ok(None)` and wait
//! for more bytes. Everything in [`ProtocolError`] means the byte stream can
//! no longer be trusted, and the connection that produced it is closed.

use thiserror::Error;

/// Fatal protocol violations raised while encoding or decoding frames
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// First byte of a frame is not a tag this endpoint accepts
    #[error("unknown message tag 0x{0:02x}")]
    UnknownTag(u8),

    /// Client update carries a payload variant this build does not know
    #[error("unknown client update variant 0x{0:02x}")]
    UnknownVariant(u8),

    /// Progress update whose won flag is neither 0 nor 1
    #[error("invalid won flag 0x{0:02x}")]
    InvalidWinFlag(u8),

    /// Decoded roster entries disagree with the declared section length
    #[error("roster section declared {declared} bytes but entries used {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Name length byte of zero, which cannot hold the terminator
    #[error("roster entry has an empty name length field")]
    EmptyNameField,

    /// Name bytes were not followed by the NUL terminator
    #[error("roster entry name is missing its terminator")]
    MissingTerminator,

    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("status text of {0} bytes does not fit a 24-bit length")]
    StatusTooLong(usize),

    #[error("player name of {0} bytes exceeds the 254 byte limit")]
    NameTooLong(usize),

    #[error("player name contains a NUL byte")]
    NameContainsNul,

    #[error("roster of {0} entries exceeds the 255 entry limit")]
    TooManyEntries(usize),
}
