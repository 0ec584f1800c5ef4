//! Error type for the wire protocol.

use thiserror::Error;

/// Errors raised while framing, encoding, or decoding protocol messages.
#[derive(Error, Debug)]
pub enum ProtoError {
    /// A frame carried a message code this crate does not recognise.
    #[error("unknown message code: {0:#04x}")]
    UnknownMessageCode(i64),

    /// The frame was not a `[code, body]` two-element array.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A frame exceeded the size limit.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Deserialisation error.
    #[error("deserialisation error: {0}")]
    Deserialisation(String),

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
