//! Decoding of the binary value envelope.
//!
//! Evaluation results arrive as a self-describing MessagePack envelope.
//! Decoding is layered: [`decode_value`] reconstructs the envelope into a
//! dynamic [`Value`] tree, and [`from_value`] maps that tree onto host types
//! through `serde::Deserialize`. [`decode`] composes the two.
//!
//! Host records bind their fields to Pkl property names with serde rename
//! attributes:
//!
//! ```ignore
//! #[derive(serde::Deserialize)]
//! struct Server {
//!     #[serde(rename = "hostName")]
//!     host_name: String,
//!     port: u16,
//! }
//! ```
//!
//! Polymorphic class hierarchies are resolved through the process-wide
//! [`registry`]: register a host type per qualified Pkl class name, then
//! dispatch dynamic values with [`registry::decode_registered`].

mod envelope;
pub mod registry;
mod typed;
mod value;

use serde::de::DeserializeOwned;
use thiserror::Error;

pub use envelope::decode_value;
pub use typed::from_value;
pub use value::{
    ClassInfo, DataSize, DataSizeUnit, Duration, DurationUnit, IntSeq, Object, Pair, Regex,
    TypeAliasInfo, Value,
};

/// Decodes a binary value envelope straight into a host type.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    let value = decode_value(bytes)?;
    from_value(&value)
}

/// Errors raised while decoding the value envelope.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The envelope carried an object code that cannot satisfy the expected
    /// host type.
    #[error("object code {code:#04x} cannot be decoded into {expected}")]
    UnexpectedCode { code: i64, expected: &'static str },

    /// The decoded value does not fit the expected host type.
    #[error("cannot decode Pkl value of type `{found}` into `{expected}`")]
    TypeMismatch { found: String, expected: String },

    /// An integer did not fit the host field's width.
    #[error("value {value} does not fit into {target}")]
    IntOutOfRange { value: i64, target: &'static str },

    /// A duration carried an unknown unit string.
    #[error("unrecognized Duration unit: `{0}`")]
    UnknownDurationUnit(String),

    /// A data size carried an unknown unit string.
    #[error("unrecognized DataSize unit: `{0}`")]
    UnknownDataSizeUnit(String),

    /// The envelope ended before the value was complete.
    #[error("truncated value envelope")]
    Truncated,

    /// The envelope is not valid MessagePack or violates the value grammar.
    #[error("malformed value envelope: {0}")]
    Malformed(String),

    /// Any other decoding failure, including ones raised by `Deserialize`
    /// implementations.
    #[error("{0}")]
    Message(String),
}

impl serde::de::Error for DecodeError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Self::Message(msg.to_string())
    }
}
