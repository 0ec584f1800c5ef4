//! Error types for the binding.

use thiserror::Error;

use crate::decoder::DecodeError;

/// Result type for binding operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by evaluator operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Pkl evaluation ran and produced an error. The message is the
    /// backend's formatted error output.
    #[error("{0}")]
    Eval(String),

    /// The backend rejected an evaluator creation request.
    #[error("failed to create evaluator: {0}")]
    CreateEvaluator(String),

    /// Something went wrong inside the binding or the protocol.
    #[error("an internal error occurred: {0}")]
    Internal(String),

    /// The backend process or library connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// An option is incompatible with the running backend version.
    #[error("{0}")]
    Config(String),

    /// The binary value envelope could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A wire protocol failure.
    #[error(transparent)]
    Proto(#[from] pkl_proto::ProtoError),

    /// An I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The evaluator was closed while the operation was in flight, or the
    /// operation was issued against a closed evaluator.
    #[error("the evaluator has been closed")]
    EvaluatorClosed,

    /// The evaluator manager was closed.
    #[error("the evaluator manager has been closed")]
    ManagerClosed,
}

impl Error {
    /// Whether this error is an evaluation error produced by Pkl itself,
    /// as opposed to a failure of the binding or transport.
    #[must_use]
    pub fn is_eval_error(&self) -> bool {
        matches!(self, Self::Eval(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_error_displays_backend_text_verbatim() {
        let err = Error::Eval("–– Pkl Error ––\ncannot find property `bar`".into());
        assert!(err.to_string().starts_with("–– Pkl Error ––"));
        assert!(err.is_eval_error());
    }

    #[test]
    fn internal_error_is_prefixed() {
        let err = Error::Internal("unexpected response".into());
        assert_eq!(
            err.to_string(),
            "an internal error occurred: unexpected response"
        );
        assert!(!err.is_eval_error());
    }
}
