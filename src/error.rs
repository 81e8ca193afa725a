//! Error types for the linechat library.

use std::io;
use std::string::FromUtf8Error;

/// Result type alias for linechat operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while framing, parsing or routing chat traffic.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] FromUtf8Error),

    #[error("line exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("unknown command: {0}")]
    UnknownVerb(String),

    #[error("{verb} requires an argument")]
    MissingArgument { verb: &'static str },

    #[error("invalid argument for {verb}: {value}")]
    InvalidArgument { verb: &'static str, value: String },

    #[error("nickname must be {min}-{max} bytes without spaces or ':'")]
    InvalidNickname { min: usize, max: usize },

    #[error("room name must be {min}-{max} bytes without spaces")]
    InvalidRoomName { min: usize, max: usize },

    #[error("malformed payload, expected <name>:<text>")]
    MalformedPayload,

    #[error("config error: {0}")]
    Config(String),

    #[error("router is no longer running")]
    RouterClosed,
}

impl Error {
    /// Whether the error should only be reported back to the client that caused it.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::LineTooLong { .. }
                | Error::UnknownVerb(_)
                | Error::MissingArgument { .. }
                | Error::InvalidArgument { .. }
                | Error::InvalidNickname { .. }
                | Error::InvalidRoomName { .. }
                | Error::MalformedPayload
                | Error::Utf8(_)
        )
    }
}
