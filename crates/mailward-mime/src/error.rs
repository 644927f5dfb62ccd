//! Error types for MIME operations.

use std::string::FromUtf8Error;

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A header line that cannot be represented.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Unparseable `Content-Type`.
    #[error("invalid content type: {0}")]
    InvalidContentType(String),

    /// Bad transfer or header encoding.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 decode error.
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// UTF-8 decode error.
    #[error("UTF-8 decode error: {0}")]
    Utf8Decode(#[from] FromUtf8Error),

    /// A multipart body without a boundary parameter.
    #[error("missing boundary in multipart message")]
    MissingBoundary,

    /// Anything else that makes the input unusable.
    #[error("parse error: {0}")]
    Parse(String),
}
