//! Error types for the IMAP client.

use std::time::Duration;

use thiserror::Error;

/// Errors from connecting to or talking with an IMAP server.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or record-layer failure.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Host name unusable as a TLS server name.
    #[error("invalid DNS name for TLS: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Malformed server response.
    #[error("parse error at byte {position}: {message}")]
    Parse {
        /// Byte offset into the response.
        position: usize,
        /// What was expected.
        message: String,
    },

    /// LOGIN rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Tagged `NO`.
    #[error("server returned NO: {0}")]
    No(String),

    /// Tagged `BAD`.
    #[error("server returned BAD: {0}")]
    Bad(String),

    /// Server said `BYE`.
    #[error("server sent BYE: {0}")]
    Bye(String),

    /// A bounded wait expired.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Command not valid in the current session state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Unexpected but well-formed data.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Peer closed the connection.
    #[error("connection closed by server")]
    ConnectionClosed,
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
