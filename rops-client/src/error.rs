//! # Client Errors
//!
//! Purpose: One error type for every layer of the client, with helpers that
//! classify failures the way the resilience policy needs them.
//!
//! ## Taxonomy
//! - **Protocol class**: `Protocol`, `Server`, `UnexpectedResponse`. Always
//!   surfaced, never retried inside the codec.
//! - **Transport class**: `Io`, `Closed`, `Tls`, `Disposed`. Callers that want
//!   resilience report these to the `ConnectionManager`.
//! - **Timeout**: kept apart from transport faults so it never forces a
//!   reconnect.

use std::io;

use thiserror::Error;

/// Result type used across the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the codec, transport and command layer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(io::Error),

    /// Peer closed the stream before the reply was complete.
    #[error("connection closed by peer")]
    Closed,

    /// A read, write or connect deadline elapsed.
    #[error("operation timed out")]
    Timeout,

    /// TLS configuration or handshake failure.
    #[error("tls error: {0}")]
    Tls(String),

    /// RESP framing or parse error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server returned an error reply.
    #[error("server error: {message}")]
    Server { message: String },

    /// Response type did not match the expected command response.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Address could not be resolved into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Pool is at capacity and no idle connections are available.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Handle was closed, typically by a forced reconnect.
    #[error("connection handle disposed")]
    Disposed,

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),
}

impl ClientError {
    /// True for deadline expiry. Timeouts must not trigger a forced reconnect.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout)
    }

    /// True when the underlying connection is unusable.
    pub fn is_connection_broken(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Closed | ClientError::Tls(_) | ClientError::Disposed
        )
    }

    /// True for reply-shape and server-reported failures.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            ClientError::Protocol(_) | ClientError::Server { .. } | ClientError::UnexpectedResponse(_)
        )
    }

    pub(crate) fn protocol(detail: impl Into<String>) -> Self {
        ClientError::Protocol(detail.into())
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ClientError::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ClientError::Closed,
            _ => ClientError::Io(err),
        }
    }
}

impl From<tokio::time::error::Elapsed> for ClientError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ClientError::Timeout
    }
}

impl From<rustls::Error> for ClientError {
    fn from(err: rustls::Error) -> Self {
        ClientError::Tls(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_to_classes() {
        let timeout: ClientError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(timeout.is_timeout());
        assert!(!timeout.is_connection_broken());

        let eof: ClientError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(eof, ClientError::Closed));
        assert!(eof.is_connection_broken());

        let other: ClientError = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert!(matches!(other, ClientError::Io(_)));
    }

    #[test]
    fn server_errors_are_protocol_class() {
        let err = ClientError::Server {
            message: "ERR nope".to_string(),
        };
        assert!(err.is_protocol());
        assert!(!err.is_connection_broken());
    }
}
