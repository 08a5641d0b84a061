//! Error types for dataservice-client.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::RequestType;

/// Generic failure code used by the data service.
pub const CODE_COMMON_ERROR: i32 = 1001;
/// Connection could not be established or was lost.
pub const CODE_CONNECT_FAILED: i32 = 1002;
/// No reply within the configured window.
pub const CODE_TIMEOUT: i32 = 1004;
/// Caller supplied invalid arguments.
pub const CODE_INCORRECT_INPUT: i32 = 1005;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// I/O error on the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport is not connected; the request was not sent.
    #[error("Not connected to data service")]
    NotConnected,

    /// No reply arrived for `seq` within `timeout`.
    #[error("Request {seq} timed out after {timeout:?}")]
    Timeout { seq: u32, timeout: Duration },

    /// The server answered with a non-zero flag.
    #[error("Server rejected {request:?} request with flag {flag}")]
    Server { request: RequestType, flag: u8 },

    /// Reply payload did not have the expected structure.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Protocol error (bad header, oversized frame).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Input rejected before any bytes were sent.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Outbound queue stayed full past the send timeout.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// Client or executor has been shut down.
    #[error("Client is shut down")]
    Shutdown,
}

impl ClientError {
    /// Numeric code compatible with the data service's error codes.
    ///
    /// Server rejections report the server-provided flag verbatim.
    pub fn code(&self) -> i32 {
        match self {
            ClientError::Server { flag, .. } => i32::from(*flag),
            ClientError::Io(_) | ClientError::NotConnected => CODE_CONNECT_FAILED,
            ClientError::Timeout { .. } | ClientError::BackpressureTimeout => CODE_TIMEOUT,
            ClientError::InvalidInput(_) => CODE_INCORRECT_INPUT,
            ClientError::MalformedPayload(_)
            | ClientError::Protocol(_)
            | ClientError::Shutdown => CODE_COMMON_ERROR,
        }
    }

    /// True for errors that come from the wire rather than the caller.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            ClientError::Server { .. } | ClientError::MalformedPayload(_) | ClientError::Protocol(_)
        )
    }
}

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;
