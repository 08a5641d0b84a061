//! Frame struct with typed accessors.
//!
//! A frame is one complete wire message: a decoded header and its payload.
//! The payload is an immutable `bytes::Bytes` copied once out of the
//! transport's read buffer, so nothing handed to the session or to user
//! callbacks aliases socket buffers.
//!
//! # Example
//!
//! ```
//! use dataservice_client::protocol::{Frame, Header, RequestType};
//! use bytes::Bytes;
//!
//! let header = Header::new(RequestType::ReadData, 42, 5);
//! let frame = Frame::new(header, Bytes::from_static(b"hello"));
//!
//! assert_eq!(frame.seq(), 42);
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{Header, RequestType, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::{ClientError, Result};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Create a frame from header and raw bytes (copies data).
    pub fn from_parts(header: Header, payload: &[u8]) -> Self {
        Self {
            header,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Get the raw type byte.
    #[inline]
    pub fn kind(&self) -> u8 {
        self.header.kind
    }

    /// Typed request kind, if known.
    #[inline]
    pub fn request_type(&self) -> Option<RequestType> {
        self.header.request_type()
    }

    /// Get the flag byte.
    #[inline]
    pub fn flag(&self) -> u8 {
        self.header.flag
    }

    /// Get the sequence number.
    #[inline]
    pub fn seq(&self) -> u32 {
        self.header.seq
    }

    /// Batch id (reserve1).
    #[inline]
    pub fn batch_id(&self) -> u16 {
        self.header.batch_id()
    }

    /// Check if the server reported success.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.header.is_ok()
    }

    /// Payload as UTF-8 text, replacing invalid sequences.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Encode this frame into a contiguous buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        build_frame(&self.header, &self.payload)
    }
}

/// Build a complete frame as a single byte vector.
///
/// Encodes header and appends payload into a contiguous buffer. The
/// caller is responsible for `header.len` matching `payload.len()`; use
/// [`encode_message`] to have it set automatically.
///
/// # Example
///
/// ```
/// use dataservice_client::protocol::{build_frame, Header, RequestType};
///
/// let header = Header::new(RequestType::ReadData, 42, 5);
/// let bytes = build_frame(&header, b"hello");
/// assert_eq!(bytes.len(), 12 + 5);
/// ```
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

/// Encode a message, setting `len` from the payload.
///
/// Fails with `InvalidInput` if the payload does not fit a 16-bit length.
pub fn encode_message(header: Header, payload: &[u8]) -> Result<Vec<u8>> {
    let len = checked_len(payload.len())?;
    let header = Header { len, ..header };
    Ok(build_frame(&header, payload))
}

/// Payload length as the header's 16-bit field.
pub(crate) fn checked_len(len: usize) -> Result<u16> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(ClientError::InvalidInput(format!(
            "Payload of {} bytes exceeds the {} byte frame limit",
            len, MAX_PAYLOAD_SIZE
        )));
    }
    Ok(len as u16)
}
