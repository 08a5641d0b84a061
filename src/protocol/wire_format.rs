//! Wire format encoding and decoding.
//!
//! Implements the 12-byte message header:
//! ```text
//! ┌──────┬──────┬──────────┬──────────┬───────────┬───────────┐
//! │ Type │ Flag │ Len      │ Seq      │ Reserve1  │ Reserve2  │
//! │ 1 B  │ 1 B  │ u16 LE   │ u32 LE   │ u16 LE    │ u16 LE    │
//! └──────┴──────┴──────────┴──────────┴───────────┴───────────┘
//! ```
//!
//! All multi-byte integers are little-endian, matching the byte layout the
//! data service produces on its (little-endian) hosts.
//!
//! `reserve1` carries the subscription batch id on `REG_TAG` and
//! `REG_TAG_DATA`; `reserve2` carries the poll interval (ms) on `REG_TAG`.

use crate::error::{ClientError, Result};

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// Largest payload a header can describe (`len` is 16 bits).
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Flag value for a successful reply.
pub const FLAG_OK: u8 = 0;

/// Request/response kinds understood by the data service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestType {
    /// Write control values to tags.
    ControlData = 1,
    /// Persist tag values.
    DumpData = 2,
    /// Register a tag subscription.
    RegTag = 3,
    /// Subscription push, server to client only.
    RegTagData = 4,
    /// Synchronous tag read.
    ReadData = 5,
    /// Read object attribute descriptors.
    ReadAttr = 6,
    /// Read object attribute values.
    ReadAttrData = 7,
}

impl RequestType {
    /// Wire value of this type.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for kinds answered with a correlated reply.
    #[inline]
    pub fn is_correlated(self) -> bool {
        !matches!(self, RequestType::RegTagData)
    }

    /// True for server-initiated pushes.
    #[inline]
    pub fn is_push(self) -> bool {
        matches!(self, RequestType::RegTagData)
    }
}

impl TryFrom<u8> for RequestType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        Ok(match value {
            1 => RequestType::ControlData,
            2 => RequestType::DumpData,
            3 => RequestType::RegTag,
            4 => RequestType::RegTagData,
            5 => RequestType::ReadData,
            6 => RequestType::ReadAttr,
            7 => RequestType::ReadAttrData,
            other => return Err(other),
        })
    }
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Request/response kind (see [`RequestType`]). Kept raw so unknown
    /// kinds survive decoding and can be logged by the session.
    pub kind: u8,
    /// 0 on success, otherwise a server failure code.
    pub flag: u8,
    /// Payload length in bytes.
    pub len: u16,
    /// Correlation id; meaningless on pushes.
    pub seq: u32,
    /// Batch id on REG_TAG / REG_TAG_DATA.
    pub reserve1: u16,
    /// Poll interval in ms on REG_TAG.
    pub reserve2: u16,
}

impl Header {
    /// Create a request header with zeroed flag and reserve fields.
    pub fn new(kind: RequestType, seq: u32, len: u16) -> Self {
        Self {
            kind: kind.as_u8(),
            flag: FLAG_OK,
            len,
            seq,
            reserve1: 0,
            reserve2: 0,
        }
    }

    /// Set the reserve fields.
    pub fn with_reserve(mut self, reserve1: u16, reserve2: u16) -> Self {
        self.reserve1 = reserve1;
        self.reserve2 = reserve2;
        self
    }

    /// Set the flag field.
    pub fn with_flag(mut self, flag: u8) -> Self {
        self.flag = flag;
        self
    }

    /// Typed view of `kind`, `None` for kinds this client does not know.
    #[inline]
    pub fn request_type(&self) -> Option<RequestType> {
        RequestType::try_from(self.kind).ok()
    }

    /// Batch id carried by subscription messages.
    #[inline]
    pub fn batch_id(&self) -> u16 {
        self.reserve1
    }

    /// Poll interval carried by REG_TAG.
    #[inline]
    pub fn interval_ms(&self) -> u16 {
        self.reserve2
    }

    /// True if the server reported success.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.flag == FLAG_OK
    }

    /// Encode header to bytes (little-endian).
    ///
    /// # Example
    ///
    /// ```
    /// use dataservice_client::protocol::{Header, RequestType};
    ///
    /// let header = Header::new(RequestType::ReadData, 42, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 12);
    /// assert_eq!(bytes[0], 5);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (12 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.kind;
        buf[1] = self.flag;
        buf[2..4].copy_from_slice(&self.len.to_le_bytes());
        buf[4..8].copy_from_slice(&self.seq.to_le_bytes());
        buf[8..10].copy_from_slice(&self.reserve1.to_le_bytes());
        buf[10..12].copy_from_slice(&self.reserve2.to_le_bytes());
    }

    /// Decode header from exactly `HEADER_SIZE` bytes.
    ///
    /// Returns `None` if the slice has any other length.
    ///
    /// # Example
    ///
    /// ```
    /// use dataservice_client::protocol::Header;
    ///
    /// let bytes = [5, 0, 4, 0, 42, 0, 0, 0, 0, 0, 0, 0];
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.kind, 5);
    /// assert_eq!(header.len, 4);
    /// assert_eq!(header.seq, 42);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != HEADER_SIZE {
            return None;
        }
        Some(Self {
            kind: buf[0],
            flag: buf[1],
            len: u16::from_le_bytes([buf[2], buf[3]]),
            seq: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            reserve1: u16::from_le_bytes([buf[8], buf[9]]),
            reserve2: u16::from_le_bytes([buf[10], buf[11]]),
        })
    }

    /// Check the payload length against the configured maximum.
    ///
    /// No other validation happens at this layer; type-specific checks
    /// belong to the session.
    pub fn validate(&self, max_payload_size: usize) -> Result<()> {
        if usize::from(self.len) > max_payload_size {
            return Err(ClientError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.len, max_payload_size
            )));
        }
        Ok(())
    }
}

/// Decode and validate a header in one step.
pub fn decode_header(buf: &[u8], max_payload_size: usize) -> Result<Header> {
    let header = Header::decode(buf).ok_or_else(|| {
        ClientError::Protocol(format!(
            "Header must be exactly {} bytes, got {}",
            HEADER_SIZE,
            buf.len()
        ))
    })?;
    header.validate(max_payload_size)?;
    Ok(header)
}
