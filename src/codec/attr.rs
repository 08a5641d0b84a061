//! Object attribute records.
//!
//! `READ_ATTR` replies carry an array of fixed-size records:
//!
//! ```text
//! ┌────────────┬────────────┬──────┬─────┬──────────┐
//! │ name       │ alias      │ type │ pad │ len      │
//! │ 256 B, NUL │ 256 B, NUL │ u8   │ 1 B │ u16 LE   │
//! └────────────┴────────────┴──────┴─────┴──────────┘
//! ```
//!
//! `READ_ATTR_DATA` replies are ordinary `@@` name/value pairs and decode
//! into [`ObjectData`].

use serde::Serialize;

use super::delimited::DelimitedCodec;
use crate::error::{ClientError, Result};

/// Size of a name field in an attribute record.
pub const ATTR_NAME_SIZE: usize = 256;

/// Size of one encoded attribute record.
pub const ATTR_RECORD_SIZE: usize = ATTR_NAME_SIZE * 2 + 4;

const TYPE_OFFSET: usize = ATTR_NAME_SIZE * 2;
const LEN_OFFSET: usize = TYPE_OFFSET + 2;

/// Attribute value type reported by the data service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrType {
    Unknown,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float,
    Double,
    String,
    Bool,
    Struct,
}

impl From<u8> for AttrType {
    fn from(value: u8) -> Self {
        match value {
            1 => AttrType::Int8,
            2 => AttrType::Int16,
            3 => AttrType::Int32,
            4 => AttrType::Int64,
            5 => AttrType::Uint8,
            6 => AttrType::Uint16,
            7 => AttrType::Uint32,
            8 => AttrType::Uint64,
            9 => AttrType::Float,
            10 => AttrType::Double,
            11 => AttrType::String,
            12 => AttrType::Bool,
            13 => AttrType::Struct,
            _ => AttrType::Unknown,
        }
    }
}

impl From<AttrType> for u8 {
    fn from(value: AttrType) -> Self {
        match value {
            AttrType::Unknown => 0,
            AttrType::Int8 => 1,
            AttrType::Int16 => 2,
            AttrType::Int32 => 3,
            AttrType::Int64 => 4,
            AttrType::Uint8 => 5,
            AttrType::Uint16 => 6,
            AttrType::Uint32 => 7,
            AttrType::Uint64 => 8,
            AttrType::Float => 9,
            AttrType::Double => 10,
            AttrType::String => 11,
            AttrType::Bool => 12,
            AttrType::Struct => 13,
        }
    }
}

/// One attribute descriptor of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectAttr {
    pub name: String,
    pub alias: String,
    pub attr_type: AttrType,
    /// Data length of the attribute value.
    pub len: u16,
}

impl ObjectAttr {
    /// Decode a single record. `buf` must be exactly one record long.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != ATTR_RECORD_SIZE {
            return Err(ClientError::MalformedPayload(format!(
                "attribute record must be {} bytes, got {}",
                ATTR_RECORD_SIZE,
                buf.len()
            )));
        }
        Ok(Self {
            name: c_string(&buf[..ATTR_NAME_SIZE]),
            alias: c_string(&buf[ATTR_NAME_SIZE..TYPE_OFFSET]),
            attr_type: AttrType::from(buf[TYPE_OFFSET]),
            len: u16::from_le_bytes([buf[LEN_OFFSET], buf[LEN_OFFSET + 1]]),
        })
    }

    /// Encode into a fixed-size record. Names longer than 255 bytes are
    /// truncated so the record stays NUL terminated.
    pub fn encode(&self) -> [u8; ATTR_RECORD_SIZE] {
        let mut buf = [0u8; ATTR_RECORD_SIZE];
        copy_c_string(&mut buf[..ATTR_NAME_SIZE], &self.name);
        copy_c_string(&mut buf[ATTR_NAME_SIZE..TYPE_OFFSET], &self.alias);
        buf[TYPE_OFFSET] = self.attr_type.into();
        buf[LEN_OFFSET..].copy_from_slice(&self.len.to_le_bytes());
        buf
    }
}

/// One attribute value of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectData {
    pub name: String,
    pub value: String,
}

/// Codec for attribute payloads.
pub struct AttrCodec;

impl AttrCodec {
    /// Decode a `READ_ATTR` payload into its records.
    ///
    /// An empty payload, or one that is not a whole number of records, is
    /// malformed.
    pub fn decode_attrs(payload: &[u8]) -> Result<Vec<ObjectAttr>> {
        if payload.is_empty() || payload.len() % ATTR_RECORD_SIZE != 0 {
            return Err(ClientError::MalformedPayload(format!(
                "attribute payload of {} bytes is not a multiple of {}",
                payload.len(),
                ATTR_RECORD_SIZE
            )));
        }
        payload
            .chunks_exact(ATTR_RECORD_SIZE)
            .map(ObjectAttr::decode)
            .collect()
    }

    /// Decode a `READ_ATTR_DATA` payload into name/value pairs.
    pub fn decode_data(payload: &[u8]) -> Result<Vec<ObjectData>> {
        Ok(DelimitedCodec::decode_pairs(payload)?
            .into_iter()
            .map(|(name, value)| ObjectData { name, value })
            .collect())
    }
}

fn c_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn copy_c_string(dst: &mut [u8], src: &str) {
    let bytes = src.as_bytes();
    let n = bytes.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&bytes[..n]);
}
