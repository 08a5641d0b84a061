//! `@@`-delimited text codec.
//!
//! Multi-field payloads are UTF-8 strings, each field followed by the
//! two-character marker `@@`:
//!
//! ```text
//! name1@@value1@@name2@@value2@@
//! ```
//!
//! The splitter drops empty fields, so consecutive markers collapse and a
//! trailing marker is optional. An empty value is therefore
//! indistinguishable from a missing one; peers rely on this behaviour.
//!
//! # Example
//!
//! ```
//! use dataservice_client::codec::DelimitedCodec;
//!
//! let payload = DelimitedCodec::join(["t1", "t2"]);
//! assert_eq!(payload, "t1@@t2@@");
//! assert_eq!(DelimitedCodec::split("t1@@@@t2"), vec!["t1", "t2"]);
//! ```

use std::collections::BTreeMap;

use crate::error::{ClientError, Result};

/// Field terminator used by every multi-field payload.
pub const DIVIDE_MARK: &str = "@@";

/// Tag name → value mapping delivered to subscription callbacks.
pub type TagValues = BTreeMap<String, String>;

/// Codec for `@@`-terminated field lists.
pub struct DelimitedCodec;

impl DelimitedCodec {
    /// Join fields, terminating each with the marker.
    pub fn join<I, S>(fields: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = String::new();
        for field in fields {
            out.push_str(field.as_ref());
            out.push_str(DIVIDE_MARK);
        }
        out
    }

    /// Join `(name, value)` pairs as `name@@value@@...`.
    pub fn join_pairs<N, V>(names: &[N], values: &[V]) -> Result<String>
    where
        N: AsRef<str>,
        V: AsRef<str>,
    {
        if names.len() != values.len() {
            return Err(ClientError::InvalidInput(format!(
                "{} tag names but {} values",
                names.len(),
                values.len()
            )));
        }
        Ok(Self::join(
            names
                .iter()
                .zip(values)
                .flat_map(|(n, v)| [n.as_ref(), v.as_ref()]),
        ))
    }

    /// Split on the marker, dropping empty fields.
    pub fn split(content: &str) -> Vec<&str> {
        content
            .split(DIVIDE_MARK)
            .filter(|field| !field.is_empty())
            .collect()
    }

    /// Split raw payload bytes (lossy UTF-8) into owned fields.
    pub fn split_bytes(payload: &[u8]) -> Vec<String> {
        Self::split(&String::from_utf8_lossy(payload))
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    /// Decode alternating name/value fields into pairs.
    ///
    /// An odd number of fields is a malformed payload.
    pub fn decode_pairs(payload: &[u8]) -> Result<Vec<(String, String)>> {
        let fields = Self::split_bytes(payload);
        if fields.len() % 2 != 0 {
            return Err(ClientError::MalformedPayload(format!(
                "expected name/value pairs, got {} fields",
                fields.len()
            )));
        }
        let mut pairs = Vec::with_capacity(fields.len() / 2);
        let mut iter = fields.into_iter();
        while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
            pairs.push((name, value));
        }
        Ok(pairs)
    }

    /// Decode a push payload into a tag map. Later duplicates are ignored.
    pub fn decode_tag_values(payload: &[u8]) -> Result<TagValues> {
        let mut map = TagValues::new();
        for (name, value) in Self::decode_pairs(payload)? {
            map.entry(name).or_insert(value);
        }
        Ok(map)
    }
}
