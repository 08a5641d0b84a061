//! Codec module - payload encoding for the request kinds.
//!
//! - [`DelimitedCodec`] - `@@`-terminated text fields (tags, values, pushes)
//! - [`AttrCodec`] - fixed-size attribute records and attribute values
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects;
//! each request kind knows statically which codec its payload uses.
//!
//! # Example
//!
//! ```
//! use dataservice_client::codec::DelimitedCodec;
//!
//! let payload = DelimitedCodec::join_pairs(&["t1"], &["v1"]).unwrap();
//! let map = DelimitedCodec::decode_tag_values(payload.as_bytes()).unwrap();
//! assert_eq!(map["t1"], "v1");
//! ```

mod attr;
mod delimited;

pub use attr::{AttrCodec, AttrType, ObjectAttr, ObjectData, ATTR_RECORD_SIZE};
pub use delimited::{DelimitedCodec, TagValues, DIVIDE_MARK};
