//! Protocol module - wire format and frame types.
//!
//! This module implements the binary protocol spoken with the data service:
//! - 12-byte header encoding/decoding
//! - Frame struct pairing a header with its payload
//!
//! It performs no I/O.

mod frame;
mod wire_format;

pub use frame::{build_frame, encode_message, Frame};
pub(crate) use frame::checked_len;
pub use wire_format::{decode_header, Header, RequestType, FLAG_OK, HEADER_SIZE, MAX_PAYLOAD_SIZE};
