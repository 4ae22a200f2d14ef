//! MsgPack codec using `rmp-serde`.
//!
//! Structs are always written in map form (`to_vec_named`) so that fields
//! can be added to packet types without breaking older readers.
//!
//! # Example
//!
//! ```
//! use streamport::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Release {
//!     id: u32,
//! }
//!
//! let encoded = MsgPackCodec::encode(&Release { id: 7 }).unwrap();
//! let decoded: Release = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, Release { id: 7 });
//! ```

use crate::error::Result;

/// MessagePack codec for structured payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
