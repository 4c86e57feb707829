//! MsgPack codec using `rmp-serde`.
//!
//! WRP peers expect struct-as-map encoding keyed by field name, so encoding
//! always goes through `to_vec_named`. `to_vec` would emit positional arrays
//! that other WRP implementations cannot read.
//!
//! # Example
//!
//! ```
//! use wrp_relay::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Probe {
//!     id: u32,
//!     content: String,
//! }
//!
//! let msg = Probe { id: 42, content: "hello".to_string() };
//! let encoded = MsgPackCodec::encode(&msg).unwrap();
//! let decoded: Probe = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
