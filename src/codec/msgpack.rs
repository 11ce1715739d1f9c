//! MsgPack codec using `rmp-serde`.
//!
//! Structs are written with `to_vec_named` (struct-as-map), so cached
//! content and cache keys stay readable by other MsgPack consumers and do
//! not depend on field order.
//!
//! # Example
//!
//! ```
//! use versioned_rpc::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Profile {
//!     id: u32,
//!     name: String,
//! }
//!
//! let profile = Profile { id: 42, name: "Ann".to_string() };
//! let encoded = MsgPackCodec::encode(&profile).unwrap();
//! let decoded: Profile = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, profile);
//! ```

use crate::error::CodecError;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes in struct-as-map format.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
