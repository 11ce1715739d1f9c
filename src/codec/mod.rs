//! Codec module - serialization for cache keys and cached content.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//! - [`JsonCodec`] - JSON using `serde_json`
//! - [`ContentCodec`] - runtime choice of the encoding cached responses
//!   are stored in
//!
//! Codecs are marker structs with static methods rather than trait objects.
//!
//! # Example
//!
//! ```
//! use versioned_rpc::codec::{cache_key, ContentCodec};
//! use serde_json::json;
//!
//! let key = cache_key("/users/v1/", &json!({"id": 7})).unwrap();
//! assert!(key.starts_with(b"/users/v1/"));
//!
//! let content = ContentCodec::Json.encode(&json!({"name": "Ann"})).unwrap();
//! assert_eq!(content.as_ref(), br#"{"name":"Ann"}"#);
//! ```

mod json;
mod msgpack;

use bytes::Bytes;
use serde_json::Value;

use crate::error::CodecError;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

/// Encoding of cached response content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentCodec {
    #[default]
    Json,
    MsgPack,
}

impl ContentCodec {
    pub fn encode(&self, value: &Value) -> Result<Bytes, CodecError> {
        let encoded = match self {
            ContentCodec::Json => JsonCodec::encode(value)?,
            ContentCodec::MsgPack => MsgPackCodec::encode(value)?,
        };
        Ok(Bytes::from(encoded))
    }

    pub fn decode(&self, content: &[u8]) -> Result<Value, CodecError> {
        match self {
            ContentCodec::Json => JsonCodec::decode(content),
            ContentCodec::MsgPack => MsgPackCodec::decode(content),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ContentCodec::Json => "application/json",
            ContentCodec::MsgPack => "application/msgpack",
        }
    }
}

/// Canonical cache key: route bytes followed by the MsgPack encoding of the
/// collected parameters.
///
/// Parameter objects keep their keys sorted, so equal requests produce
/// equal keys regardless of the order fields arrived in.
pub fn cache_key(route: &str, params: &Value) -> Result<Vec<u8>, CodecError> {
    let mut key = route.as_bytes().to_vec();
    key.extend_from_slice(&MsgPackCodec::encode(params)?);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_distinguishes_routes_and_params() {
        let a = cache_key("/a/v1/", &json!({"id": 1})).unwrap();
        let b = cache_key("/a/v2/", &json!({"id": 1})).unwrap();
        let c = cache_key("/a/v1/", &json!({"id": 2})).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, cache_key("/a/v1/", &json!({"id": 1})).unwrap());
    }

    #[test]
    fn test_content_codecs() {
        let value = json!({"int": 123});
        for codec in [ContentCodec::Json, ContentCodec::MsgPack] {
            let content = codec.encode(&value).unwrap();
            assert_eq!(codec.decode(&content).unwrap(), value);
        }
        assert_eq!(ContentCodec::default().content_type(), "application/json");
    }
}
