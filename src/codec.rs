//! Serialization boundary between typed values and backend payloads.
//!
//! Keys restrict what is admissible (no maps), but values do not: anything
//! serde can round-trip is storable, including nested sequences and
//! associative maps. The codec must be its own exact inverse; decoding into
//! an incompatible shape fails with [`FetchError::Serialization`] rather
//! than coercing.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::FetchError;

/// Invertible encoding of a typed value to a storable byte payload.
///
/// `decode(encode(v))` must equal `v` for every admissible `v`. Pluggable:
/// the fetcher defaults to [`BincodeCodec`] and accepts any implementation
/// at construction.
pub trait ValueCodec: Send + Sync {
    /// Encode `value` into a backend payload.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, FetchError>;

    /// Decode a backend payload into a `T`.
    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, FetchError>;
}

/// Default codec backed by bincode.
///
/// Compact, byte-oriented, and round-trips every serde shape including
/// maps with non-string keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

/// Fixed-width integers, trailing bytes rejected. A payload longer than the
/// decoded value is corrupt, not a value with junk after it.
fn options() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

impl ValueCodec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, FetchError> {
        options()
            .serialize(value)
            .map_err(|err| FetchError::Serialization(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, FetchError> {
        options()
            .deserialize(payload)
            .map_err(|err| FetchError::Serialization(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Inner {
        id: u64,
        tags: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Outer {
        name: String,
        inner: Inner,
        counts: HashMap<bool, i64>,
    }

    #[test]
    fn round_trips_nested_value_with_map() {
        let value = Outer {
            name: "v".into(),
            inner: Inner {
                id: 7,
                tags: vec!["a".into(), "b".into()],
            },
            counts: HashMap::from([(true, 1), (false, -1)]),
        };

        let codec = BincodeCodec;
        let payload = codec.encode(&value).unwrap();
        let back: Outer = codec.decode(&payload).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn round_trips_plain_string() {
        let codec = BincodeCodec;
        let payload = codec.encode(&"hello".to_owned()).unwrap();
        let back: String = codec.decode(&payload).unwrap();
        assert_eq!(back, "hello");
    }

    #[test]
    fn shape_mismatch_fails_instead_of_coercing() {
        let codec = BincodeCodec;
        let payload = codec.encode(&true).unwrap();
        let err = codec.decode::<u64>(&payload).unwrap_err();
        assert!(matches!(err, FetchError::Serialization(_)));
    }

    #[test]
    fn trailing_bytes_fail_instead_of_being_ignored() {
        let codec = BincodeCodec;
        let mut payload = codec.encode(&7u64).unwrap();
        payload.push(0x2a);
        let err = codec.decode::<u64>(&payload).unwrap_err();
        assert!(matches!(err, FetchError::Serialization(_)));
    }

    #[test]
    fn truncated_payload_fails() {
        let codec = BincodeCodec;
        let mut payload = codec.encode(&"hello".to_owned()).unwrap();
        payload.truncate(payload.len() - 2);
        let err = codec.decode::<String>(&payload).unwrap_err();
        assert!(matches!(err, FetchError::Serialization(_)));
    }
}
