//! Record serialization codecs
//!
//! The store is generic over how an ordered collection of records becomes
//! bytes on disk. Any round-trippable encoding satisfies the contract;
//! [`JsonCodec`] is the default and produces human-readable files,
//! [`CborCodec`] produces a compact binary form.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::storage::{StoreError, StoreResult};

/// Encodes and decodes an ordered collection of records
pub trait Codec<T>: Send + Sync + 'static {
    /// Serialize the collection to bytes
    fn encode(&self, items: &[T]) -> StoreResult<Vec<u8>>;

    /// Deserialize a collection from bytes
    fn decode(&self, bytes: &[u8]) -> StoreResult<Vec<T>>;
}

/// JSON codec, the default
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn encode(&self, items: &[T]) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(items).map_err(|e| StoreError::Encode {
            details: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> StoreResult<Vec<T>> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Decode {
            details: e.to_string(),
        })
    }
}

/// CBOR codec for compact binary files
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl<T> Codec<T> for CborCodec
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn encode(&self, items: &[T]) -> StoreResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(&items, &mut bytes).map_err(|e| StoreError::Encode {
            details: e.to_string(),
        })?;
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> StoreResult<Vec<T>> {
        ciborium::from_reader(bytes).map_err(|e: ciborium::de::Error<std::io::Error>| {
            StoreError::Decode {
                details: e.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        key: String,
        count: u32,
    }

    fn entries() -> Vec<Entry> {
        vec![
            Entry {
                key: "alpha".into(),
                count: 1,
            },
            Entry {
                key: "beta".into(),
                count: 2,
            },
        ]
    }

    #[test]
    fn test_json_round_trip() {
        let items = entries();
        let bytes = Codec::<Entry>::encode(&JsonCodec, &items).unwrap();
        let decoded: Vec<Entry> = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(decoded, items);
    }

    #[test]
    fn test_cbor_round_trip() {
        let items = entries();
        let bytes = Codec::<Entry>::encode(&CborCodec, &items).unwrap();
        let decoded: Vec<Entry> = CborCodec.decode(&bytes).unwrap();
        assert_eq!(decoded, items);
    }

    #[test]
    fn test_json_preserves_order() {
        let items: Vec<u32> = vec![3, 1, 2];
        let bytes = Codec::<u32>::encode(&JsonCodec, &items).unwrap();
        let decoded: Vec<u32> = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(decoded, vec![3, 1, 2]);
    }

    #[test]
    fn test_json_decode_failure() {
        let err = Codec::<Entry>::decode(&JsonCodec, b"{not json").unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));
    }

    #[test]
    fn test_cbor_decode_failure() {
        let err = Codec::<Entry>::decode(&CborCodec, b"\xff\xff\xff").unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));
    }
}
