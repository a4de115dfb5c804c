//! # entimap codec
//!
//! Document values and their canonical CBOR form.
//!
//! Documents are the unit the session engine compares during dirty checks
//! and the unit stores persist. Canonical encoding means two equal documents
//! always produce identical bytes, which keeps stored payloads stable across
//! rewrites of unchanged entities.
//!
//! ## Usage
//!
//! ```
//! use entimap_codec::{from_cbor, to_canonical_cbor, Value};
//!
//! let doc = Value::document().with("name", "Ada").with("born", 1815);
//! let bytes = to_canonical_cbor(&doc).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), doc);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod value;

pub use cbor::{encode_into, from_cbor, to_canonical_cbor, Decoder};
pub use error::{CodecError, CodecResult};
pub use value::{key_order, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
            "[a-z]{0,12}".prop_map(Value::Text),
        ]
    }

    fn document() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::vec(("[a-z_]{1,8}", inner), 0..6).prop_map(Value::map),
            ]
        })
    }

    proptest! {
        #[test]
        fn decoding_inverts_encoding(doc in document()) {
            let bytes = to_canonical_cbor(&doc).unwrap();
            prop_assert_eq!(from_cbor(&bytes).unwrap(), doc);
        }

        #[test]
        fn equal_documents_encode_identically(
            pairs in prop::collection::vec(("[a-z]{1,6}", any::<i64>()), 0..10)
        ) {
            let forward = Value::map(pairs.iter().map(|(k, v)| (k.clone(), Value::Integer(*v))));
            let mut dedup: Vec<(String, i64)> = Vec::new();
            for (k, v) in &pairs {
                dedup.retain(|(existing, _)| existing != k);
                dedup.push((k.clone(), *v));
            }
            let backward = Value::map(dedup.into_iter().rev().map(|(k, v)| (k, Value::Integer(v))));
            prop_assert_eq!(&forward, &backward);
            prop_assert_eq!(
                to_canonical_cbor(&forward).unwrap(),
                to_canonical_cbor(&backward).unwrap()
            );
        }
    }
}
