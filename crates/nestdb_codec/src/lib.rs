//! # NestDB Codec
//!
//! Value model, path resolution, and the envelope codec for NestDB.
//!
//! This crate is the leaf of the workspace. It provides:
//! - [`Value`], the tagged-variant document tree
//! - [`Path`] parsing plus [`resolve`]/[`assign`]/[`remove`] tree walks
//! - [`encode`]/[`decode`] between values and storable [`Envelope`]s
//!
//! ## Round-trip guarantee
//!
//! `decode(encode(v))` deep-equals `v` for every supported value, including
//! kinds plain JSON cannot express (byte strings, timestamps, sets,
//! patterns, non-finite floats). Envelopes are stable when persisted as
//! strings and reloaded, and encoding is idempotent under repeated cycles.
//!
//! ## Usage
//!
//! ```
//! use nestdb_codec::{assign, decode, encode, resolve, Path, Value};
//!
//! let mut doc = Value::Null;
//! let path: Path = "user.tags[0]".parse().unwrap();
//! assign(&mut doc, &path, Value::from("admin"));
//! assert_eq!(resolve(&doc, &path), Some(&Value::from("admin")));
//!
//! let envelope = encode(&doc).unwrap();
//! assert_eq!(decode(&envelope).unwrap(), doc);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod envelope;
mod error;
mod path;
mod value;

pub use decoder::decode;
pub use encoder::encode;
pub use envelope::{Envelope, TypeTag, RESERVED_TAG_KEY};
pub use error::{CodecError, CodecResult, PathError};
pub use path::{assign, remove, resolve, resolve_mut, Path, PathSegment};
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn roundtrip(value: Value) {
        let envelope = encode(&value).unwrap();
        let decoded = decode(&envelope).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn roundtrip_scalars() {
        roundtrip(Value::Null);
        roundtrip(Value::Bool(false));
        roundtrip(Value::Int(-100));
        roundtrip(Value::Float(2.5));
        roundtrip(Value::from("hello world"));
    }

    #[test]
    fn roundtrip_bytes() {
        roundtrip(Value::Bytes(vec![0, 1, 2, 255]));
        roundtrip(Value::Bytes(Vec::new()));
    }

    #[test]
    fn roundtrip_timestamp() {
        let t = Utc.with_ymd_and_hms(2024, 6, 15, 12, 30, 45).unwrap();
        roundtrip(Value::Timestamp(t));
    }

    #[test]
    fn roundtrip_set_and_pattern() {
        roundtrip(Value::Set(vec![Value::Int(1), Value::from("two")]));
        roundtrip(Value::Pattern(r"^\d{4}-\d{2}$".into()));
    }

    #[test]
    fn roundtrip_nested() {
        let t = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        roundtrip(Value::mapping([
            (
                "users",
                Value::sequence([
                    Value::mapping([("name", Value::from("Alice")), ("age", Value::Int(30))]),
                    Value::mapping([("name", Value::from("Bob")), ("joined", Value::Timestamp(t))]),
                ]),
            ),
            ("blob", Value::Bytes(vec![1, 2, 3])),
            ("labels", Value::Set(vec![Value::from("a"), Value::from("b")])),
        ]));
    }

    #[test]
    fn roundtrip_mapping_with_reserved_key() {
        roundtrip(Value::mapping([
            (RESERVED_TAG_KEY, Value::from("timestamp")),
            ("value", Value::from("2024-01-01T00:00:00Z")),
        ]));
    }

    #[test]
    fn roundtrip_non_finite_floats() {
        roundtrip(Value::Float(f64::INFINITY));
        roundtrip(Value::Float(f64::NEG_INFINITY));
        let nan = decode(&encode(&Value::Float(f64::NAN)).unwrap()).unwrap();
        match nan {
            Value::Float(f) => assert!(f.is_nan()),
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn encode_is_idempotent_across_cycles() {
        let value = Value::mapping([("xs", Value::sequence([Value::Int(1), Value::Float(2.5)]))]);
        let first = encode(&value).unwrap();
        let second = encode(&decode(&first).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn envelope_survives_string_persistence() {
        let value = Value::mapping([("blob", Value::Bytes(vec![9, 8, 7]))]);
        let envelope = encode(&value).unwrap();

        // Store the envelope itself as a string, reload, decode.
        let stored = serde_json::to_string(&envelope).unwrap();
        let reloaded: Envelope = serde_json::from_str(&stored).unwrap();
        assert_eq!(decode(&reloaded).unwrap(), value);
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            (-1e9f64..1e9f64).prop_map(Value::Float),
            "[a-z0-9 ]{0,12}".prop_map(Value::String),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
            (0i64..4_000_000_000i64)
                .prop_map(|s| Value::Timestamp(Utc.timestamp_opt(s, 0).unwrap())),
            "[a-z*+.]{0,8}".prop_map(Value::Pattern),
        ];
        leaf.prop_recursive(3, 24, 6, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Sequence),
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Set),
                proptest::collection::btree_map("[a-z$]{1,6}", inner, 0..6)
                    .prop_map(Value::Mapping),
            ]
        })
    }

    proptest! {
        #[test]
        fn roundtrip_arbitrary_trees(value in arb_value()) {
            let envelope = encode(&value).unwrap();
            let decoded = decode(&envelope).unwrap();
            prop_assert_eq!(decoded, value);
        }
    }
}
