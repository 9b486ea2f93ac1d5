//! Envelope encoding.

use crate::envelope::{Envelope, TypeTag, RESERVED_TAG_KEY};
use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Encode a value into a storable envelope.
///
/// The body is JSON text. Kinds JSON cannot express natively — bytes,
/// timestamps, sets, patterns, non-finite floats — become tagged objects; a
/// literal mapping containing the reserved `$type` key is escape-wrapped so
/// the decoder never confuses it with a tagged object.
///
/// # Errors
///
/// Returns an error if the body cannot be rendered as JSON text.
pub fn encode(value: &Value) -> CodecResult<Envelope> {
    let body = to_body(value);
    let raw = serde_json::to_string(&body)
        .map_err(|e| CodecError::malformed_body(e.to_string()))?;
    Ok(Envelope {
        tag: TypeTag::of(value),
        raw,
    })
}

fn tagged(tag: &str, value: serde_json::Value) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    object.insert(RESERVED_TAG_KEY.to_string(), tag.into());
    object.insert("value".to_string(), value);
    serde_json::Value::Object(object)
}

fn to_body(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::Number((*n).into()),
        Value::Float(f) => match serde_json::Number::from_f64(*f) {
            Some(n) => serde_json::Value::Number(n),
            // Non-finite floats have no JSON number form.
            None => {
                let text = if f.is_nan() {
                    "nan"
                } else if *f > 0.0 {
                    "inf"
                } else {
                    "-inf"
                };
                tagged("float", text.into())
            }
        },
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => tagged("bytes", BASE64.encode(b).into()),
        Value::Sequence(items) => serde_json::Value::Array(items.iter().map(to_body).collect()),
        Value::Mapping(map) => {
            let object: serde_json::Map<String, serde_json::Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), to_body(v)))
                .collect();
            if map.contains_key(RESERVED_TAG_KEY) {
                tagged("mapping", serde_json::Value::Object(object))
            } else {
                serde_json::Value::Object(object)
            }
        }
        Value::Set(items) => tagged(
            "set",
            serde_json::Value::Array(items.iter().map(to_body).collect()),
        ),
        Value::Timestamp(t) => tagged("timestamp", t.to_rfc3339().into()),
        Value::Pattern(p) => tagged("pattern", p.clone().into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_bodies_are_plain_json() {
        assert_eq!(encode(&Value::Null).unwrap().raw, "null");
        assert_eq!(encode(&Value::Bool(true)).unwrap().raw, "true");
        assert_eq!(encode(&Value::Int(42)).unwrap().raw, "42");
        assert_eq!(encode(&Value::Float(1.5)).unwrap().raw, "1.5");
        assert_eq!(encode(&Value::from("hi")).unwrap().raw, "\"hi\"");
    }

    #[test]
    fn bytes_encode_as_tagged_base64() {
        let env = encode(&Value::Bytes(vec![1, 2, 3])).unwrap();
        assert_eq!(env.tag, TypeTag::Bytes);
        assert!(env.raw.contains("\"$type\":\"bytes\""));
        assert!(env.raw.contains(&BASE64.encode([1u8, 2, 3])));
    }

    #[test]
    fn reserved_key_mapping_is_escaped() {
        let map = Value::mapping([(RESERVED_TAG_KEY, Value::Int(1))]);
        let env = encode(&map).unwrap();
        assert_eq!(env.tag, TypeTag::Mapping);
        assert!(env.raw.contains("\"$type\":\"mapping\""));
    }

    #[test]
    fn non_finite_floats_are_tagged() {
        let env = encode(&Value::Float(f64::INFINITY)).unwrap();
        assert!(env.raw.contains("\"inf\""));
        let env = encode(&Value::Float(f64::NAN)).unwrap();
        assert!(env.raw.contains("\"nan\""));
    }
}
