//! Envelope decoding.

use crate::envelope::{Envelope, TypeTag, RESERVED_TAG_KEY};
use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Decode an envelope back into a value.
///
/// Inverse of [`crate::encode`].
///
/// # Errors
///
/// Returns an error if the body is not valid JSON, a tagged object carries
/// an unrecognized tag or invalid payload, or the decoded value does not
/// match the envelope's top-level tag.
pub fn decode(envelope: &Envelope) -> CodecResult<Value> {
    let body: serde_json::Value = serde_json::from_str(&envelope.raw)
        .map_err(|e| CodecError::malformed_body(e.to_string()))?;
    let value = from_body(&body)?;

    let found = TypeTag::of(&value);
    if found != envelope.tag {
        return Err(CodecError::TagMismatch {
            expected: envelope.tag.as_str(),
            found: found.as_str(),
        });
    }
    Ok(value)
}

fn from_body(body: &serde_json::Value) -> CodecResult<Value> {
    match body {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(CodecError::invalid_structure("unrepresentable number"))
            }
        }
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        serde_json::Value::Array(items) => Ok(Value::Sequence(
            items.iter().map(from_body).collect::<CodecResult<_>>()?,
        )),
        serde_json::Value::Object(object) => match object.get(RESERVED_TAG_KEY) {
            Some(tag) => from_tagged(tag, object),
            None => Ok(Value::Mapping(decode_entries(object)?)),
        },
    }
}

fn decode_entries(
    object: &serde_json::Map<String, serde_json::Value>,
) -> CodecResult<BTreeMap<String, Value>> {
    object
        .iter()
        .map(|(k, v)| Ok((k.clone(), from_body(v)?)))
        .collect()
}

fn from_tagged(
    tag: &serde_json::Value,
    object: &serde_json::Map<String, serde_json::Value>,
) -> CodecResult<Value> {
    let tag = tag
        .as_str()
        .ok_or_else(|| CodecError::invalid_structure("$type must be a string"))?;
    let payload = object
        .get("value")
        .ok_or_else(|| CodecError::invalid_structure(format!("tagged {tag} object has no value")))?;

    match tag {
        "bytes" => {
            let text = payload
                .as_str()
                .ok_or_else(|| CodecError::invalid_structure("bytes payload must be a string"))?;
            let bytes = BASE64
                .decode(text)
                .map_err(|e| CodecError::invalid_structure(format!("bad base64: {e}")))?;
            Ok(Value::Bytes(bytes))
        }
        "timestamp" => {
            let text = payload.as_str().ok_or_else(|| {
                CodecError::invalid_structure("timestamp payload must be a string")
            })?;
            let parsed = DateTime::parse_from_rfc3339(text)
                .map_err(|e| CodecError::invalid_structure(format!("bad timestamp: {e}")))?;
            Ok(Value::Timestamp(parsed.with_timezone(&Utc)))
        }
        "set" => {
            let items = payload
                .as_array()
                .ok_or_else(|| CodecError::invalid_structure("set payload must be an array"))?;
            Ok(Value::Set(
                items.iter().map(from_body).collect::<CodecResult<_>>()?,
            ))
        }
        "pattern" => {
            let text = payload
                .as_str()
                .ok_or_else(|| CodecError::invalid_structure("pattern payload must be a string"))?;
            Ok(Value::Pattern(text.to_string()))
        }
        "float" => match payload.as_str() {
            Some("nan") => Ok(Value::Float(f64::NAN)),
            Some("inf") => Ok(Value::Float(f64::INFINITY)),
            Some("-inf") => Ok(Value::Float(f64::NEG_INFINITY)),
            _ => Err(CodecError::invalid_structure("bad non-finite float payload")),
        },
        "mapping" => {
            let inner = payload.as_object().ok_or_else(|| {
                CodecError::invalid_structure("mapping payload must be an object")
            })?;
            Ok(Value::Mapping(decode_entries(inner)?))
        }
        other => Err(CodecError::unknown_tag(other)),
    }
}
