//! Storable envelope representation.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved key marking a tagged object inside an envelope body.
///
/// Literal mappings containing this key are escape-wrapped by the encoder so
/// decoding stays unambiguous.
pub const RESERVED_TAG_KEY: &str = "$type";

/// Discriminator over every value kind the codec supports.
///
/// The discriminator is exhaustive: every [`Value`] variant maps to exactly
/// one tag, and the decoder rejects tags it does not recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    /// `Value::Null`
    Null,
    /// `Value::Bool`
    Bool,
    /// `Value::Int`
    Int,
    /// `Value::Float`
    Float,
    /// `Value::String`
    String,
    /// `Value::Bytes`
    Bytes,
    /// `Value::Sequence`
    Sequence,
    /// `Value::Mapping`
    Mapping,
    /// `Value::Set`
    Set,
    /// `Value::Timestamp`
    Timestamp,
    /// `Value::Pattern`
    Pattern,
}

impl TypeTag {
    /// The tag for a value.
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => TypeTag::Null,
            Value::Bool(_) => TypeTag::Bool,
            Value::Int(_) => TypeTag::Int,
            Value::Float(_) => TypeTag::Float,
            Value::String(_) => TypeTag::String,
            Value::Bytes(_) => TypeTag::Bytes,
            Value::Sequence(_) => TypeTag::Sequence,
            Value::Mapping(_) => TypeTag::Mapping,
            Value::Set(_) => TypeTag::Set,
            Value::Timestamp(_) => TypeTag::Timestamp,
            Value::Pattern(_) => TypeTag::Pattern,
        }
    }

    /// Stable text form of this tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::Null => "null",
            TypeTag::Bool => "bool",
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::String => "string",
            TypeTag::Bytes => "bytes",
            TypeTag::Sequence => "sequence",
            TypeTag::Mapping => "mapping",
            TypeTag::Set => "set",
            TypeTag::Timestamp => "timestamp",
            TypeTag::Pattern => "pattern",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The codec's reversible, storage-safe representation of a value.
///
/// `raw` is JSON text a string-only persistence layer can store verbatim;
/// `tag` is the top-level type discriminator. Value kinds JSON cannot
/// express natively appear inside `raw` as `{"$type": ..., "value": ...}`
/// objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Top-level type discriminator.
    pub tag: TypeTag,
    /// JSON body.
    pub raw: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_of_covers_every_kind() {
        assert_eq!(TypeTag::of(&Value::Null), TypeTag::Null);
        assert_eq!(TypeTag::of(&Value::Set(vec![])), TypeTag::Set);
        assert_eq!(TypeTag::of(&Value::Pattern("a*".into())), TypeTag::Pattern);
    }

    #[test]
    fn tag_serializes_lowercase() {
        let json = serde_json::to_string(&TypeTag::Timestamp).unwrap();
        assert_eq!(json, "\"timestamp\"");
    }

    #[test]
    fn envelope_serde_round_trip() {
        let env = Envelope {
            tag: TypeTag::Int,
            raw: "42".to_string(),
        };
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }
}
