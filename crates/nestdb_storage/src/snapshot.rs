//! On-disk snapshot layout and schema history.

use nestdb_codec::Envelope;
use nestdb_protocol::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The schema version new stores are created at.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// The legacy one-row-per-path schema.
pub const LEGACY_SCHEMA_VERSION: u32 = 1;

/// Per-store metadata, persisted alongside the documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// The store's name.
    pub name: String,
    /// Schema version of the persisted layout. Only advances forward,
    /// through migration.
    pub schema_version: u32,
    /// Monotonic counter backing issued keys.
    pub auto_key_counter: u64,
}

impl Metadata {
    /// Fresh metadata for a new store at the current schema version.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema_version: CURRENT_SCHEMA_VERSION,
            auto_key_counter: 0,
        }
    }
}

/// The current on-disk layout: metadata plus one row per document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Schema version, duplicated at the top level so loaders can dispatch
    /// before committing to a layout.
    pub schema_version: u32,
    /// The store's metadata record.
    pub metadata: Metadata,
    /// One encoded row per document.
    pub documents: BTreeMap<String, Envelope>,
}

impl Snapshot {
    /// An empty snapshot for a new store.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            metadata: Metadata::new(name),
            documents: BTreeMap::new(),
        }
    }

    /// Render this snapshot as JSON text.
    ///
    /// # Errors
    ///
    /// Returns a storage error if serialization fails.
    pub fn to_json(&self) -> StoreResult<String> {
        serde_json::to_string(self)
            .map_err(|e| StoreError::storage_with("snapshot serialization failed", e))
    }
}

/// One row of the legacy layout: the envelope stored for one `(key, path)`
/// pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyRow {
    /// Document key.
    pub key: String,
    /// Path within the document, in string form.
    pub path: String,
    /// Encoded value at that path.
    pub value: Envelope,
}

/// The legacy v1 layout: one row per `(key, path)` pair plus a separate
/// counter row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacySnapshot {
    /// Schema version (always 1).
    pub schema_version: u32,
    /// The store's name.
    pub name: String,
    /// Every persisted `(key, path, value)` row.
    pub rows: Vec<LegacyRow>,
    /// The legacy auto-increment counter.
    pub counter: u64,
}

/// A snapshot parsed from disk, before schema dispatch.
#[derive(Debug)]
pub enum LoadedSnapshot {
    /// Current layout.
    Current(Snapshot),
    /// Legacy layout awaiting migration.
    Legacy(LegacySnapshot),
}

/// Parse a snapshot file, dispatching on its schema version.
///
/// # Errors
///
/// Returns a storage error for unreadable JSON, a missing or unknown
/// `schema_version`, or a body that does not match its declared layout.
pub fn parse_snapshot(text: &str) -> StoreResult<LoadedSnapshot> {
    let raw: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| StoreError::storage_with("unreadable snapshot", e))?;

    let version = raw
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| StoreError::storage("snapshot has no schema_version"))?;

    match u32::try_from(version) {
        Ok(LEGACY_SCHEMA_VERSION) => {
            let legacy: LegacySnapshot = serde_json::from_value(raw)
                .map_err(|e| StoreError::storage_with("invalid v1 snapshot", e))?;
            Ok(LoadedSnapshot::Legacy(legacy))
        }
        Ok(CURRENT_SCHEMA_VERSION) => {
            let snapshot: Snapshot = serde_json::from_value(raw)
                .map_err(|e| StoreError::storage_with("invalid v2 snapshot", e))?;
            Ok(LoadedSnapshot::Current(snapshot))
        }
        _ => Err(StoreError::storage(format!(
            "unsupported snapshot schema version {version}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestdb_codec::{encode, Value};

    #[test]
    fn new_snapshot_is_current_and_empty() {
        let snap = Snapshot::new("test");
        assert_eq!(snap.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(snap.metadata.auto_key_counter, 0);
        assert!(snap.documents.is_empty());
    }

    #[test]
    fn current_snapshot_round_trip() {
        let mut snap = Snapshot::new("round");
        snap.metadata.auto_key_counter = 3;
        snap.documents
            .insert("k".into(), encode(&Value::Int(7)).unwrap());

        let text = snap.to_json().unwrap();
        match parse_snapshot(&text).unwrap() {
            LoadedSnapshot::Current(parsed) => assert_eq!(parsed, snap),
            other => panic!("expected current snapshot, got {other:?}"),
        }
    }

    #[test]
    fn legacy_snapshot_parses() {
        let legacy = LegacySnapshot {
            schema_version: LEGACY_SCHEMA_VERSION,
            name: "old".into(),
            rows: vec![LegacyRow {
                key: "1".into(),
                path: String::new(),
                value: encode(&Value::Int(10)).unwrap(),
            }],
            counter: 10,
        };
        let text = serde_json::to_string(&legacy).unwrap();
        match parse_snapshot(&text).unwrap() {
            LoadedSnapshot::Legacy(parsed) => assert_eq!(parsed, legacy),
            other => panic!("expected legacy snapshot, got {other:?}"),
        }
    }

    #[test]
    fn unknown_versions_are_rejected() {
        assert!(parse_snapshot(r#"{"schema_version":99}"#).is_err());
        assert!(parse_snapshot(r#"{"documents":{}}"#).is_err());
        assert!(parse_snapshot("not json").is_err());
    }
}
