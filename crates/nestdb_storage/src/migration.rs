//! Schema migration steps.
//!
//! Migrations form an explicit ordered table keyed by the version they
//! upgrade from. [`run_pending`] applies steps sequentially until the
//! snapshot reaches the current schema; each step produces a complete new
//! snapshot, so the caller can commit the final result in one atomic write.

use crate::snapshot::{
    LegacySnapshot, Metadata, Snapshot, CURRENT_SCHEMA_VERSION, LEGACY_SCHEMA_VERSION,
};
use nestdb_codec::{assign, decode, encode, Path, Value};
use nestdb_protocol::{StoreError, StoreResult};
use std::collections::BTreeMap;

/// One migration step, upgrading a snapshot from `from_version` to
/// `from_version + 1`.
pub struct MigrationStep {
    /// The schema version this step upgrades from.
    pub from_version: u32,
    /// Short name, for logs.
    pub name: &'static str,
    /// The transformation itself, over raw snapshot JSON.
    pub run: fn(serde_json::Value) -> StoreResult<serde_json::Value>,
}

/// The ordered migration table.
#[must_use]
pub fn migration_table() -> &'static [MigrationStep] {
    &[MigrationStep {
        from_version: LEGACY_SCHEMA_VERSION,
        name: "collapse_path_rows",
        run: migrate_v1_to_v2,
    }]
}

/// Apply every pending step to a raw snapshot until it is current.
///
/// # Errors
///
/// Returns a storage error when the snapshot's version is missing, ahead of
/// current, or has no registered step, and propagates step failures. The
/// input is consumed; on error the caller's persisted snapshot is untouched.
pub fn run_pending(mut raw: serde_json::Value) -> StoreResult<serde_json::Value> {
    loop {
        let version = raw
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| StoreError::storage("snapshot has no schema_version"))?;

        if version == CURRENT_SCHEMA_VERSION {
            return Ok(raw);
        }
        if version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::storage(format!(
                "snapshot schema v{version} is ahead of current v{CURRENT_SCHEMA_VERSION}"
            )));
        }

        let step = migration_table()
            .iter()
            .find(|step| step.from_version == version)
            .ok_or_else(|| {
                StoreError::storage(format!("no migration step from schema v{version}"))
            })?;

        tracing::info!(from = version, step = step.name, "running migration step");
        raw = (step.run)(raw)?;
    }
}

/// v1 → v2: collapse one-row-per-`(key, path)` into one document per key,
/// and recover the legacy counter into the metadata record.
fn migrate_v1_to_v2(raw: serde_json::Value) -> StoreResult<serde_json::Value> {
    let legacy: LegacySnapshot = serde_json::from_value(raw)
        .map_err(|e| StoreError::storage_with("invalid v1 snapshot", e))?;

    let mut documents: BTreeMap<String, Value> = BTreeMap::new();
    for row in &legacy.rows {
        let path: Path = row.path.parse()?;
        let value = decode(&row.value)?;
        let doc = documents.entry(row.key.clone()).or_insert(Value::Null);
        if path.is_root() {
            *doc = value;
        } else {
            assign(doc, &path, value);
        }
    }

    let snapshot = Snapshot {
        schema_version: CURRENT_SCHEMA_VERSION,
        metadata: Metadata {
            name: legacy.name,
            schema_version: CURRENT_SCHEMA_VERSION,
            auto_key_counter: legacy.counter,
        },
        documents: documents
            .iter()
            .map(|(k, v)| Ok((k.clone(), encode(v)?)))
            .collect::<StoreResult<_>>()?,
    };

    serde_json::to_value(&snapshot)
        .map_err(|e| StoreError::storage_with("migrated snapshot serialization failed", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{parse_snapshot, LegacyRow, LoadedSnapshot};

    fn legacy_fixture() -> serde_json::Value {
        let rows = vec![
            LegacyRow {
                key: "1".into(),
                path: String::new(),
                value: encode(&Value::Int(10)).unwrap(),
            },
            LegacyRow {
                key: "2".into(),
                path: String::new(),
                value: encode(&Value::from("two")).unwrap(),
            },
            LegacyRow {
                key: "3".into(),
                path: String::new(),
                value: encode(&Value::Bool(true)).unwrap(),
            },
        ];
        serde_json::to_value(LegacySnapshot {
            schema_version: LEGACY_SCHEMA_VERSION,
            name: "legacy".into(),
            rows,
            counter: 10,
        })
        .unwrap()
    }

    #[test]
    fn v1_scalars_collapse_into_documents() {
        let migrated = run_pending(legacy_fixture()).unwrap();
        let text = serde_json::to_string(&migrated).unwrap();

        let LoadedSnapshot::Current(snap) = parse_snapshot(&text).unwrap() else {
            panic!("migration did not produce a current snapshot");
        };
        assert_eq!(snap.documents.len(), 3);
        assert_eq!(snap.metadata.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(snap.metadata.auto_key_counter, 10);
        assert_eq!(snap.metadata.name, "legacy");
        assert_eq!(decode(&snap.documents["1"]).unwrap(), Value::Int(10));
        assert_eq!(decode(&snap.documents["2"]).unwrap(), Value::from("two"));
        assert_eq!(decode(&snap.documents["3"]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn v1_path_rows_merge_per_key() {
        let rows = vec![
            LegacyRow {
                key: "user".into(),
                path: "name".into(),
                value: encode(&Value::from("Alice")).unwrap(),
            },
            LegacyRow {
                key: "user".into(),
                path: "tags[0]".into(),
                value: encode(&Value::from("admin")).unwrap(),
            },
        ];
        let raw = serde_json::to_value(LegacySnapshot {
            schema_version: LEGACY_SCHEMA_VERSION,
            name: "merge".into(),
            rows,
            counter: 0,
        })
        .unwrap();

        let migrated = run_pending(raw).unwrap();
        let text = serde_json::to_string(&migrated).unwrap();
        let LoadedSnapshot::Current(snap) = parse_snapshot(&text).unwrap() else {
            panic!("expected current snapshot");
        };
        let doc = decode(&snap.documents["user"]).unwrap();
        assert_eq!(
            doc,
            Value::mapping([
                ("name", Value::from("Alice")),
                ("tags", Value::sequence([Value::from("admin")])),
            ])
        );
    }

    #[test]
    fn current_snapshots_pass_through() {
        let snap = Snapshot::new("noop");
        let raw = serde_json::to_value(&snap).unwrap();
        let out = run_pending(raw.clone()).unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn future_versions_are_rejected() {
        let raw = serde_json::json!({ "schema_version": CURRENT_SCHEMA_VERSION + 1 });
        assert!(run_pending(raw).is_err());
    }
}
