//! File-based persistent backend.
//!
//! The reference persistent store. One JSON snapshot file holds the
//! metadata record and one encoded row per document; every mutation
//! rewrites the snapshot through a temp file and an atomic rename, so
//! single-document writes are all-or-nothing and a crash between the
//! auto-key increment and its persistence can never issue a key twice.

use crate::migration;
use crate::snapshot::{parse_snapshot, LoadedSnapshot, Metadata, Snapshot};
use crate::table::DocTable;
use async_trait::async_trait;
use fs2::FileExt;
use nestdb_codec::{decode, encode, Envelope, Value};
use nestdb_protocol::{
    Capabilities, LifecycleState, Method, Payload, PayloadResult, StoreBackend, StoreError,
    StoreResult,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path as FsPath, PathBuf};

fn missing(method: Method, field: &str) -> StoreError {
    StoreError::storage(format!("{method} payload is missing {field}"))
}

/// Configuration for opening a file store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store name recorded in the metadata.
    pub name: String,
    /// Create the store file if it does not exist.
    pub create_if_missing: bool,
    /// Sync the snapshot to disk before the rename on every write.
    pub sync_on_write: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "nestdb".to_string(),
            create_if_missing: true,
            sync_on_write: true,
        }
    }
}

impl Config {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the store name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set whether to create the store file if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Set whether to sync before every commit rename.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }
}

struct Inner {
    state: LifecycleState,
    table: DocTable,
    metadata: Metadata,
    /// Raw legacy snapshot retained while in `MigrationNeeded`, with its
    /// on-disk schema version.
    pending: Option<(u32, serde_json::Value)>,
    /// Advisory lock held while the store is open.
    lock_file: Option<File>,
}

/// The persistent reference backend.
///
/// # Durability
///
/// - Every mutation rewrites the snapshot atomically (temp file + rename)
/// - `sync_on_write` syncs the temp file before the rename (safer, slower)
/// - An exclusive advisory lock (`<store>.lock`) guards against concurrent
///   process access
///
/// # Schema
///
/// Stores persisted by older versions are detected at `init` and move the
/// backend to `MigrationNeeded`; see [`crate::migration`].
pub struct FileBackend {
    path: PathBuf,
    config: Config,
    inner: RwLock<Inner>,
}

impl FileBackend {
    /// Create a backend over a store file. No I/O happens until `init`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            path: path.into(),
            config,
            inner: RwLock::new(Inner {
                state: LifecycleState::Uninitialized,
                table: DocTable::new(),
                metadata: Metadata::new(""),
                pending: None,
                lock_file: None,
            }),
        }
    }

    /// Create a backend with the default configuration.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Config::default())
    }

    /// The path of the store file.
    #[must_use]
    pub fn path(&self) -> &FsPath {
        &self.path
    }

    fn check_ready(inner: &Inner, method: Method) -> StoreResult<()> {
        match inner.state {
            LifecycleState::Ready => Ok(()),
            LifecycleState::MigrationNeeded => {
                let found = inner.pending.as_ref().map(|(v, _)| *v).unwrap_or(0);
                Err(StoreError::needs_migration(
                    found,
                    crate::snapshot::CURRENT_SCHEMA_VERSION,
                ))
            }
            other => Err(StoreError::lifecycle(other, method)),
        }
    }

    fn encode_documents(table: &DocTable) -> StoreResult<BTreeMap<String, Envelope>> {
        table
            .documents()
            .iter()
            .map(|(k, v)| Ok((k.clone(), encode(v)?)))
            .collect()
    }

    fn decode_documents(documents: &BTreeMap<String, Envelope>) -> StoreResult<DocTable> {
        let decoded = documents
            .iter()
            .map(|(k, env)| Ok((k.clone(), decode(env)?)))
            .collect::<StoreResult<BTreeMap<String, Value>>>()?;
        Ok(DocTable::from_documents(decoded))
    }

    /// Write snapshot text through a temp file and an atomic rename.
    fn write_file(&self, text: &str) -> StoreResult<()> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(text.as_bytes())?;
            if self.config.sync_on_write {
                file.sync_all()?;
            }
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn persist(&self, metadata: &Metadata, table: &DocTable) -> StoreResult<()> {
        let snapshot = Snapshot {
            schema_version: crate::snapshot::CURRENT_SCHEMA_VERSION,
            metadata: metadata.clone(),
            documents: Self::encode_documents(table)?,
        };
        self.write_file(&snapshot.to_json()?)
    }

    /// Persist a staged table, then swap it in. The in-memory state only
    /// changes once the snapshot is durably on disk.
    fn commit(&self, inner: &mut Inner, table: DocTable) -> StoreResult<()> {
        self.persist(&inner.metadata, &table)?;
        inner.table = table;
        Ok(())
    }

    fn acquire_lock(&self) -> StoreResult<File> {
        let lock_path = self.path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::storage(format!(
                "another process holds the lock for {}",
                self.path.display()
            )));
        }
        Ok(lock_file)
    }
}

#[async_trait]
impl StoreBackend for FileBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities::full()
    }

    fn state(&self) -> LifecycleState {
        self.inner.read().state
    }

    async fn init(&self, payload: Payload) -> StoreResult<Payload> {
        let mut inner = self.inner.write();
        match inner.state {
            LifecycleState::Uninitialized => {}
            // Re-init on an open store is a no-op.
            LifecycleState::Ready | LifecycleState::MigrationNeeded => {
                return Ok(payload.ok(PayloadResult::Ack));
            }
            LifecycleState::Closed => {
                return Err(StoreError::lifecycle(LifecycleState::Closed, Method::Init));
            }
        }

        if self.config.create_if_missing {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let lock_file = self.acquire_lock()?;

        match std::fs::read_to_string(&self.path) {
            Ok(text) => match parse_snapshot(&text)? {
                LoadedSnapshot::Current(snapshot) => {
                    inner.table = Self::decode_documents(&snapshot.documents)?;
                    inner.metadata = snapshot.metadata;
                    inner.state = LifecycleState::Ready;
                }
                LoadedSnapshot::Legacy(legacy) => {
                    tracing::info!(
                        store = %legacy.name,
                        found = legacy.schema_version,
                        "store schema is behind current, migration needed"
                    );
                    let raw = serde_json::from_str(&text)
                        .map_err(|e| StoreError::storage_with("unreadable snapshot", e))?;
                    inner.pending = Some((legacy.schema_version, raw));
                    inner.state = LifecycleState::MigrationNeeded;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !self.config.create_if_missing {
                    return Err(StoreError::storage(format!(
                        "store {} does not exist and create_if_missing is false",
                        self.path.display()
                    )));
                }
                let metadata = Metadata::new(self.config.name.clone());
                let table = DocTable::new();
                self.persist(&metadata, &table)?;
                inner.metadata = metadata;
                inner.table = table;
                inner.state = LifecycleState::Ready;
                tracing::info!(store = %self.config.name, "created new store");
            }
            Err(e) => return Err(e.into()),
        }

        inner.lock_file = Some(lock_file);
        Ok(payload.ok(PayloadResult::Ack))
    }

    async fn close(&self) -> StoreResult<()> {
        let mut inner = self.inner.write();
        // Dropping the handle releases the advisory lock.
        inner.lock_file = None;
        inner.state = LifecycleState::Closed;
        Ok(())
    }

    async fn migrate(&self) -> StoreResult<()> {
        let mut inner = self.inner.write();
        match inner.state {
            LifecycleState::Ready => Ok(()),
            LifecycleState::MigrationNeeded => {
                let (_, raw) = inner
                    .pending
                    .clone()
                    .ok_or_else(|| StoreError::storage("no pending snapshot to migrate"))?;

                let migrated = migration::run_pending(raw)?;
                let snapshot: Snapshot = serde_json::from_value(migrated)
                    .map_err(|e| StoreError::storage_with("invalid migrated snapshot", e))?;
                let table = Self::decode_documents(&snapshot.documents)?;

                // One atomic rename commits the whole migration.
                self.write_file(&snapshot.to_json()?)?;

                inner.table = table;
                inner.metadata = snapshot.metadata;
                inner.pending = None;
                inner.state = LifecycleState::Ready;
                tracing::info!(store = %inner.metadata.name, "migration complete");
                Ok(())
            }
            other => Err(StoreError::lifecycle(other, Method::Init)),
        }
    }

    async fn get(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::Get)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Get, "key")));
        };
        let value = inner.table.get(&key, &payload.path);
        Ok(payload.ok(PayloadResult::Value(value)))
    }

    async fn get_all(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::GetAll)?;
        Ok(payload.ok(PayloadResult::Documents(inner.table.get_all())))
    }

    async fn get_many(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::GetMany)?;
        let found = inner.table.get_many(&payload.keys);
        Ok(payload.ok(PayloadResult::Lookup(found)))
    }

    async fn set(&self, payload: Payload) -> StoreResult<Payload> {
        let mut inner = self.inner.write();
        Self::check_ready(&inner, Method::Set)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Set, "key")));
        };
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::Set, "data")));
        };
        let mut table = inner.table.clone();
        table.set(&key, &payload.path, data);
        match self.commit(&mut inner, table) {
            Ok(()) => Ok(payload.ok(PayloadResult::Ack)),
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn set_many(&self, payload: Payload) -> StoreResult<Payload> {
        let mut inner = self.inner.write();
        Self::check_ready(&inner, Method::SetMany)?;
        let mut table = inner.table.clone();
        for (key, value) in &payload.entries {
            table.set(key, &payload.path, value.clone());
        }
        match self.commit(&mut inner, table) {
            Ok(()) => Ok(payload.ok(PayloadResult::Ack)),
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn delete(&self, payload: Payload) -> StoreResult<Payload> {
        let mut inner = self.inner.write();
        Self::check_ready(&inner, Method::Delete)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Delete, "key")));
        };
        let mut table = inner.table.clone();
        table.delete(&key, &payload.path);
        match self.commit(&mut inner, table) {
            Ok(()) => Ok(payload.ok(PayloadResult::Ack)),
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn delete_many(&self, payload: Payload) -> StoreResult<Payload> {
        let mut inner = self.inner.write();
        Self::check_ready(&inner, Method::DeleteMany)?;
        let mut table = inner.table.clone();
        for key in &payload.keys {
            table.delete(key, &payload.path);
        }
        match self.commit(&mut inner, table) {
            Ok(()) => Ok(payload.ok(PayloadResult::Ack)),
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn has(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::Has)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Has, "key")));
        };
        let found = inner.table.has(&key, &payload.path);
        Ok(payload.ok(PayloadResult::Bool(found)))
    }

    async fn inc(&self, payload: Payload) -> StoreResult<Payload> {
        let mut inner = self.inner.write();
        Self::check_ready(&inner, Method::Inc)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Inc, "key")));
        };
        let mut table = inner.table.clone();
        match table.adjust(&key, &payload.path, 1) {
            Ok(next) => match self.commit(&mut inner, table) {
                Ok(()) => Ok(payload.ok(PayloadResult::Value(Some(next)))),
                Err(e) => Ok(payload.fail(e)),
            },
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn dec(&self, payload: Payload) -> StoreResult<Payload> {
        let mut inner = self.inner.write();
        Self::check_ready(&inner, Method::Dec)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Dec, "key")));
        };
        let mut table = inner.table.clone();
        match table.adjust(&key, &payload.path, -1) {
            Ok(next) => match self.commit(&mut inner, table) {
                Ok(()) => Ok(payload.ok(PayloadResult::Value(Some(next)))),
                Err(e) => Ok(payload.fail(e)),
            },
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn math(&self, payload: Payload) -> StoreResult<Payload> {
        let mut inner = self.inner.write();
        Self::check_ready(&inner, Method::Math)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Math, "key")));
        };
        let Some(op) = payload.op else {
            return Ok(payload.fail(missing(Method::Math, "operator")));
        };
        let Some(operand) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::Math, "operand")));
        };
        let mut table = inner.table.clone();
        match table.math(&key, &payload.path, op, &operand) {
            Ok(next) => match self.commit(&mut inner, table) {
                Ok(()) => Ok(payload.ok(PayloadResult::Value(Some(next)))),
                Err(e) => Ok(payload.fail(e)),
            },
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn push(&self, payload: Payload) -> StoreResult<Payload> {
        let mut inner = self.inner.write();
        Self::check_ready(&inner, Method::Push)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Push, "key")));
        };
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::Push, "data")));
        };
        let mut table = inner.table.clone();
        match table.push(&key, &payload.path, data) {
            Ok(()) => match self.commit(&mut inner, table) {
                Ok(()) => Ok(payload.ok(PayloadResult::Ack)),
                Err(e) => Ok(payload.fail(e)),
            },
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn remove(&self, payload: Payload) -> StoreResult<Payload> {
        let mut inner = self.inner.write();
        Self::check_ready(&inner, Method::Remove)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Remove, "key")));
        };
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::Remove, "data")));
        };
        let mut table = inner.table.clone();
        match table.remove_matching(&key, &payload.path, &data) {
            Ok(()) => match self.commit(&mut inner, table) {
                Ok(()) => Ok(payload.ok(PayloadResult::Ack)),
                Err(e) => Ok(payload.fail(e)),
            },
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn includes(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::Includes)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Includes, "key")));
        };
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::Includes, "data")));
        };
        match inner.table.includes(&key, &payload.path, &data) {
            Ok(contained) => Ok(payload.ok(PayloadResult::Bool(contained))),
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn filter_by_data(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::FilterByData)?;
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::FilterByData, "data")));
        };
        let docs = inner.table.filter_by_data(&payload.path, &data);
        Ok(payload.ok(PayloadResult::Documents(docs)))
    }

    async fn filter_by_hook(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::FilterByHook)?;
        let Some(hook) = payload.predicate.clone() else {
            return Ok(payload.fail(missing(Method::FilterByHook, "predicate")));
        };
        let docs = inner.table.filter_by_hook(&payload.path, &hook);
        Ok(payload.ok(PayloadResult::Documents(docs)))
    }

    async fn find_by_data(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::FindByData)?;
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::FindByData, "data")));
        };
        let entry = inner.table.find_by_data(&payload.path, &data);
        Ok(payload.ok(PayloadResult::Found(entry)))
    }

    async fn find_by_hook(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::FindByHook)?;
        let Some(hook) = payload.predicate.clone() else {
            return Ok(payload.fail(missing(Method::FindByHook, "predicate")));
        };
        let entry = inner.table.find_by_hook(&payload.path, &hook);
        Ok(payload.ok(PayloadResult::Found(entry)))
    }

    async fn some_by_data(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::SomeByData)?;
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::SomeByData, "data")));
        };
        let found = inner.table.some_by_data(&payload.path, &data);
        Ok(payload.ok(PayloadResult::Bool(found)))
    }

    async fn some_by_hook(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::SomeByHook)?;
        let Some(hook) = payload.predicate.clone() else {
            return Ok(payload.fail(missing(Method::SomeByHook, "predicate")));
        };
        let found = inner.table.some_by_hook(&payload.path, &hook);
        Ok(payload.ok(PayloadResult::Bool(found)))
    }

    async fn every_by_data(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::EveryByData)?;
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::EveryByData, "data")));
        };
        let found = inner.table.every_by_data(&payload.path, &data);
        Ok(payload.ok(PayloadResult::Bool(found)))
    }

    async fn every_by_hook(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::EveryByHook)?;
        let Some(hook) = payload.predicate.clone() else {
            return Ok(payload.fail(missing(Method::EveryByHook, "predicate")));
        };
        let found = inner.table.every_by_hook(&payload.path, &hook);
        Ok(payload.ok(PayloadResult::Bool(found)))
    }

    async fn update_by_data(&self, payload: Payload) -> StoreResult<Payload> {
        let mut inner = self.inner.write();
        Self::check_ready(&inner, Method::UpdateByData)?;
        let Some(expected) = payload.expected.clone() else {
            return Ok(payload.fail(missing(Method::UpdateByData, "expected")));
        };
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::UpdateByData, "data")));
        };
        let mut table = inner.table.clone();
        let updated = table.update_by_data(&payload.path, &expected, &data);
        match self.commit(&mut inner, table) {
            Ok(()) => Ok(payload.ok(PayloadResult::Documents(updated))),
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn update_by_hook(&self, payload: Payload) -> StoreResult<Payload> {
        let mut inner = self.inner.write();
        Self::check_ready(&inner, Method::UpdateByHook)?;
        let Some(hook) = payload.update.clone() else {
            return Ok(payload.fail(missing(Method::UpdateByHook, "update hook")));
        };
        let mut table = inner.table.clone();
        let updated = table.update_by_hook(&payload.path, &hook);
        match self.commit(&mut inner, table) {
            Ok(()) => Ok(payload.ok(PayloadResult::Documents(updated))),
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn keys(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::Keys)?;
        Ok(payload.ok(PayloadResult::Keys(inner.table.keys())))
    }

    async fn values(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::Values)?;
        Ok(payload.ok(PayloadResult::Values(inner.table.values())))
    }

    async fn entries(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::Entries)?;
        let docs: BTreeMap<String, Value> = inner.table.entries().into_iter().collect();
        Ok(payload.ok(PayloadResult::Documents(docs)))
    }

    async fn size(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::Size)?;
        Ok(payload.ok(PayloadResult::Count(inner.table.len())))
    }

    async fn random(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::Random)?;
        let count = payload.count.unwrap_or(1);
        let sampled =
            inner
                .table
                .sample_values(count, payload.allow_duplicates, &mut rand::thread_rng());
        Ok(payload.ok(PayloadResult::Values(sampled)))
    }

    async fn random_key(&self, payload: Payload) -> StoreResult<Payload> {
        let inner = self.inner.read();
        Self::check_ready(&inner, Method::RandomKey)?;
        let count = payload.count.unwrap_or(1);
        let sampled =
            inner
                .table
                .sample_keys(count, payload.allow_duplicates, &mut rand::thread_rng());
        Ok(payload.ok(PayloadResult::Keys(sampled)))
    }

    async fn auto_key(&self, payload: Payload) -> StoreResult<Payload> {
        let mut inner = self.inner.write();
        Self::check_ready(&inner, Method::AutoKey)?;

        let mut metadata = inner.metadata.clone();
        metadata.auto_key_counter += 1;
        let key = metadata.auto_key_counter.to_string();

        // The incremented counter must be durable before the key is issued.
        match self.persist(&metadata, &inner.table) {
            Ok(()) => {
                inner.metadata = metadata;
                Ok(payload.ok(PayloadResult::NewKey(key)))
            }
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn clear(&self, payload: Payload) -> StoreResult<Payload> {
        let mut inner = self.inner.write();
        Self::check_ready(&inner, Method::Clear)?;
        let mut table = inner.table.clone();
        table.clear();
        match self.commit(&mut inner, table) {
            Ok(()) => Ok(payload.ok(PayloadResult::Ack)),
            Err(e) => Ok(payload.fail(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{LegacyRow, LegacySnapshot, LEGACY_SCHEMA_VERSION};
    use tempfile::tempdir;

    async fn open_at(path: &FsPath) -> FileBackend {
        let backend = FileBackend::open(path);
        backend
            .init(Payload::request(Method::Init))
            .await
            .unwrap()
            .resolve()
            .unwrap();
        backend
    }

    fn set_payload(key: &str, value: Value) -> Payload {
        Payload::request(Method::Set).with_key(key).with_data(value)
    }

    #[tokio::test]
    async fn init_creates_store_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let backend = open_at(&path).await;
        assert!(path.exists());
        assert_eq!(backend.state(), LifecycleState::Ready);
    }

    #[tokio::test]
    async fn missing_store_without_create_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let backend = FileBackend::new(&path, Config::new().create_if_missing(false));
        let result = backend.init(Payload::request(Method::Init)).await;
        assert!(matches!(result, Err(StoreError::Storage { .. })));
    }

    #[tokio::test]
    async fn documents_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        {
            let backend = open_at(&path).await;
            backend
                .set(set_payload("k", Value::mapping([("x", Value::Int(1))])))
                .await
                .unwrap()
                .resolve()
                .unwrap();
            backend.close().await.unwrap();
        }
        {
            let backend = open_at(&path).await;
            let value = backend
                .get(Payload::request(Method::Get).with_key("k"))
                .await
                .unwrap()
                .resolve()
                .unwrap()
                .into_value(Method::Get)
                .unwrap();
            assert_eq!(value, Some(Value::mapping([("x", Value::Int(1))])));
        }
    }

    #[tokio::test]
    async fn auto_key_counter_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        {
            let backend = open_at(&path).await;
            for _ in 0..3 {
                backend
                    .auto_key(Payload::request(Method::AutoKey))
                    .await
                    .unwrap()
                    .resolve()
                    .unwrap();
            }
            backend.close().await.unwrap();
        }
        {
            let backend = open_at(&path).await;
            let key = backend
                .auto_key(Payload::request(Method::AutoKey))
                .await
                .unwrap()
                .resolve()
                .unwrap()
                .into_new_key(Method::AutoKey)
                .unwrap();
            assert_eq!(key, "4");
        }
    }

    #[tokio::test]
    async fn lock_prevents_second_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let first = open_at(&path).await;

        let second = FileBackend::open(&path);
        let result = second.init(Payload::request(Method::Init)).await;
        assert!(matches!(result, Err(StoreError::Storage { .. })));

        first.close().await.unwrap();
        let third = FileBackend::open(&path);
        assert!(third.init(Payload::request(Method::Init)).await.is_ok());
    }

    fn write_legacy(path: &FsPath) {
        let rows = vec![
            LegacyRow {
                key: "1".into(),
                path: String::new(),
                value: encode(&Value::Int(10)).unwrap(),
            },
            LegacyRow {
                key: "2".into(),
                path: String::new(),
                value: encode(&Value::Int(20)).unwrap(),
            },
            LegacyRow {
                key: "3".into(),
                path: String::new(),
                value: encode(&Value::Int(30)).unwrap(),
            },
        ];
        let legacy = LegacySnapshot {
            schema_version: LEGACY_SCHEMA_VERSION,
            name: "legacy".into(),
            rows,
            counter: 10,
        };
        std::fs::write(path, serde_json::to_string(&legacy).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn legacy_store_requires_migration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        write_legacy(&path);

        let backend = FileBackend::open(&path);
        backend
            .init(Payload::request(Method::Init))
            .await
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(backend.state(), LifecycleState::MigrationNeeded);

        let refused = backend.get(Payload::request(Method::Get).with_key("1")).await;
        assert!(matches!(
            refused,
            Err(StoreError::NeedsMigration {
                found: 1,
                current: 2
            })
        ));
    }

    #[tokio::test]
    async fn migration_collapses_rows_and_recovers_counter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        write_legacy(&path);

        let backend = FileBackend::open(&path);
        backend
            .init(Payload::request(Method::Init))
            .await
            .unwrap();
        backend.migrate().await.unwrap();
        assert_eq!(backend.state(), LifecycleState::Ready);

        let size = backend
            .size(Payload::request(Method::Size))
            .await
            .unwrap()
            .resolve()
            .unwrap()
            .into_count(Method::Size)
            .unwrap();
        assert_eq!(size, 3);

        let key = backend
            .auto_key(Payload::request(Method::AutoKey))
            .await
            .unwrap()
            .resolve()
            .unwrap()
            .into_new_key(Method::AutoKey)
            .unwrap();
        assert_eq!(key, "11");

        // The migrated snapshot is durable: reopen and check.
        backend.close().await.unwrap();
        let reopened = open_at(&path).await;
        assert_eq!(reopened.state(), LifecycleState::Ready);
    }

    #[tokio::test]
    async fn failed_migration_leaves_store_usable_under_old_contract() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        // A v1 snapshot with a corrupt row: decode fails mid-migration.
        let legacy = serde_json::json!({
            "schema_version": 1,
            "name": "broken",
            "rows": [
                { "key": "1", "path": "", "value": { "tag": "int", "raw": "not json" } }
            ],
            "counter": 5,
        });
        std::fs::write(&path, legacy.to_string()).unwrap();

        let backend = FileBackend::open(&path);
        backend
            .init(Payload::request(Method::Init))
            .await
            .unwrap();
        assert!(backend.migrate().await.is_err());

        // No partial rewrite is visible, and the store still reports
        // MigrationNeeded.
        assert_eq!(backend.state(), LifecycleState::MigrationNeeded);
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert!(on_disk.contains("\"schema_version\":1"));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let backend = open_at(&path).await;
        backend.close().await.unwrap();
        backend.close().await.unwrap();
        assert_eq!(backend.state(), LifecycleState::Closed);
    }
}
