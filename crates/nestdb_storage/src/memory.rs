//! In-memory storage backend.

use crate::table::DocTable;
use nestdb_codec::Value;
use nestdb_protocol::{
    Capabilities, LifecycleState, Method, Payload, PayloadResult, StoreBackend, StoreError,
    StoreResult,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

fn missing(method: Method, field: &str) -> StoreError {
    StoreError::storage(format!("{method} payload is missing {field}"))
}

/// An in-memory backend implementing the full capability set.
///
/// Suitable for unit tests, integration tests, and ephemeral stores that do
/// not need persistence. The auto-key counter is monotonic for the process
/// lifetime of the backend.
///
/// # Thread Safety
///
/// The backend is thread-safe; the engine additionally serializes operations
/// per store.
#[derive(Debug)]
pub struct MemoryBackend {
    state: RwLock<LifecycleState>,
    table: RwLock<DocTable>,
    counter: RwLock<u64>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend. It must still be opened through `init`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::Uninitialized),
            table: RwLock::new(DocTable::new()),
            counter: RwLock::new(0),
        }
    }

    /// Create a backend pre-seeded with documents. Useful for tests.
    #[must_use]
    pub fn with_documents(documents: BTreeMap<String, Value>) -> Self {
        Self {
            state: RwLock::new(LifecycleState::Uninitialized),
            table: RwLock::new(DocTable::from_documents(documents)),
            counter: RwLock::new(0),
        }
    }

    fn check_ready(&self, method: Method) -> StoreResult<()> {
        let state = *self.state.read();
        if state == LifecycleState::Ready {
            Ok(())
        } else {
            Err(StoreError::lifecycle(state, method))
        }
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities::full()
    }

    fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    async fn init(&self, payload: Payload) -> StoreResult<Payload> {
        let mut state = self.state.write();
        match *state {
            LifecycleState::Uninitialized | LifecycleState::Ready => {
                *state = LifecycleState::Ready;
                Ok(payload.ok(PayloadResult::Ack))
            }
            other => Err(StoreError::lifecycle(other, Method::Init)),
        }
    }

    async fn close(&self) -> StoreResult<()> {
        *self.state.write() = LifecycleState::Closed;
        Ok(())
    }

    async fn get(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::Get)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Get, "key")));
        };
        let value = self.table.read().get(&key, &payload.path);
        Ok(payload.ok(PayloadResult::Value(value)))
    }

    async fn get_all(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::GetAll)?;
        let docs = self.table.read().get_all();
        Ok(payload.ok(PayloadResult::Documents(docs)))
    }

    async fn get_many(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::GetMany)?;
        let found = self.table.read().get_many(&payload.keys);
        Ok(payload.ok(PayloadResult::Lookup(found)))
    }

    async fn set(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::Set)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Set, "key")));
        };
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::Set, "data")));
        };
        self.table.write().set(&key, &payload.path, data);
        Ok(payload.ok(PayloadResult::Ack))
    }

    async fn set_many(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::SetMany)?;
        let mut table = self.table.write();
        for (key, value) in &payload.entries {
            table.set(key, &payload.path, value.clone());
        }
        drop(table);
        Ok(payload.ok(PayloadResult::Ack))
    }

    async fn delete(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::Delete)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Delete, "key")));
        };
        self.table.write().delete(&key, &payload.path);
        Ok(payload.ok(PayloadResult::Ack))
    }

    async fn delete_many(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::DeleteMany)?;
        let mut table = self.table.write();
        for key in &payload.keys {
            table.delete(key, &payload.path);
        }
        drop(table);
        Ok(payload.ok(PayloadResult::Ack))
    }

    async fn has(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::Has)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Has, "key")));
        };
        let present = self.table.read().has(&key, &payload.path);
        Ok(payload.ok(PayloadResult::Bool(present)))
    }

    async fn inc(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::Inc)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Inc, "key")));
        };
        match self.table.write().adjust(&key, &payload.path, 1) {
            Ok(next) => Ok(payload.ok(PayloadResult::Value(Some(next)))),
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn dec(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::Dec)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Dec, "key")));
        };
        match self.table.write().adjust(&key, &payload.path, -1) {
            Ok(next) => Ok(payload.ok(PayloadResult::Value(Some(next)))),
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn math(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::Math)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Math, "key")));
        };
        let Some(op) = payload.op else {
            return Ok(payload.fail(missing(Method::Math, "operator")));
        };
        let Some(operand) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::Math, "operand")));
        };
        match self.table.write().math(&key, &payload.path, op, &operand) {
            Ok(next) => Ok(payload.ok(PayloadResult::Value(Some(next)))),
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn push(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::Push)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Push, "key")));
        };
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::Push, "data")));
        };
        match self.table.write().push(&key, &payload.path, data) {
            Ok(()) => Ok(payload.ok(PayloadResult::Ack)),
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn remove(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::Remove)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Remove, "key")));
        };
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::Remove, "data")));
        };
        match self
            .table
            .write()
            .remove_matching(&key, &payload.path, &data)
        {
            Ok(()) => Ok(payload.ok(PayloadResult::Ack)),
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn includes(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::Includes)?;
        let Some(key) = payload.key.clone() else {
            return Ok(payload.fail(missing(Method::Includes, "key")));
        };
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::Includes, "data")));
        };
        match self.table.read().includes(&key, &payload.path, &data) {
            Ok(contained) => Ok(payload.ok(PayloadResult::Bool(contained))),
            Err(e) => Ok(payload.fail(e)),
        }
    }

    async fn filter_by_data(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::FilterByData)?;
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::FilterByData, "data")));
        };
        let docs = self.table.read().filter_by_data(&payload.path, &data);
        Ok(payload.ok(PayloadResult::Documents(docs)))
    }

    async fn filter_by_hook(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::FilterByHook)?;
        let Some(hook) = payload.predicate.clone() else {
            return Ok(payload.fail(missing(Method::FilterByHook, "predicate")));
        };
        let docs = self.table.read().filter_by_hook(&payload.path, &hook);
        Ok(payload.ok(PayloadResult::Documents(docs)))
    }

    async fn find_by_data(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::FindByData)?;
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::FindByData, "data")));
        };
        let entry = self.table.read().find_by_data(&payload.path, &data);
        Ok(payload.ok(PayloadResult::Found(entry)))
    }

    async fn find_by_hook(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::FindByHook)?;
        let Some(hook) = payload.predicate.clone() else {
            return Ok(payload.fail(missing(Method::FindByHook, "predicate")));
        };
        let entry = self.table.read().find_by_hook(&payload.path, &hook);
        Ok(payload.ok(PayloadResult::Found(entry)))
    }

    async fn some_by_data(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::SomeByData)?;
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::SomeByData, "data")));
        };
        let answer = self.table.read().some_by_data(&payload.path, &data);
        Ok(payload.ok(PayloadResult::Bool(answer)))
    }

    async fn some_by_hook(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::SomeByHook)?;
        let Some(hook) = payload.predicate.clone() else {
            return Ok(payload.fail(missing(Method::SomeByHook, "predicate")));
        };
        let answer = self.table.read().some_by_hook(&payload.path, &hook);
        Ok(payload.ok(PayloadResult::Bool(answer)))
    }

    async fn every_by_data(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::EveryByData)?;
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::EveryByData, "data")));
        };
        let answer = self.table.read().every_by_data(&payload.path, &data);
        Ok(payload.ok(PayloadResult::Bool(answer)))
    }

    async fn every_by_hook(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::EveryByHook)?;
        let Some(hook) = payload.predicate.clone() else {
            return Ok(payload.fail(missing(Method::EveryByHook, "predicate")));
        };
        let answer = self.table.read().every_by_hook(&payload.path, &hook);
        Ok(payload.ok(PayloadResult::Bool(answer)))
    }

    async fn update_by_data(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::UpdateByData)?;
        let Some(expected) = payload.expected.clone() else {
            return Ok(payload.fail(missing(Method::UpdateByData, "expected")));
        };
        let Some(data) = payload.data.clone() else {
            return Ok(payload.fail(missing(Method::UpdateByData, "data")));
        };
        let updated = self
            .table
            .write()
            .update_by_data(&payload.path, &expected, &data);
        Ok(payload.ok(PayloadResult::Documents(updated)))
    }

    async fn update_by_hook(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::UpdateByHook)?;
        let Some(hook) = payload.update.clone() else {
            return Ok(payload.fail(missing(Method::UpdateByHook, "update hook")));
        };
        let updated = self.table.write().update_by_hook(&payload.path, &hook);
        Ok(payload.ok(PayloadResult::Documents(updated)))
    }

    async fn keys(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::Keys)?;
        let keys = self.table.read().keys();
        Ok(payload.ok(PayloadResult::Keys(keys)))
    }

    async fn values(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::Values)?;
        let values = self.table.read().values();
        Ok(payload.ok(PayloadResult::Values(values)))
    }

    async fn entries(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::Entries)?;
        let entries = self.table.read().entries();
        let docs: BTreeMap<String, Value> = entries.into_iter().collect();
        Ok(payload.ok(PayloadResult::Documents(docs)))
    }

    async fn size(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::Size)?;
        let len = self.table.read().len();
        Ok(payload.ok(PayloadResult::Count(len)))
    }

    async fn random(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::Random)?;
        let count = payload.count.unwrap_or(1);
        let sampled = self.table.read().sample_values(
            count,
            payload.allow_duplicates,
            &mut rand::thread_rng(),
        );
        Ok(payload.ok(PayloadResult::Values(sampled)))
    }

    async fn random_key(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::RandomKey)?;
        let count = payload.count.unwrap_or(1);
        let sampled = self.table.read().sample_keys(
            count,
            payload.allow_duplicates,
            &mut rand::thread_rng(),
        );
        Ok(payload.ok(PayloadResult::Keys(sampled)))
    }

    async fn auto_key(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::AutoKey)?;
        let mut counter = self.counter.write();
        *counter += 1;
        Ok(payload.ok(PayloadResult::NewKey(counter.to_string())))
    }

    async fn clear(&self, payload: Payload) -> StoreResult<Payload> {
        self.check_ready(Method::Clear)?;
        self.table.write().clear();
        Ok(payload.ok(PayloadResult::Ack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestdb_codec::Path;

    async fn open() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend
            .init(Payload::request(Method::Init))
            .await
            .unwrap()
            .resolve()
            .unwrap();
        backend
    }

    fn get_payload(key: &str) -> Payload {
        Payload::request(Method::Get).with_key(key)
    }

    #[tokio::test]
    async fn lifecycle_is_enforced() {
        let backend = MemoryBackend::new();
        let refused = backend.get(get_payload("k")).await;
        assert!(matches!(
            refused,
            Err(StoreError::Lifecycle {
                state: LifecycleState::Uninitialized,
                ..
            })
        ));

        backend
            .init(Payload::request(Method::Init))
            .await
            .unwrap();
        assert_eq!(backend.state(), LifecycleState::Ready);

        backend.close().await.unwrap();
        let refused = backend.get(get_payload("k")).await;
        assert!(matches!(
            refused,
            Err(StoreError::Lifecycle {
                state: LifecycleState::Closed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let backend = open().await;
        let set = Payload::request(Method::Set)
            .with_key("user")
            .with_path("name".parse().unwrap())
            .with_data(Value::from("Alice"));
        backend.set(set).await.unwrap().resolve().unwrap();

        let got = backend
            .get(get_payload("user").with_path("name".parse::<Path>().unwrap()))
            .await
            .unwrap()
            .resolve()
            .unwrap()
            .into_value(Method::Get)
            .unwrap();
        assert_eq!(got, Some(Value::from("Alice")));
    }

    #[tokio::test]
    async fn type_failures_travel_in_the_payload() {
        let backend = open().await;
        backend
            .set(
                Payload::request(Method::Set)
                    .with_key("k")
                    .with_data(Value::from("text")),
            )
            .await
            .unwrap();

        let response = backend
            .inc(Payload::request(Method::Inc).with_key("k"))
            .await
            .unwrap();
        assert!(matches!(response.error, Some(StoreError::Type { .. })));
    }

    #[tokio::test]
    async fn auto_keys_are_unique_and_increasing() {
        let backend = open().await;
        let mut previous = 0u64;
        for _ in 0..5 {
            let key = backend
                .auto_key(Payload::request(Method::AutoKey))
                .await
                .unwrap()
                .resolve()
                .unwrap()
                .into_new_key(Method::AutoKey)
                .unwrap();
            let n: u64 = key.parse().unwrap();
            assert!(n > previous);
            previous = n;
        }
    }

    #[tokio::test]
    async fn clear_keeps_counter() {
        let backend = open().await;
        backend
            .auto_key(Payload::request(Method::AutoKey))
            .await
            .unwrap();
        backend
            .clear(Payload::request(Method::Clear))
            .await
            .unwrap();
        let key = backend
            .auto_key(Payload::request(Method::AutoKey))
            .await
            .unwrap()
            .resolve()
            .unwrap()
            .into_new_key(Method::AutoKey)
            .unwrap();
        assert_eq!(key, "2");
    }

    #[tokio::test]
    async fn preseeded_documents_are_visible() {
        let docs = BTreeMap::from([("a".to_string(), Value::Int(1))]);
        let backend = MemoryBackend::with_documents(docs);
        backend
            .init(Payload::request(Method::Init))
            .await
            .unwrap();

        let size = backend
            .size(Payload::request(Method::Size))
            .await
            .unwrap()
            .resolve()
            .unwrap()
            .into_count(Method::Size)
            .unwrap();
        assert_eq!(size, 1);
    }
}
