//! The mutation engine.

use nestdb_codec::{resolve, Path, Value};
use nestdb_protocol::{
    Capabilities, LifecycleState, MathOp, Method, Payload, PredicateHook, StoreBackend,
    StoreError, StoreResult, UpdateHook,
};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A handle to one logical store served by a configured backend.
///
/// `Store` is the caller-facing surface: it exposes the full operation
/// vocabulary, builds a [`Payload`] per invocation, dispatches it to the
/// backend handler for that method, and extracts the typed result or raises
/// the carried error. Methods the backend does not declare are synthesized
/// from primitives where composable, and fail with
/// [`StoreError::NotImplemented`] otherwise.
///
/// # Ordering
///
/// All operations issued against one `Store` from the same process are
/// totally ordered by a fair per-store queue, which makes composite
/// read-modify-write operations (`inc`, `math`, `push`, `remove`,
/// `auto_key`, `ensure`) safe against in-process races. The queue does not
/// provide cross-process atomicity; that is only as strong as the backend's
/// native guarantees. Full-keyspace scans are best-effort consistent, not
/// snapshot-isolated. There is no built-in cancellation: a caller imposing a
/// timeout must race the future against a timer and abandon, not interrupt,
/// the in-flight work.
///
/// # Example
///
/// ```no_run
/// # async fn example(backend: std::sync::Arc<dyn nestdb_protocol::StoreBackend>) -> nestdb_protocol::StoreResult<()> {
/// use nestdb_core::Store;
/// use nestdb_codec::Value;
///
/// let store = Store::new(backend);
/// store.init().await?;
/// store.set("user", "profile.name", "Alice").await?;
/// assert_eq!(
///     store.get("user", "profile.name").await?,
///     Some(Value::from("Alice"))
/// );
/// store.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Store {
    backend: Arc<dyn StoreBackend>,
    caps: Capabilities,
    queue: Mutex<()>,
}

impl Store {
    /// Create a store over a backend. Capability negotiation happens here,
    /// once; the backend is not contacted until [`Store::init`].
    #[must_use]
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        let caps = backend.capabilities();
        Self {
            backend,
            caps,
            queue: Mutex::new(()),
        }
    }

    /// The capability set negotiated at construction.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// The backend's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.backend.state()
    }

    fn parse_path(path: &str) -> StoreResult<Path> {
        Ok(path.parse::<Path>()?)
    }

    fn require(&self, method: Method) -> StoreResult<()> {
        if self.caps.supports(method) {
            Ok(())
        } else {
            Err(StoreError::not_implemented(method))
        }
    }

    fn synthesizing(&self, method: Method) {
        tracing::debug!(method = %method, "backend lacks method, synthesizing from primitives");
    }

    // ----- primitive dispatch (callers hold the queue guard) -----

    async fn raw_get(&self, key: &str, path: &Path) -> StoreResult<Option<Value>> {
        self.require(Method::Get)?;
        let payload = Payload::request(Method::Get)
            .with_key(key)
            .with_path(path.clone());
        self.backend
            .get(payload)
            .await?
            .resolve()?
            .into_value(Method::Get)
    }

    async fn raw_set(&self, key: &str, path: &Path, value: Value) -> StoreResult<()> {
        self.require(Method::Set)?;
        let payload = Payload::request(Method::Set)
            .with_key(key)
            .with_path(path.clone())
            .with_data(value);
        self.backend.set(payload).await?.resolve()?;
        Ok(())
    }

    async fn raw_delete(&self, key: &str, path: &Path) -> StoreResult<()> {
        self.require(Method::Delete)?;
        let payload = Payload::request(Method::Delete)
            .with_key(key)
            .with_path(path.clone());
        self.backend.delete(payload).await?.resolve()?;
        Ok(())
    }

    async fn dispatch_keys(&self) -> StoreResult<Vec<String>> {
        let payload = Payload::request(Method::Keys);
        self.backend
            .keys(payload)
            .await?
            .resolve()?
            .into_keys(Method::Keys)
    }

    async fn dispatch_get_all(&self) -> StoreResult<BTreeMap<String, Value>> {
        let payload = Payload::request(Method::GetAll);
        self.backend
            .get_all(payload)
            .await?
            .resolve()?
            .into_documents(Method::GetAll)
    }

    /// Every key, via `keys` or `get_all`, whichever the backend declares.
    async fn raw_keys(&self, wanted: Method) -> StoreResult<Vec<String>> {
        if self.caps.supports(Method::Keys) {
            return self.dispatch_keys().await;
        }
        if self.caps.supports(Method::GetAll) {
            return Ok(self.dispatch_get_all().await?.into_keys().collect());
        }
        Err(StoreError::not_implemented(wanted))
    }

    /// Every key/document pair, via `get_all` or `keys` + `get`.
    async fn raw_entries(&self, wanted: Method) -> StoreResult<BTreeMap<String, Value>> {
        if self.caps.supports(Method::GetAll) {
            return self.dispatch_get_all().await;
        }
        if self.caps.supports(Method::Keys) && self.caps.supports(Method::Get) {
            let mut docs = BTreeMap::new();
            for key in self.dispatch_keys().await? {
                if let Some(doc) = self.raw_get(&key, &Path::root()).await? {
                    docs.insert(key, doc);
                }
            }
            return Ok(docs);
        }
        Err(StoreError::not_implemented(wanted))
    }

    // ----- numeric helpers shared by the synthesized composites -----

    fn adjusted(current: Option<Value>, delta: i64) -> StoreResult<Value> {
        match current {
            None => Ok(Value::Int(delta)),
            Some(Value::Int(n)) => Ok(match n.checked_add(delta) {
                Some(sum) => Value::Int(sum),
                None => Value::Float(n as f64 + delta as f64),
            }),
            Some(Value::Float(f)) => Ok(Value::Float(f + delta as f64)),
            Some(other) => Err(StoreError::type_error(format!(
                "cannot adjust {}",
                other.kind()
            ))),
        }
    }

    fn computed(current: Option<&Value>, op: MathOp, operand: &Value) -> StoreResult<Value> {
        let current = current
            .ok_or_else(|| StoreError::type_error("math target is absent"))?;
        let a = current.as_f64().ok_or_else(|| {
            StoreError::type_error(format!(
                "math target holds {}, expected a number",
                current.kind()
            ))
        })?;
        let b = operand.as_f64().ok_or_else(|| {
            StoreError::type_error(format!(
                "math operand is {}, expected a number",
                operand.kind()
            ))
        })?;
        if op == MathOp::Divide && b == 0.0 {
            return Err(StoreError::type_error("division by zero"));
        }
        let result = match op {
            MathOp::Add => a + b,
            MathOp::Subtract => a - b,
            MathOp::Multiply => a * b,
            MathOp::Divide => a / b,
        };
        let both_ints = current.as_int().is_some() && operand.as_int().is_some();
        if both_ints && result.fract() == 0.0 && result.abs() <= i64::MAX as f64 {
            Ok(Value::Int(result as i64))
        } else {
            Ok(Value::Float(result))
        }
    }

    fn candidate<'a>(doc: &'a Value, path: &Path) -> Option<&'a Value> {
        resolve(doc, path)
    }

    // ----- lifecycle -----

    /// Open the store.
    ///
    /// # Errors
    ///
    /// Fails on lifecycle violations, storage failures, or a backend that
    /// does not declare `init`.
    pub async fn init(&self) -> StoreResult<()> {
        let _guard = self.queue.lock().await;
        self.require(Method::Init)?;
        self.backend
            .init(Payload::request(Method::Init))
            .await?
            .resolve()?;
        Ok(())
    }

    /// Close the store. Queued operations finish first.
    ///
    /// # Errors
    ///
    /// Returns an error if final persistence fails.
    pub async fn close(&self) -> StoreResult<()> {
        let _guard = self.queue.lock().await;
        self.backend.close().await
    }

    /// Run pending schema migrations, all-or-nothing. The queue is held for
    /// the whole run, so no concurrent operation is admitted while migration
    /// is pending or running.
    ///
    /// # Errors
    ///
    /// Propagates migration failures; the store then remains usable under
    /// its pre-migration contract.
    pub async fn migrate(&self) -> StoreResult<()> {
        let _guard = self.queue.lock().await;
        self.backend.migrate().await
    }

    // ----- single-document operations -----

    /// Read the value at `key`/`path`. `None` means absent, which is
    /// distinct from a stored null.
    ///
    /// # Errors
    ///
    /// Fails on malformed paths, lifecycle violations, or storage failures.
    pub async fn get(&self, key: &str, path: &str) -> StoreResult<Option<Value>> {
        let path = Self::parse_path(path)?;
        let _guard = self.queue.lock().await;
        self.raw_get(key, &path).await
    }

    /// Write `value` at `key`/`path`, creating the document and any
    /// intermediate containers as needed.
    ///
    /// # Errors
    ///
    /// Fails on malformed paths, lifecycle violations, or storage failures.
    pub async fn set(
        &self,
        key: &str,
        path: &str,
        value: impl Into<Value>,
    ) -> StoreResult<()> {
        let path = Self::parse_path(path)?;
        let _guard = self.queue.lock().await;
        self.raw_set(key, &path, value.into()).await
    }

    /// Delete the document at `key`, or the value at `path` inside it.
    ///
    /// # Errors
    ///
    /// Fails on malformed paths, lifecycle violations, or storage failures.
    pub async fn delete(&self, key: &str, path: &str) -> StoreResult<()> {
        let path = Self::parse_path(path)?;
        let _guard = self.queue.lock().await;
        self.raw_delete(key, &path).await
    }

    /// Whether `key`/`path` holds a value.
    ///
    /// # Errors
    ///
    /// Fails on malformed paths, lifecycle violations, or storage failures.
    pub async fn has(&self, key: &str, path: &str) -> StoreResult<bool> {
        let path = Self::parse_path(path)?;
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::Has) {
            let payload = Payload::request(Method::Has)
                .with_key(key)
                .with_path(path);
            return self
                .backend
                .has(payload)
                .await?
                .resolve()?
                .into_bool(Method::Has);
        }
        self.synthesizing(Method::Has);
        Ok(self.raw_get(key, &path).await?.is_some())
    }

    /// Return the value at `key`/`path` if present, otherwise store the
    /// default there and return it.
    ///
    /// # Errors
    ///
    /// Fails on malformed paths, lifecycle violations, or storage failures.
    pub async fn ensure(
        &self,
        key: &str,
        path: &str,
        default: impl Into<Value>,
    ) -> StoreResult<Value> {
        let path = Self::parse_path(path)?;
        let _guard = self.queue.lock().await;
        if let Some(existing) = self.raw_get(key, &path).await? {
            return Ok(existing);
        }
        let default = default.into();
        self.raw_set(key, &path, default.clone()).await?;
        Ok(default)
    }

    // ----- numeric composites -----

    async fn adjust(&self, method: Method, key: &str, path: &str, delta: i64) -> StoreResult<Value> {
        let path = Self::parse_path(path)?;
        let _guard = self.queue.lock().await;
        if self.caps.supports(method) {
            let payload = Payload::request(method).with_key(key).with_path(path);
            let response = match method {
                Method::Inc => self.backend.inc(payload).await?,
                _ => self.backend.dec(payload).await?,
            };
            return response.resolve()?.into_value(method)?.ok_or_else(|| {
                StoreError::storage(format!("{method} returned no value"))
            });
        }
        self.synthesizing(method);
        let next = Self::adjusted(self.raw_get(key, &path).await?, delta)?;
        self.raw_set(key, &path, next.clone()).await?;
        Ok(next)
    }

    /// Increment the number at `key`/`path`. Absent locations count from
    /// zero.
    ///
    /// # Errors
    ///
    /// Fails with a type error when the stored value is not a number.
    pub async fn inc(&self, key: &str, path: &str) -> StoreResult<Value> {
        self.adjust(Method::Inc, key, path, 1).await
    }

    /// Decrement the number at `key`/`path`. Absent locations count from
    /// zero.
    ///
    /// # Errors
    ///
    /// Fails with a type error when the stored value is not a number.
    pub async fn dec(&self, key: &str, path: &str) -> StoreResult<Value> {
        self.adjust(Method::Dec, key, path, -1).await
    }

    /// Apply `op` with `operand` to the number at `key`/`path` and return
    /// the new value. Unlike [`Store::inc`], an absent target is a type
    /// error.
    ///
    /// # Errors
    ///
    /// Fails with a type error on an absent or non-numeric target, a
    /// non-numeric operand, or division by zero.
    pub async fn math(
        &self,
        key: &str,
        path: &str,
        op: MathOp,
        operand: impl Into<Value>,
    ) -> StoreResult<Value> {
        let path = Self::parse_path(path)?;
        let operand = operand.into();
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::Math) {
            let payload = Payload::request(Method::Math)
                .with_key(key)
                .with_path(path)
                .with_op(op)
                .with_data(operand);
            return self
                .backend
                .math(payload)
                .await?
                .resolve()?
                .into_value(Method::Math)?
                .ok_or_else(|| StoreError::storage("math returned no value"));
        }
        self.synthesizing(Method::Math);
        let current = self.raw_get(key, &path).await?;
        let next = Self::computed(current.as_ref(), op, &operand)?;
        self.raw_set(key, &path, next.clone()).await?;
        Ok(next)
    }

    // ----- sequence composites -----

    /// Append `value` to the sequence at `key`/`path`, creating the
    /// sequence when the location is absent.
    ///
    /// # Errors
    ///
    /// Fails with a type error when the stored value is not a sequence.
    pub async fn push(&self, key: &str, path: &str, value: impl Into<Value>) -> StoreResult<()> {
        let path = Self::parse_path(path)?;
        let value = value.into();
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::Push) {
            let payload = Payload::request(Method::Push)
                .with_key(key)
                .with_path(path)
                .with_data(value);
            self.backend.push(payload).await?.resolve()?;
            return Ok(());
        }
        self.synthesizing(Method::Push);
        let next = match self.raw_get(key, &path).await? {
            Some(Value::Sequence(mut items)) => {
                items.push(value);
                Value::Sequence(items)
            }
            Some(other) => {
                return Err(StoreError::type_error(format!(
                    "cannot push into {}",
                    other.kind()
                )))
            }
            None => Value::Sequence(vec![value]),
        };
        self.raw_set(key, &path, next).await
    }

    /// Remove every element deep-equal to `value` from the sequence at
    /// `key`/`path`, creating an empty sequence when the location is absent.
    ///
    /// # Errors
    ///
    /// Fails with a type error when the stored value is not a sequence.
    pub async fn remove(&self, key: &str, path: &str, value: impl Into<Value>) -> StoreResult<()> {
        let path = Self::parse_path(path)?;
        let value = value.into();
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::Remove) {
            let payload = Payload::request(Method::Remove)
                .with_key(key)
                .with_path(path)
                .with_data(value);
            self.backend.remove(payload).await?.resolve()?;
            return Ok(());
        }
        self.synthesizing(Method::Remove);
        let next = match self.raw_get(key, &path).await? {
            Some(Value::Sequence(mut items)) => {
                items.retain(|item| item != &value);
                Value::Sequence(items)
            }
            Some(other) => {
                return Err(StoreError::type_error(format!(
                    "cannot remove from {}",
                    other.kind()
                )))
            }
            None => Value::Sequence(Vec::new()),
        };
        self.raw_set(key, &path, next).await
    }

    /// Whether the sequence at `key`/`path` contains an element deep-equal
    /// to `value`. Absent locations are never containing.
    ///
    /// # Errors
    ///
    /// Fails with a type error when the stored value is not a sequence.
    pub async fn includes(
        &self,
        key: &str,
        path: &str,
        value: impl Into<Value>,
    ) -> StoreResult<bool> {
        let path = Self::parse_path(path)?;
        let value = value.into();
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::Includes) {
            let payload = Payload::request(Method::Includes)
                .with_key(key)
                .with_path(path)
                .with_data(value);
            return self
                .backend
                .includes(payload)
                .await?
                .resolve()?
                .into_bool(Method::Includes);
        }
        self.synthesizing(Method::Includes);
        match self.raw_get(key, &path).await? {
            Some(Value::Sequence(items)) => Ok(items.contains(&value)),
            Some(other) => Err(StoreError::type_error(format!(
                "includes target holds {}, expected a sequence",
                other.kind()
            ))),
            None => Ok(false),
        }
    }

    // ----- many-key operations -----

    /// Read several keys at once. Missing keys map to `None`.
    ///
    /// # Errors
    ///
    /// Fails on lifecycle violations or storage failures.
    pub async fn get_many(
        &self,
        keys: Vec<String>,
    ) -> StoreResult<BTreeMap<String, Option<Value>>> {
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::GetMany) {
            let payload = Payload::request(Method::GetMany).with_keys(keys);
            return self
                .backend
                .get_many(payload)
                .await?
                .resolve()?
                .into_lookup(Method::GetMany);
        }
        self.synthesizing(Method::GetMany);
        let mut found = BTreeMap::new();
        for key in keys {
            let value = self.raw_get(&key, &Path::root()).await?;
            found.insert(key, value);
        }
        Ok(found)
    }

    /// Write several whole documents.
    ///
    /// On backends without multi-row atomicity this may partially apply if a
    /// write fails part-way; the error reports the first failure.
    ///
    /// # Errors
    ///
    /// Fails on lifecycle violations or storage failures.
    pub async fn set_many(&self, entries: Vec<(String, Value)>) -> StoreResult<()> {
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::SetMany) {
            let payload = Payload::request(Method::SetMany).with_entries(entries);
            self.backend.set_many(payload).await?.resolve()?;
            return Ok(());
        }
        self.synthesizing(Method::SetMany);
        for (key, value) in entries {
            self.raw_set(&key, &Path::root(), value).await?;
        }
        Ok(())
    }

    /// Delete several keys. Shares [`Store::set_many`]'s partial-application
    /// caveat.
    ///
    /// # Errors
    ///
    /// Fails on lifecycle violations or storage failures.
    pub async fn delete_many(&self, keys: Vec<String>) -> StoreResult<()> {
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::DeleteMany) {
            let payload = Payload::request(Method::DeleteMany).with_keys(keys);
            self.backend.delete_many(payload).await?.resolve()?;
            return Ok(());
        }
        self.synthesizing(Method::DeleteMany);
        for key in keys {
            self.raw_delete(&key, &Path::root()).await?;
        }
        Ok(())
    }

    // ----- keyspace scans -----

    /// Keys whose value at `path` deep-equals `data`, with their documents.
    ///
    /// # Errors
    ///
    /// Fails on malformed paths, lifecycle violations, or storage failures.
    pub async fn filter_by_data(
        &self,
        path: &str,
        data: impl Into<Value>,
    ) -> StoreResult<BTreeMap<String, Value>> {
        let path = Self::parse_path(path)?;
        let data = data.into();
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::FilterByData) {
            let payload = Payload::request(Method::FilterByData)
                .with_path(path)
                .with_data(data);
            return self
                .backend
                .filter_by_data(payload)
                .await?
                .resolve()?
                .into_documents(Method::FilterByData);
        }
        self.synthesizing(Method::FilterByData);
        let docs = self.raw_entries(Method::FilterByData).await?;
        Ok(docs
            .into_iter()
            .filter(|(_, doc)| Self::candidate(doc, &path) == Some(&data))
            .collect())
    }

    /// Keys accepted by `hook`, with their documents. The hook sees each
    /// key and its value at `path`; documents where the path is absent are
    /// never offered.
    ///
    /// # Errors
    ///
    /// Fails on malformed paths, lifecycle violations, or storage failures.
    pub async fn filter_by_hook<F>(
        &self,
        path: &str,
        hook: F,
    ) -> StoreResult<BTreeMap<String, Value>>
    where
        F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
    {
        let path = Self::parse_path(path)?;
        let hook: PredicateHook = Arc::new(hook);
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::FilterByHook) {
            let payload = Payload::request(Method::FilterByHook)
                .with_path(path)
                .with_predicate(hook);
            return self
                .backend
                .filter_by_hook(payload)
                .await?
                .resolve()?
                .into_documents(Method::FilterByHook);
        }
        self.synthesizing(Method::FilterByHook);
        let docs = self.raw_entries(Method::FilterByHook).await?;
        Ok(docs
            .into_iter()
            .filter(|(key, doc)| {
                Self::candidate(doc, &path).is_some_and(|v| hook(key, v))
            })
            .collect())
    }

    /// First key whose value at `path` deep-equals `data`, in backend
    /// iteration order. That order is not guaranteed stable across
    /// backends; the non-determinism is a documented property of the
    /// abstraction.
    ///
    /// # Errors
    ///
    /// Fails on malformed paths, lifecycle violations, or storage failures.
    pub async fn find_by_data(
        &self,
        path: &str,
        data: impl Into<Value>,
    ) -> StoreResult<Option<(String, Value)>> {
        let path = Self::parse_path(path)?;
        let data = data.into();
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::FindByData) {
            let payload = Payload::request(Method::FindByData)
                .with_path(path)
                .with_data(data);
            return self
                .backend
                .find_by_data(payload)
                .await?
                .resolve()?
                .into_found(Method::FindByData);
        }
        self.synthesizing(Method::FindByData);
        let docs = self.raw_entries(Method::FindByData).await?;
        Ok(docs
            .into_iter()
            .find(|(_, doc)| Self::candidate(doc, &path) == Some(&data)))
    }

    /// First key accepted by `hook`, in backend iteration order. Shares
    /// [`Store::find_by_data`]'s ordering caveat.
    ///
    /// # Errors
    ///
    /// Fails on malformed paths, lifecycle violations, or storage failures.
    pub async fn find_by_hook<F>(
        &self,
        path: &str,
        hook: F,
    ) -> StoreResult<Option<(String, Value)>>
    where
        F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
    {
        let path = Self::parse_path(path)?;
        let hook: PredicateHook = Arc::new(hook);
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::FindByHook) {
            let payload = Payload::request(Method::FindByHook)
                .with_path(path)
                .with_predicate(hook);
            return self
                .backend
                .find_by_hook(payload)
                .await?
                .resolve()?
                .into_found(Method::FindByHook);
        }
        self.synthesizing(Method::FindByHook);
        let docs = self.raw_entries(Method::FindByHook).await?;
        Ok(docs
            .into_iter()
            .find(|(key, doc)| Self::candidate(doc, &path).is_some_and(|v| hook(key, v))))
    }

    /// Whether any document's value at `path` deep-equals `data`.
    ///
    /// # Errors
    ///
    /// Fails on malformed paths, lifecycle violations, or storage failures.
    pub async fn some_by_data(&self, path: &str, data: impl Into<Value>) -> StoreResult<bool> {
        let path = Self::parse_path(path)?;
        let data = data.into();
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::SomeByData) {
            let payload = Payload::request(Method::SomeByData)
                .with_path(path)
                .with_data(data);
            return self
                .backend
                .some_by_data(payload)
                .await?
                .resolve()?
                .into_bool(Method::SomeByData);
        }
        self.synthesizing(Method::SomeByData);
        let docs = self.raw_entries(Method::SomeByData).await?;
        Ok(docs
            .values()
            .any(|doc| Self::candidate(doc, &path) == Some(&data)))
    }

    /// Whether any key is accepted by `hook`.
    ///
    /// # Errors
    ///
    /// Fails on malformed paths, lifecycle violations, or storage failures.
    pub async fn some_by_hook<F>(&self, path: &str, hook: F) -> StoreResult<bool>
    where
        F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
    {
        let path = Self::parse_path(path)?;
        let hook: PredicateHook = Arc::new(hook);
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::SomeByHook) {
            let payload = Payload::request(Method::SomeByHook)
                .with_path(path)
                .with_predicate(hook);
            return self
                .backend
                .some_by_hook(payload)
                .await?
                .resolve()?
                .into_bool(Method::SomeByHook);
        }
        self.synthesizing(Method::SomeByHook);
        let docs = self.raw_entries(Method::SomeByHook).await?;
        Ok(docs
            .iter()
            .any(|(key, doc)| Self::candidate(doc, &path).is_some_and(|v| hook(key, v))))
    }

    /// Whether every document's value at `path` deep-equals `data`.
    /// Documents where the path is absent never match.
    ///
    /// # Errors
    ///
    /// Fails on malformed paths, lifecycle violations, or storage failures.
    pub async fn every_by_data(&self, path: &str, data: impl Into<Value>) -> StoreResult<bool> {
        let path = Self::parse_path(path)?;
        let data = data.into();
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::EveryByData) {
            let payload = Payload::request(Method::EveryByData)
                .with_path(path)
                .with_data(data);
            return self
                .backend
                .every_by_data(payload)
                .await?
                .resolve()?
                .into_bool(Method::EveryByData);
        }
        self.synthesizing(Method::EveryByData);
        let docs = self.raw_entries(Method::EveryByData).await?;
        Ok(docs
            .values()
            .all(|doc| Self::candidate(doc, &path) == Some(&data)))
    }

    /// Whether every key is accepted by `hook`. Documents where the path is
    /// absent never match.
    ///
    /// # Errors
    ///
    /// Fails on malformed paths, lifecycle violations, or storage failures.
    pub async fn every_by_hook<F>(&self, path: &str, hook: F) -> StoreResult<bool>
    where
        F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
    {
        let path = Self::parse_path(path)?;
        let hook: PredicateHook = Arc::new(hook);
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::EveryByHook) {
            let payload = Payload::request(Method::EveryByHook)
                .with_path(path)
                .with_predicate(hook);
            return self
                .backend
                .every_by_hook(payload)
                .await?
                .resolve()?
                .into_bool(Method::EveryByHook);
        }
        self.synthesizing(Method::EveryByHook);
        let docs = self.raw_entries(Method::EveryByHook).await?;
        Ok(docs
            .iter()
            .all(|(key, doc)| Self::candidate(doc, &path).is_some_and(|v| hook(key, v))))
    }

    /// For every document whose value at `path` deep-equals `expected`,
    /// write `replacement` at that path. Returns the updated key → document
    /// mapping.
    ///
    /// # Errors
    ///
    /// Fails on malformed paths, lifecycle violations, or storage failures.
    pub async fn update_by_data(
        &self,
        path: &str,
        expected: impl Into<Value>,
        replacement: impl Into<Value>,
    ) -> StoreResult<BTreeMap<String, Value>> {
        let path = Self::parse_path(path)?;
        let expected = expected.into();
        let replacement = replacement.into();
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::UpdateByData) {
            let payload = Payload::request(Method::UpdateByData)
                .with_path(path)
                .with_expected(expected)
                .with_data(replacement);
            return self
                .backend
                .update_by_data(payload)
                .await?
                .resolve()?
                .into_documents(Method::UpdateByData);
        }
        self.synthesizing(Method::UpdateByData);
        let docs = self.raw_entries(Method::UpdateByData).await?;
        let mut updated = BTreeMap::new();
        for (key, doc) in docs {
            if Self::candidate(&doc, &path) == Some(&expected) {
                self.raw_set(&key, &path, replacement.clone()).await?;
                if let Some(next) = self.raw_get(&key, &Path::root()).await? {
                    updated.insert(key, next);
                }
            }
        }
        Ok(updated)
    }

    /// Offer every present candidate to `hook`; where it returns a
    /// replacement, write it at `path`. Returns the updated key → document
    /// mapping.
    ///
    /// # Errors
    ///
    /// Fails on malformed paths, lifecycle violations, or storage failures.
    pub async fn update_by_hook<F>(
        &self,
        path: &str,
        hook: F,
    ) -> StoreResult<BTreeMap<String, Value>>
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        let path = Self::parse_path(path)?;
        let hook: UpdateHook = Arc::new(hook);
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::UpdateByHook) {
            let payload = Payload::request(Method::UpdateByHook)
                .with_path(path)
                .with_update(hook);
            return self
                .backend
                .update_by_hook(payload)
                .await?
                .resolve()?
                .into_documents(Method::UpdateByHook);
        }
        self.synthesizing(Method::UpdateByHook);
        let docs = self.raw_entries(Method::UpdateByHook).await?;
        let mut updated = BTreeMap::new();
        for (key, doc) in docs {
            let Some(next) = Self::candidate(&doc, &path).and_then(|v| hook(&key, v)) else {
                continue;
            };
            self.raw_set(&key, &path, next).await?;
            if let Some(rewritten) = self.raw_get(&key, &Path::root()).await? {
                updated.insert(key, rewritten);
            }
        }
        Ok(updated)
    }

    // ----- whole-store operations -----

    /// Every document, keyed.
    ///
    /// # Errors
    ///
    /// Fails on lifecycle violations or storage failures.
    pub async fn get_all(&self) -> StoreResult<BTreeMap<String, Value>> {
        let _guard = self.queue.lock().await;
        self.raw_entries(Method::GetAll).await
    }

    /// Every key.
    ///
    /// # Errors
    ///
    /// Fails on lifecycle violations or storage failures.
    pub async fn keys(&self) -> StoreResult<Vec<String>> {
        let _guard = self.queue.lock().await;
        self.raw_keys(Method::Keys).await
    }

    /// Every document.
    ///
    /// # Errors
    ///
    /// Fails on lifecycle violations or storage failures.
    pub async fn values(&self) -> StoreResult<Vec<Value>> {
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::Values) {
            let payload = Payload::request(Method::Values);
            return self
                .backend
                .values(payload)
                .await?
                .resolve()?
                .into_values(Method::Values);
        }
        self.synthesizing(Method::Values);
        Ok(self
            .raw_entries(Method::Values)
            .await?
            .into_values()
            .collect())
    }

    /// Every key/document pair.
    ///
    /// # Errors
    ///
    /// Fails on lifecycle violations or storage failures.
    pub async fn entries(&self) -> StoreResult<Vec<(String, Value)>> {
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::Entries) {
            let payload = Payload::request(Method::Entries);
            return Ok(self
                .backend
                .entries(payload)
                .await?
                .resolve()?
                .into_documents(Method::Entries)?
                .into_iter()
                .collect());
        }
        self.synthesizing(Method::Entries);
        Ok(self
            .raw_entries(Method::Entries)
            .await?
            .into_iter()
            .collect())
    }

    /// Number of documents.
    ///
    /// # Errors
    ///
    /// Fails on lifecycle violations or storage failures.
    pub async fn size(&self) -> StoreResult<usize> {
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::Size) {
            let payload = Payload::request(Method::Size);
            return self
                .backend
                .size(payload)
                .await?
                .resolve()?
                .into_count(Method::Size);
        }
        self.synthesizing(Method::Size);
        Ok(self.raw_keys(Method::Size).await?.len())
    }

    /// Sample `min(count, size)` documents, without replacement unless
    /// `allow_duplicates`.
    ///
    /// # Errors
    ///
    /// Fails on lifecycle violations or storage failures.
    pub async fn random(&self, count: usize, allow_duplicates: bool) -> StoreResult<Vec<Value>> {
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::Random) {
            let payload = Payload::request(Method::Random)
                .with_count(count)
                .with_duplicates(allow_duplicates);
            return self
                .backend
                .random(payload)
                .await?
                .resolve()?
                .into_values(Method::Random);
        }
        self.synthesizing(Method::Random);
        let keys = self.sample_synthesized(Method::Random, count, allow_duplicates).await?;
        let mut sampled = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(doc) = self.raw_get(&key, &Path::root()).await? {
                sampled.push(doc);
            }
        }
        Ok(sampled)
    }

    /// Sample `min(count, size)` keys, without replacement unless
    /// `allow_duplicates`.
    ///
    /// # Errors
    ///
    /// Fails on lifecycle violations or storage failures.
    pub async fn random_key(
        &self,
        count: usize,
        allow_duplicates: bool,
    ) -> StoreResult<Vec<String>> {
        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::RandomKey) {
            let payload = Payload::request(Method::RandomKey)
                .with_count(count)
                .with_duplicates(allow_duplicates);
            return self
                .backend
                .random_key(payload)
                .await?
                .resolve()?
                .into_keys(Method::RandomKey);
        }
        self.synthesizing(Method::RandomKey);
        self.sample_synthesized(Method::RandomKey, count, allow_duplicates)
            .await
    }

    async fn sample_synthesized(
        &self,
        wanted: Method,
        count: usize,
        allow_duplicates: bool,
    ) -> StoreResult<Vec<String>> {
        let keys = self.raw_keys(wanted).await?;
        let take = count.min(keys.len());
        if take == 0 {
            return Ok(Vec::new());
        }
        let mut rng = rand::thread_rng();
        if allow_duplicates {
            Ok((0..take)
                .map(|_| keys[rng.gen_range(0..keys.len())].clone())
                .collect())
        } else {
            Ok(rand::seq::index::sample(&mut rng, keys.len(), take)
                .into_iter()
                .map(|i| keys[i].clone())
                .collect())
        }
    }

    /// Issue the next engine-generated key: strictly increasing, unique
    /// within the store's lifetime, durably persisted before it is
    /// returned. Not synthesizable.
    ///
    /// # Errors
    ///
    /// Fails with `NotImplemented` on backends without `auto_key`, and on
    /// lifecycle violations or storage failures.
    pub async fn auto_key(&self) -> StoreResult<String> {
        let _guard = self.queue.lock().await;
        self.require(Method::AutoKey)?;
        self.backend
            .auto_key(Payload::request(Method::AutoKey))
            .await?
            .resolve()?
            .into_new_key(Method::AutoKey)
    }

    /// Remove every document. The issued-key counter is not reset.
    ///
    /// # Errors
    ///
    /// Fails with `NotImplemented` on backends without `clear`, and on
    /// lifecycle violations or storage failures.
    pub async fn clear(&self) -> StoreResult<()> {
        let _guard = self.queue.lock().await;
        self.require(Method::Clear)?;
        self.backend
            .clear(Payload::request(Method::Clear))
            .await?
            .resolve()?;
        Ok(())
    }

    // ----- portability composites -----

    /// Dump every document into one portable mapping:
    /// `{ "documents": {key → document}, "count": n }`.
    ///
    /// # Errors
    ///
    /// Fails on lifecycle violations or storage failures.
    pub async fn export(&self) -> StoreResult<Value> {
        let _guard = self.queue.lock().await;
        let docs = self.raw_entries(Method::GetAll).await?;
        let count = docs.len() as i64;
        Ok(Value::mapping([
            ("documents", Value::Mapping(docs)),
            ("count", Value::Int(count)),
        ]))
    }

    /// Load a dump produced by [`Store::export`]. Existing documents with
    /// the same keys are overwritten.
    ///
    /// # Errors
    ///
    /// Fails with a type error on a malformed dump, and on lifecycle
    /// violations or storage failures.
    pub async fn import(&self, dump: Value) -> StoreResult<()> {
        let documents = match dump.get("documents") {
            Some(Value::Mapping(docs)) => docs.clone(),
            _ => {
                return Err(StoreError::type_error(
                    "import expects a mapping with a documents field",
                ))
            }
        };
        let entries: Vec<(String, Value)> = documents.into_iter().collect();

        let _guard = self.queue.lock().await;
        if self.caps.supports(Method::SetMany) {
            let payload = Payload::request(Method::SetMany).with_entries(entries);
            self.backend.set_many(payload).await?.resolve()?;
            return Ok(());
        }
        for (key, value) in entries {
            self.raw_set(&key, &Path::root(), value).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjusted_counts_from_zero() {
        assert_eq!(Store::adjusted(None, 1).unwrap(), Value::Int(1));
        assert_eq!(
            Store::adjusted(Some(Value::Int(9)), -1).unwrap(),
            Value::Int(8)
        );
        assert_eq!(
            Store::adjusted(Some(Value::Float(1.5)), 1).unwrap(),
            Value::Float(2.5)
        );
        assert!(Store::adjusted(Some(Value::from("x")), 1).is_err());
    }

    #[test]
    fn computed_preserves_integers_when_exact() {
        let v = Store::computed(Some(&Value::Int(10)), MathOp::Multiply, &Value::Int(2)).unwrap();
        assert_eq!(v, Value::Int(20));

        let v = Store::computed(Some(&Value::Int(5)), MathOp::Divide, &Value::Int(2)).unwrap();
        assert_eq!(v, Value::Float(2.5));

        assert!(Store::computed(None, MathOp::Add, &Value::Int(1)).is_err());
        assert!(
            Store::computed(Some(&Value::Int(1)), MathOp::Divide, &Value::Int(0)).is_err()
        );
    }
}
