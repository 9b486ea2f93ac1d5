//! Storage backend contract.

use crate::error::{StoreError, StoreResult};
use crate::lifecycle::LifecycleState;
use crate::method::Method;
use crate::payload::Payload;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// The set of methods a backend implements.
///
/// Declared once at construction; the engine reads it to decide, per method,
/// whether to dispatch directly, synthesize from primitives, or fail with
/// `NotImplemented`. There are no ad hoc existence checks at call time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    methods: BTreeSet<Method>,
}

impl Capabilities {
    /// No methods.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Every method.
    #[must_use]
    pub fn full() -> Self {
        Self {
            methods: Method::ALL.into_iter().collect(),
        }
    }

    /// The given methods.
    pub fn of(methods: impl IntoIterator<Item = Method>) -> Self {
        Self {
            methods: methods.into_iter().collect(),
        }
    }

    /// Add a method (builder form).
    #[must_use]
    pub fn with(mut self, method: Method) -> Self {
        self.methods.insert(method);
        self
    }

    /// Whether a method is declared.
    #[must_use]
    pub fn supports(&self, method: Method) -> bool {
        self.methods.contains(&method)
    }

    /// Number of declared methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether no methods are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// A persistence backend serving the method vocabulary.
///
/// Backends are **polymorphic over the capability set**: one handler per
/// method they support, declared through [`Capabilities`]. Handlers take a
/// request [`Payload`] and return it annotated with a result or a carried
/// error; only lifecycle violations (`Lifecycle`, `NeedsMigration`) are
/// returned as `Err` across this boundary. Every default handler annotates
/// the payload with `NotImplemented`, so a backend implements exactly the
/// handlers it declares.
///
/// # Invariants
///
/// - Handlers other than `init` must refuse requests outside
///   [`LifecycleState::Ready`]
/// - A backend in `MigrationNeeded` admits nothing but [`Self::migrate`]
/// - `auto_key` must durably persist its incremented counter before
///   returning the issued key
/// - Backends must be `Send + Sync`; the engine serializes operations per
///   store, but backends may be shared across stores
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// The methods this backend implements.
    fn capabilities(&self) -> Capabilities;

    /// The backend's current lifecycle state.
    fn state(&self) -> LifecycleState;

    /// Open the store: load or create its metadata.
    ///
    /// # Errors
    ///
    /// Fails fast on lifecycle violations or storage failures. A backend
    /// whose persisted schema is behind current moves to `MigrationNeeded`
    /// and succeeds; subsequent requests then fail until migrated.
    async fn init(&self, payload: Payload) -> StoreResult<Payload>;

    /// Close the store. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if final persistence fails.
    async fn close(&self) -> StoreResult<()>;

    /// Run pending schema migrations, all-or-nothing.
    ///
    /// The default is a no-op for backends with nothing to migrate.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration step fails; the store then remains
    /// usable under its pre-migration contract.
    async fn migrate(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Read the value at a key/path.
    async fn get(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::Get)))
    }

    /// Read every document.
    async fn get_all(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::GetAll)))
    }

    /// Read several keys at once.
    async fn get_many(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::GetMany)))
    }

    /// Write the value at a key/path.
    async fn set(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::Set)))
    }

    /// Write several key/value pairs.
    async fn set_many(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::SetMany)))
    }

    /// Delete a key, or the value at a path inside it.
    async fn delete(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::Delete)))
    }

    /// Delete several keys.
    async fn delete_many(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::DeleteMany)))
    }

    /// Check whether a key/path holds a value.
    async fn has(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::Has)))
    }

    /// Increment the number at a key/path.
    async fn inc(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::Inc)))
    }

    /// Decrement the number at a key/path.
    async fn dec(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::Dec)))
    }

    /// Apply an arithmetic operator at a key/path.
    async fn math(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::Math)))
    }

    /// Append to the sequence at a key/path.
    async fn push(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::Push)))
    }

    /// Remove matching elements from the sequence at a key/path.
    async fn remove(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::Remove)))
    }

    /// Deep-equality containment check against the sequence at a key/path.
    async fn includes(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::Includes)))
    }

    /// Keys whose value at a path equals a literal, with their documents.
    async fn filter_by_data(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::FilterByData)))
    }

    /// Keys accepted by a predicate, with their documents.
    async fn filter_by_hook(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::FilterByHook)))
    }

    /// First key whose value at a path equals a literal.
    async fn find_by_data(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::FindByData)))
    }

    /// First key accepted by a predicate.
    async fn find_by_hook(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::FindByHook)))
    }

    /// Whether any value at a path equals a literal.
    async fn some_by_data(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::SomeByData)))
    }

    /// Whether any key is accepted by a predicate.
    async fn some_by_hook(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::SomeByHook)))
    }

    /// Whether every value at a path equals a literal.
    async fn every_by_data(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::EveryByData)))
    }

    /// Whether every key is accepted by a predicate.
    async fn every_by_hook(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::EveryByHook)))
    }

    /// Rewrite the value at a path for every document matching a literal.
    async fn update_by_data(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::UpdateByData)))
    }

    /// Rewrite the value at a path for every document a hook rewrites.
    async fn update_by_hook(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::UpdateByHook)))
    }

    /// List every key.
    async fn keys(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::Keys)))
    }

    /// List every document.
    async fn values(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::Values)))
    }

    /// List every key/document pair.
    async fn entries(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::Entries)))
    }

    /// Number of documents.
    async fn size(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::Size)))
    }

    /// Sample random documents.
    async fn random(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::Random)))
    }

    /// Sample random keys.
    async fn random_key(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::RandomKey)))
    }

    /// Issue the next engine-generated key.
    async fn auto_key(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::AutoKey)))
    }

    /// Remove every document.
    async fn clear(&self, payload: Payload) -> StoreResult<Payload> {
        Ok(payload.fail(StoreError::not_implemented(Method::Clear)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadResult;

    struct Inert;

    #[async_trait]
    impl StoreBackend for Inert {
        fn capabilities(&self) -> Capabilities {
            Capabilities::of([Method::Init, Method::Get])
        }

        fn state(&self) -> LifecycleState {
            LifecycleState::Ready
        }

        async fn init(&self, payload: Payload) -> StoreResult<Payload> {
            Ok(payload.ok(PayloadResult::Ack))
        }

        async fn close(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn defaults_carry_not_implemented() {
        let backend = Inert;
        let response = backend.inc(Payload::request(Method::Inc)).await.unwrap();
        assert!(matches!(
            response.error,
            Some(StoreError::NotImplemented {
                method: Method::Inc
            })
        ));
    }

    #[tokio::test]
    async fn backends_are_object_safe() {
        let backend: Box<dyn StoreBackend> = Box::new(Inert);
        let response = backend.init(Payload::request(Method::Init)).await.unwrap();
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn default_migrate_is_a_noop() {
        assert!(Inert.migrate().await.is_ok());
    }

    #[test]
    fn capabilities_membership() {
        let caps = Capabilities::of([Method::Get, Method::Set]).with(Method::Keys);
        assert!(caps.supports(Method::Get));
        assert!(caps.supports(Method::Keys));
        assert!(!caps.supports(Method::AutoKey));
        assert_eq!(caps.len(), 3);

        assert_eq!(Capabilities::full().len(), Method::ALL.len());
        assert!(Capabilities::none().is_empty());
    }
}
