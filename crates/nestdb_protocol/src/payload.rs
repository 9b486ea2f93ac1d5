//! Canonical request/response records.

use crate::error::{StoreError, StoreResult};
use crate::method::Method;
use nestdb_codec::{Path, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Caller-supplied predicate over `(key, candidate value)`.
///
/// Hooks cross the protocol boundary by reference counting; they are never
/// serialized.
pub type PredicateHook = Arc<dyn Fn(&str, &Value) -> bool + Send + Sync>;

/// Caller-supplied rewrite over `(key, candidate value)`. Returning `None`
/// leaves the document unchanged.
pub type UpdateHook = Arc<dyn Fn(&str, &Value) -> Option<Value> + Send + Sync>;

/// Arithmetic operator for the math method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    /// Addition.
    Add,
    /// Subtraction.
    Subtract,
    /// Multiplication.
    Multiply,
    /// Division.
    Divide,
}

impl MathOp {
    /// Parse an operator from its text form.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "add" => Some(MathOp::Add),
            "subtract" => Some(MathOp::Subtract),
            "multiply" => Some(MathOp::Multiply),
            "divide" => Some(MathOp::Divide),
            _ => None,
        }
    }

    /// Stable text form of this operator.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MathOp::Add => "add",
            MathOp::Subtract => "subtract",
            MathOp::Multiply => "multiply",
            MathOp::Divide => "divide",
        }
    }
}

impl fmt::Display for MathOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The typed result a handler writes into a payload.
#[derive(Debug)]
pub enum PayloadResult {
    /// The operation completed and produces no value.
    Ack,
    /// A single optional value (`None` means absent).
    Value(Option<Value>),
    /// A boolean answer.
    Bool(bool),
    /// A key → document mapping.
    Documents(BTreeMap<String, Value>),
    /// A key → optional document mapping (misses preserved).
    Lookup(BTreeMap<String, Option<Value>>),
    /// A list of documents.
    Values(Vec<Value>),
    /// A list of keys.
    Keys(Vec<String>),
    /// The first matching key/document pair, if any.
    Found(Option<(String, Value)>),
    /// A count.
    Count(usize),
    /// A freshly issued key.
    NewKey(String),
}

fn mismatch(method: Method, wanted: &str, got: &PayloadResult) -> StoreError {
    StoreError::storage(format!(
        "backend returned a mismatched result for {method}: wanted {wanted}, got {got:?}"
    ))
}

impl PayloadResult {
    /// Extract a [`PayloadResult::Value`].
    pub fn into_value(self, method: Method) -> StoreResult<Option<Value>> {
        match self {
            PayloadResult::Value(v) => Ok(v),
            other => Err(mismatch(method, "value", &other)),
        }
    }

    /// Extract a [`PayloadResult::Bool`].
    pub fn into_bool(self, method: Method) -> StoreResult<bool> {
        match self {
            PayloadResult::Bool(b) => Ok(b),
            other => Err(mismatch(method, "bool", &other)),
        }
    }

    /// Extract a [`PayloadResult::Documents`].
    pub fn into_documents(self, method: Method) -> StoreResult<BTreeMap<String, Value>> {
        match self {
            PayloadResult::Documents(docs) => Ok(docs),
            other => Err(mismatch(method, "documents", &other)),
        }
    }

    /// Extract a [`PayloadResult::Lookup`].
    pub fn into_lookup(self, method: Method) -> StoreResult<BTreeMap<String, Option<Value>>> {
        match self {
            PayloadResult::Lookup(found) => Ok(found),
            other => Err(mismatch(method, "lookup", &other)),
        }
    }

    /// Extract a [`PayloadResult::Values`].
    pub fn into_values(self, method: Method) -> StoreResult<Vec<Value>> {
        match self {
            PayloadResult::Values(values) => Ok(values),
            other => Err(mismatch(method, "values", &other)),
        }
    }

    /// Extract a [`PayloadResult::Keys`].
    pub fn into_keys(self, method: Method) -> StoreResult<Vec<String>> {
        match self {
            PayloadResult::Keys(keys) => Ok(keys),
            other => Err(mismatch(method, "keys", &other)),
        }
    }

    /// Extract a [`PayloadResult::Found`].
    pub fn into_found(self, method: Method) -> StoreResult<Option<(String, Value)>> {
        match self {
            PayloadResult::Found(entry) => Ok(entry),
            other => Err(mismatch(method, "found", &other)),
        }
    }

    /// Extract a [`PayloadResult::Count`].
    pub fn into_count(self, method: Method) -> StoreResult<usize> {
        match self {
            PayloadResult::Count(n) => Ok(n),
            other => Err(mismatch(method, "count", &other)),
        }
    }

    /// Extract a [`PayloadResult::NewKey`].
    pub fn into_new_key(self, method: Method) -> StoreResult<String> {
        match self {
            PayloadResult::NewKey(key) => Ok(key),
            other => Err(mismatch(method, "new key", &other)),
        }
    }
}

/// The structured request/response record for one method invocation.
///
/// The engine builds a payload carrying only the fields the method needs,
/// dispatches it to the backend's handler for that method, and receives it
/// back annotated with either a [`PayloadResult`] or a carried error.
pub struct Payload {
    /// The request intent.
    pub method: Method,
    /// Target key, for single-document methods.
    pub key: Option<String>,
    /// Target path inside the document. Root addresses the whole document.
    pub path: Path,
    /// Input value: the data to write, the literal to compare, the math
    /// operand, or the element to push/remove.
    pub data: Option<Value>,
    /// Match literal, for update-by-data (where `data` carries the
    /// replacement).
    pub expected: Option<Value>,
    /// Arithmetic operator, for math.
    pub op: Option<MathOp>,
    /// Target keys, for many-key methods.
    pub keys: Vec<String>,
    /// Key/value pairs, for set-many.
    pub entries: Vec<(String, Value)>,
    /// Sample size, for random methods.
    pub count: Option<usize>,
    /// Sample with replacement instead of without.
    pub allow_duplicates: bool,
    /// Predicate, for by-hook scans.
    pub predicate: Option<PredicateHook>,
    /// Rewrite hook, for update-by-hook.
    pub update: Option<UpdateHook>,
    /// The handler's answer.
    pub result: Option<PayloadResult>,
    /// Operation-level failure carried back across the boundary.
    pub error: Option<StoreError>,
}

impl Payload {
    /// Start a request payload for a method. All fields begin empty.
    #[must_use]
    pub fn request(method: Method) -> Self {
        Payload {
            method,
            key: None,
            path: Path::root(),
            data: None,
            expected: None,
            op: None,
            keys: Vec::new(),
            entries: Vec::new(),
            count: None,
            allow_duplicates: false,
            predicate: None,
            update: None,
            result: None,
            error: None,
        }
    }

    /// Set the target key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the target path.
    #[must_use]
    pub fn with_path(mut self, path: Path) -> Self {
        self.path = path;
        self
    }

    /// Set the input value.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Set the match literal.
    #[must_use]
    pub fn with_expected(mut self, expected: Value) -> Self {
        self.expected = Some(expected);
        self
    }

    /// Set the arithmetic operator.
    #[must_use]
    pub fn with_op(mut self, op: MathOp) -> Self {
        self.op = Some(op);
        self
    }

    /// Set the target keys.
    #[must_use]
    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = keys;
        self
    }

    /// Set the key/value pairs.
    #[must_use]
    pub fn with_entries(mut self, entries: Vec<(String, Value)>) -> Self {
        self.entries = entries;
        self
    }

    /// Set the sample size.
    #[must_use]
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Allow sampling with replacement.
    #[must_use]
    pub fn with_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }

    /// Set the predicate hook.
    #[must_use]
    pub fn with_predicate(mut self, hook: PredicateHook) -> Self {
        self.predicate = Some(hook);
        self
    }

    /// Set the rewrite hook.
    #[must_use]
    pub fn with_update(mut self, hook: UpdateHook) -> Self {
        self.update = Some(hook);
        self
    }

    /// Annotate this payload with a result.
    #[must_use]
    pub fn ok(mut self, result: PayloadResult) -> Self {
        self.result = Some(result);
        self.error = None;
        self
    }

    /// Annotate this payload with an operation-level failure.
    #[must_use]
    pub fn fail(mut self, error: StoreError) -> Self {
        self.error = Some(error);
        self
    }

    /// Consume the annotated payload: the carried error if one was set,
    /// otherwise the result (`Ack` when the handler set none).
    pub fn resolve(self) -> StoreResult<PayloadResult> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(PayloadResult::Ack)),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("method", &self.method)
            .field("key", &self.key)
            .field("path", &self.path)
            .field("data", &self.data)
            .field("expected", &self.expected)
            .field("op", &self.op)
            .field("keys", &self.keys)
            .field("entries", &self.entries)
            .field("count", &self.count)
            .field("allow_duplicates", &self.allow_duplicates)
            .field("predicate", &self.predicate.as_ref().map(|_| "<hook>"))
            .field("update", &self.update.as_ref().map(|_| "<hook>"))
            .field("result", &self.result)
            .field("error", &self.error)
            .finish()
    }
}
