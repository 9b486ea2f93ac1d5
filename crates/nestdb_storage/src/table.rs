//! In-memory document table shared by the bundled backends.
//!
//! Both bundled backends keep their working set as a plain document tree and
//! apply the same value-level semantics; the file backend additionally runs
//! every tree through the envelope codec at its persistence boundary.

use nestdb_codec::{assign, remove as remove_at, resolve, Path, Value};
use nestdb_protocol::{MathOp, PredicateHook, StoreError, StoreResult, UpdateHook};
use rand::seq::index;
use rand::Rng;
use std::collections::BTreeMap;

/// Key → document working set with the full value-level operation semantics.
#[derive(Debug, Clone, Default)]
pub(crate) struct DocTable {
    documents: BTreeMap<String, Value>,
}

impl DocTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_documents(documents: BTreeMap<String, Value>) -> Self {
        Self { documents }
    }

    pub(crate) fn documents(&self) -> &BTreeMap<String, Value> {
        &self.documents
    }

    pub(crate) fn get(&self, key: &str, path: &Path) -> Option<Value> {
        self.documents
            .get(key)
            .and_then(|doc| resolve(doc, path))
            .cloned()
    }

    pub(crate) fn get_all(&self) -> BTreeMap<String, Value> {
        self.documents.clone()
    }

    pub(crate) fn get_many(&self, keys: &[String]) -> BTreeMap<String, Option<Value>> {
        keys.iter()
            .map(|k| (k.clone(), self.documents.get(k).cloned()))
            .collect()
    }

    pub(crate) fn set(&mut self, key: &str, path: &Path, value: Value) {
        if path.is_root() {
            self.documents.insert(key.to_string(), value);
            return;
        }
        let doc = self
            .documents
            .entry(key.to_string())
            .or_insert(Value::Null);
        assign(doc, path, value);
    }

    pub(crate) fn delete(&mut self, key: &str, path: &Path) {
        if path.is_root() {
            self.documents.remove(key);
            return;
        }
        if let Some(doc) = self.documents.get_mut(key) {
            remove_at(doc, path);
        }
    }

    pub(crate) fn has(&self, key: &str, path: &Path) -> bool {
        self.documents
            .get(key)
            .and_then(|doc| resolve(doc, path))
            .is_some()
    }

    /// Increment/decrement. Absent locations count from zero.
    pub(crate) fn adjust(&mut self, key: &str, path: &Path, delta: i64) -> StoreResult<Value> {
        let next = match self.get(key, path) {
            None => Value::Int(delta),
            Some(Value::Int(n)) => match n.checked_add(delta) {
                Some(sum) => Value::Int(sum),
                None => Value::Float(n as f64 + delta as f64),
            },
            Some(Value::Float(f)) => Value::Float(f + delta as f64),
            Some(other) => {
                return Err(StoreError::type_error(format!(
                    "cannot adjust {} at {key:?}[{path}]",
                    other.kind()
                )))
            }
        };
        self.set(key, path, next.clone());
        Ok(next)
    }

    pub(crate) fn math(
        &mut self,
        key: &str,
        path: &Path,
        op: MathOp,
        operand: &Value,
    ) -> StoreResult<Value> {
        let current = self.get(key, path).ok_or_else(|| {
            StoreError::type_error(format!("math target {key:?}[{path}] is absent"))
        })?;
        let a = current.as_f64().ok_or_else(|| {
            StoreError::type_error(format!(
                "math target {key:?}[{path}] holds {}, expected a number",
                current.kind()
            ))
        })?;
        let b = operand.as_f64().ok_or_else(|| {
            StoreError::type_error(format!("math operand is {}, expected a number", operand.kind()))
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

        // Integer operands stay integers when the result is exact.
        let both_ints = current.as_int().is_some() && operand.as_int().is_some();
        let next = if both_ints && result.fract() == 0.0 && result.abs() <= i64::MAX as f64 {
            Value::Int(result as i64)
        } else {
            Value::Float(result)
        };

        self.set(key, path, next.clone());
        Ok(next)
    }

    /// Append to the sequence at the path, creating it when absent.
    pub(crate) fn push(&mut self, key: &str, path: &Path, value: Value) -> StoreResult<()> {
        match self.get(key, path) {
            Some(Value::Sequence(mut items)) => {
                items.push(value);
                self.set(key, path, Value::Sequence(items));
                Ok(())
            }
            Some(other) => Err(StoreError::type_error(format!(
                "cannot push into {} at {key:?}[{path}]",
                other.kind()
            ))),
            None => {
                self.set(key, path, Value::Sequence(vec![value]));
                Ok(())
            }
        }
    }

    /// Remove every element deep-equal to the needle from the sequence at
    /// the path, creating an empty sequence when absent.
    pub(crate) fn remove_matching(
        &mut self,
        key: &str,
        path: &Path,
        needle: &Value,
    ) -> StoreResult<()> {
        match self.get(key, path) {
            Some(Value::Sequence(mut items)) => {
                items.retain(|item| item != needle);
                self.set(key, path, Value::Sequence(items));
                Ok(())
            }
            Some(other) => Err(StoreError::type_error(format!(
                "cannot remove from {} at {key:?}[{path}]",
                other.kind()
            ))),
            None => {
                self.set(key, path, Value::Sequence(Vec::new()));
                Ok(())
            }
        }
    }

    pub(crate) fn includes(&self, key: &str, path: &Path, needle: &Value) -> StoreResult<bool> {
        match self.documents.get(key).and_then(|doc| resolve(doc, path)) {
            Some(Value::Sequence(items)) => Ok(items.iter().any(|item| item == needle)),
            Some(other) => Err(StoreError::type_error(format!(
                "includes target {key:?}[{path}] holds {}, expected a sequence",
                other.kind()
            ))),
            None => Ok(false),
        }
    }

    fn matches_data(doc: &Value, path: &Path, data: &Value) -> bool {
        resolve(doc, path) == Some(data)
    }

    pub(crate) fn filter_by_data(&self, path: &Path, data: &Value) -> BTreeMap<String, Value> {
        self.documents
            .iter()
            .filter(|(_, doc)| Self::matches_data(doc, path, data))
            .map(|(k, doc)| (k.clone(), doc.clone()))
            .collect()
    }

    pub(crate) fn filter_by_hook(
        &self,
        path: &Path,
        hook: &PredicateHook,
    ) -> BTreeMap<String, Value> {
        self.documents
            .iter()
            .filter(|(k, doc)| resolve(doc, path).is_some_and(|v| hook(k, v)))
            .map(|(k, doc)| (k.clone(), doc.clone()))
            .collect()
    }

    pub(crate) fn find_by_data(&self, path: &Path, data: &Value) -> Option<(String, Value)> {
        self.documents
            .iter()
            .find(|(_, doc)| Self::matches_data(doc, path, data))
            .map(|(k, doc)| (k.clone(), doc.clone()))
    }

    pub(crate) fn find_by_hook(
        &self,
        path: &Path,
        hook: &PredicateHook,
    ) -> Option<(String, Value)> {
        self.documents
            .iter()
            .find(|(k, doc)| resolve(doc, path).is_some_and(|v| hook(k, v)))
            .map(|(k, doc)| (k.clone(), doc.clone()))
    }

    pub(crate) fn some_by_data(&self, path: &Path, data: &Value) -> bool {
        self.documents
            .values()
            .any(|doc| Self::matches_data(doc, path, data))
    }

    pub(crate) fn some_by_hook(&self, path: &Path, hook: &PredicateHook) -> bool {
        self.documents
            .iter()
            .any(|(k, doc)| resolve(doc, path).is_some_and(|v| hook(k, v)))
    }

    pub(crate) fn every_by_data(&self, path: &Path, data: &Value) -> bool {
        self.documents
            .values()
            .all(|doc| Self::matches_data(doc, path, data))
    }

    pub(crate) fn every_by_hook(&self, path: &Path, hook: &PredicateHook) -> bool {
        self.documents
            .iter()
            .all(|(k, doc)| resolve(doc, path).is_some_and(|v| hook(k, v)))
    }

    pub(crate) fn update_by_data(
        &mut self,
        path: &Path,
        expected: &Value,
        replacement: &Value,
    ) -> BTreeMap<String, Value> {
        let matching: Vec<String> = self
            .documents
            .iter()
            .filter(|(_, doc)| Self::matches_data(doc, path, expected))
            .map(|(k, _)| k.clone())
            .collect();

        let mut updated = BTreeMap::new();
        for key in matching {
            self.set(&key, path, replacement.clone());
            if let Some(doc) = self.documents.get(&key) {
                updated.insert(key, doc.clone());
            }
        }
        updated
    }

    pub(crate) fn update_by_hook(&mut self, path: &Path, hook: &UpdateHook) -> BTreeMap<String, Value> {
        let rewrites: Vec<(String, Value)> = self
            .documents
            .iter()
            .filter_map(|(k, doc)| {
                resolve(doc, path)
                    .and_then(|v| hook(k, v))
                    .map(|next| (k.clone(), next))
            })
            .collect();

        let mut updated = BTreeMap::new();
        for (key, next) in rewrites {
            self.set(&key, path, next);
            if let Some(doc) = self.documents.get(&key) {
                updated.insert(key, doc.clone());
            }
        }
        updated
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.documents.keys().cloned().collect()
    }

    pub(crate) fn values(&self) -> Vec<Value> {
        self.documents.values().cloned().collect()
    }

    pub(crate) fn entries(&self) -> Vec<(String, Value)> {
        self.documents
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.documents.len()
    }

    pub(crate) fn clear(&mut self) {
        self.documents.clear();
    }

    /// Sample `min(count, len)` keys, without replacement unless
    /// `allow_duplicates`.
    pub(crate) fn sample_keys(
        &self,
        count: usize,
        allow_duplicates: bool,
        rng: &mut impl Rng,
    ) -> Vec<String> {
        let keys: Vec<&String> = self.documents.keys().collect();
        let take = count.min(keys.len());
        if take == 0 {
            return Vec::new();
        }
        if allow_duplicates {
            (0..take)
                .map(|_| keys[rng.gen_range(0..keys.len())].clone())
                .collect()
        } else {
            index::sample(rng, keys.len(), take)
                .into_iter()
                .map(|i| keys[i].clone())
                .collect()
        }
    }

    pub(crate) fn sample_values(
        &self,
        count: usize,
        allow_duplicates: bool,
        rng: &mut impl Rng,
    ) -> Vec<Value> {
        self.sample_keys(count, allow_duplicates, rng)
            .into_iter()
            .filter_map(|k| self.documents.get(&k).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> Path {
        s.parse().unwrap()
    }

    #[test]
    fn set_and_get_nested() {
        let mut table = DocTable::new();
        table.set("user", &path("profile.name"), Value::from("Alice"));
        assert_eq!(
            table.get("user", &path("profile.name")),
            Some(Value::from("Alice"))
        );
        assert_eq!(table.get("user", &path("profile.age")), None);
        assert_eq!(table.get("ghost", &Path::root()), None);
    }

    #[test]
    fn delete_at_path_keeps_document() {
        let mut table = DocTable::new();
        table.set("k", &path("a"), Value::Int(1));
        table.set("k", &path("b"), Value::Int(2));
        table.delete("k", &path("a"));
        assert!(table.has("k", &Path::root()));
        assert!(!table.has("k", &path("a")));

        table.delete("k", &Path::root());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn adjust_counts_from_zero_when_absent() {
        let mut table = DocTable::new();
        assert_eq!(table.adjust("n", &Path::root(), 1).unwrap(), Value::Int(1));
        assert_eq!(table.adjust("n", &Path::root(), 1).unwrap(), Value::Int(2));
        assert_eq!(table.adjust("n", &Path::root(), -5).unwrap(), Value::Int(-3));
    }

    #[test]
    fn adjust_rejects_non_numbers() {
        let mut table = DocTable::new();
        table.set("n", &Path::root(), Value::from("ten"));
        assert!(matches!(
            table.adjust("n", &Path::root(), 1),
            Err(StoreError::Type { .. })
        ));
    }

    #[test]
    fn math_scenario() {
        let mut table = DocTable::new();
        table.set("n", &Path::root(), Value::Int(10));
        table
            .math("n", &Path::root(), MathOp::Multiply, &Value::Int(2))
            .unwrap();
        assert_eq!(table.get("n", &Path::root()), Some(Value::Int(20)));
        table
            .math("n", &Path::root(), MathOp::Divide, &Value::Int(4))
            .unwrap();
        assert_eq!(table.get("n", &Path::root()), Some(Value::Int(5)));
    }

    #[test]
    fn math_rejects_absent_and_division_by_zero() {
        let mut table = DocTable::new();
        assert!(table
            .math("missing", &Path::root(), MathOp::Add, &Value::Int(1))
            .is_err());

        table.set("n", &Path::root(), Value::Int(1));
        assert!(matches!(
            table.math("n", &Path::root(), MathOp::Divide, &Value::Int(0)),
            Err(StoreError::Type { .. })
        ));
    }

    #[test]
    fn math_widens_to_float_when_inexact() {
        let mut table = DocTable::new();
        table.set("n", &Path::root(), Value::Int(5));
        let result = table
            .math("n", &Path::root(), MathOp::Divide, &Value::Int(2))
            .unwrap();
        assert_eq!(result, Value::Float(2.5));
    }

    #[test]
    fn push_auto_creates_sequence() {
        let mut table = DocTable::new();
        table.push("list", &path("items"), Value::Int(1)).unwrap();
        table.push("list", &path("items"), Value::Int(2)).unwrap();
        assert_eq!(
            table.get("list", &path("items")),
            Some(Value::sequence([Value::Int(1), Value::Int(2)]))
        );
    }

    #[test]
    fn push_rejects_non_sequences() {
        let mut table = DocTable::new();
        table.set("k", &Path::root(), Value::Int(1));
        assert!(matches!(
            table.push("k", &Path::root(), Value::Int(2)),
            Err(StoreError::Type { .. })
        ));
    }

    #[test]
    fn remove_matching_filters_deep_equal_elements() {
        let mut table = DocTable::new();
        let doc = |x: i64| Value::mapping([("x", Value::Int(x))]);
        table.set(
            "k",
            &Path::root(),
            Value::sequence([doc(1), doc(2), doc(1)]),
        );
        table.remove_matching("k", &Path::root(), &doc(1)).unwrap();
        assert_eq!(
            table.get("k", &Path::root()),
            Some(Value::sequence([doc(2)]))
        );
    }

    #[test]
    fn includes_checks_containment() {
        let mut table = DocTable::new();
        table.set("k", &path("xs"), Value::sequence([Value::Int(1), Value::Int(2)]));
        assert!(table.includes("k", &path("xs"), &Value::Int(2)).unwrap());
        assert!(!table.includes("k", &path("xs"), &Value::Int(3)).unwrap());
        assert!(!table.includes("k", &path("ys"), &Value::Int(1)).unwrap());
        assert!(table.includes("k", &path("xs[0]"), &Value::Int(1)).is_err());
    }

    #[test]
    fn filter_scenario() {
        let mut table = DocTable::new();
        table.set("a", &Path::root(), Value::mapping([("x", Value::Int(1))]));
        table.set("b", &Path::root(), Value::mapping([("x", Value::Int(2))]));

        let matched = table.filter_by_data(&path("x"), &Value::Int(1));
        assert_eq!(matched.len(), 1);
        assert_eq!(
            matched.get("a"),
            Some(&Value::mapping([("x", Value::Int(1))]))
        );
    }

    #[test]
    fn hooks_only_see_present_candidates() {
        use std::sync::Arc;
        let mut table = DocTable::new();
        table.set("a", &Path::root(), Value::mapping([("x", Value::Int(1))]));
        table.set("b", &Path::root(), Value::mapping([("y", Value::Int(2))]));

        let hook: PredicateHook = Arc::new(|_, _| true);
        let matched = table.filter_by_hook(&path("x"), &hook);
        assert_eq!(matched.keys().collect::<Vec<_>>(), vec!["a"]);
        // every: a document where the path is absent can never match.
        assert!(!table.every_by_hook(&path("x"), &hook));
        assert!(table.some_by_hook(&path("x"), &hook));
    }

    #[test]
    fn update_by_data_rewrites_matches() {
        let mut table = DocTable::new();
        table.set("a", &Path::root(), Value::mapping([("x", Value::Int(1))]));
        table.set("b", &Path::root(), Value::mapping([("x", Value::Int(2))]));

        let updated = table.update_by_data(&path("x"), &Value::Int(1), &Value::Int(9));
        assert_eq!(updated.len(), 1);
        assert_eq!(table.get("a", &path("x")), Some(Value::Int(9)));
        assert_eq!(table.get("b", &path("x")), Some(Value::Int(2)));
    }

    #[test]
    fn update_by_hook_applies_rewrites() {
        use std::sync::Arc;
        let mut table = DocTable::new();
        table.set("a", &path("n"), Value::Int(1));
        table.set("b", &path("n"), Value::Int(10));

        let hook: UpdateHook = Arc::new(|_, v| match v {
            Value::Int(n) if *n < 5 => Some(Value::Int(n * 100)),
            _ => None,
        });
        let updated = table.update_by_hook(&path("n"), &hook);
        assert_eq!(updated.len(), 1);
        assert_eq!(table.get("a", &path("n")), Some(Value::Int(100)));
        assert_eq!(table.get("b", &path("n")), Some(Value::Int(10)));
    }

    #[test]
    fn sampling_respects_store_size() {
        let mut table = DocTable::new();
        for i in 0..5 {
            table.set(&format!("k{i}"), &Path::root(), Value::Int(i));
        }
        let mut rng = rand::thread_rng();

        let keys = table.sample_keys(10, false, &mut rng);
        assert_eq!(keys.len(), 5);
        let unique: std::collections::BTreeSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), 5);

        let dups = table.sample_keys(3, true, &mut rng);
        assert_eq!(dups.len(), 3);

        assert!(DocTable::new().sample_values(4, false, &mut rng).is_empty());
    }
}
