//! Request intents.

use std::fmt;

/// The request vocabulary a backend can serve.
///
/// Every operation the mutation engine exposes maps to exactly one method; a
/// backend declares the subset it implements through
/// [`crate::Capabilities`]. The engine synthesizes composable methods the
/// backend lacks from primitive ones, and fails with
/// [`crate::StoreError::NotImplemented`] for the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
    /// Read the value at a key/path.
    Get,
    /// Read every document.
    GetAll,
    /// Read several keys at once.
    GetMany,
    /// Write the value at a key/path.
    Set,
    /// Write several key/value pairs.
    SetMany,
    /// Delete a key, or the value at a path inside it.
    Delete,
    /// Delete several keys.
    DeleteMany,
    /// Check whether a key/path holds a value.
    Has,
    /// Increment the number at a key/path.
    Inc,
    /// Decrement the number at a key/path.
    Dec,
    /// Apply an arithmetic operator at a key/path.
    Math,
    /// Append to the sequence at a key/path.
    Push,
    /// Remove matching elements from the sequence at a key/path.
    Remove,
    /// Deep-equality containment check against the sequence at a key/path.
    Includes,
    /// Keys whose value at a path equals a literal, with their documents.
    FilterByData,
    /// Keys accepted by a predicate, with their documents.
    FilterByHook,
    /// First key whose value at a path equals a literal.
    FindByData,
    /// First key accepted by a predicate.
    FindByHook,
    /// Whether any value at a path equals a literal.
    SomeByData,
    /// Whether any key is accepted by a predicate.
    SomeByHook,
    /// Whether every value at a path equals a literal.
    EveryByData,
    /// Whether every key is accepted by a predicate.
    EveryByHook,
    /// Rewrite the value at a path for every document matching a literal.
    UpdateByData,
    /// Rewrite the value at a path for every document a hook rewrites.
    UpdateByHook,
    /// List every key.
    Keys,
    /// List every document.
    Values,
    /// List every key/document pair.
    Entries,
    /// Number of documents.
    Size,
    /// Sample random documents.
    Random,
    /// Sample random keys.
    RandomKey,
    /// Issue the next engine-generated key.
    AutoKey,
    /// Remove every document.
    Clear,
    /// Open the store.
    Init,
}

impl Method {
    /// Every method, in declaration order.
    pub const ALL: [Method; 33] = [
        Method::Get,
        Method::GetAll,
        Method::GetMany,
        Method::Set,
        Method::SetMany,
        Method::Delete,
        Method::DeleteMany,
        Method::Has,
        Method::Inc,
        Method::Dec,
        Method::Math,
        Method::Push,
        Method::Remove,
        Method::Includes,
        Method::FilterByData,
        Method::FilterByHook,
        Method::FindByData,
        Method::FindByHook,
        Method::SomeByData,
        Method::SomeByHook,
        Method::EveryByData,
        Method::EveryByHook,
        Method::UpdateByData,
        Method::UpdateByHook,
        Method::Keys,
        Method::Values,
        Method::Entries,
        Method::Size,
        Method::Random,
        Method::RandomKey,
        Method::AutoKey,
        Method::Clear,
        Method::Init,
    ];

    /// Stable text form of this method.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::GetAll => "get_all",
            Method::GetMany => "get_many",
            Method::Set => "set",
            Method::SetMany => "set_many",
            Method::Delete => "delete",
            Method::DeleteMany => "delete_many",
            Method::Has => "has",
            Method::Inc => "inc",
            Method::Dec => "dec",
            Method::Math => "math",
            Method::Push => "push",
            Method::Remove => "remove",
            Method::Includes => "includes",
            Method::FilterByData => "filter_by_data",
            Method::FilterByHook => "filter_by_hook",
            Method::FindByData => "find_by_data",
            Method::FindByHook => "find_by_hook",
            Method::SomeByData => "some_by_data",
            Method::SomeByHook => "some_by_hook",
            Method::EveryByData => "every_by_data",
            Method::EveryByHook => "every_by_hook",
            Method::UpdateByData => "update_by_data",
            Method::UpdateByHook => "update_by_hook",
            Method::Keys => "keys",
            Method::Values => "values",
            Method::Entries => "entries",
            Method::Size => "size",
            Method::Random => "random",
            Method::RandomKey => "random_key",
            Method::AutoKey => "auto_key",
            Method::Clear => "clear",
            Method::Init => "init",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_lists_every_method_once() {
        let mut seen = std::collections::BTreeSet::new();
        for method in Method::ALL {
            assert!(seen.insert(method), "{method} listed twice");
        }
        assert_eq!(seen.len(), 33);
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(Method::GetAll.to_string(), "get_all");
        assert_eq!(Method::AutoKey.to_string(), "auto_key");
    }
}
