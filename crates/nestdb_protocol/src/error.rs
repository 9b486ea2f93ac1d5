//! Error types shared across the protocol boundary.

use crate::lifecycle::LifecycleState;
use crate::method::Method;
use nestdb_codec::{CodecError, PathError};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur anywhere in the store stack.
///
/// Operation-level failures travel inside a payload's `error` field;
/// lifecycle violations ([`StoreError::Lifecycle`],
/// [`StoreError::NeedsMigration`]) fail fast across the backend boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed path syntax.
    #[error("path error: {0}")]
    Path(#[from] PathError),

    /// Unknown or corrupt envelope.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An operation was applied to an incompatible stored type.
    #[error("type error: {message}")]
    Type {
        /// Description of the mismatch.
        message: String,
    },

    /// An operation was attempted outside the `Ready` state.
    #[error("store is {state}, cannot serve {method}")]
    Lifecycle {
        /// The state the store was in.
        state: LifecycleState,
        /// The method that was refused.
        method: Method,
    },

    /// The store's schema is behind current and migration was not requested.
    #[error("store schema is v{found}, current is v{current}: migration required")]
    NeedsMigration {
        /// Schema version found on disk.
        found: u32,
        /// The current schema version.
        current: u32,
    },

    /// The backend lacks the method and it cannot be synthesized.
    #[error("backend does not implement {method}")]
    NotImplemented {
        /// The unsupported method.
        method: Method,
    },

    /// Opaque backend I/O failure.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
        /// The wrapped cause, when one exists.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An operation that requires an existing document did not find one.
    #[error("key not found: {key}")]
    KeyNotFound {
        /// The missing key.
        key: String,
    },
}

impl StoreError {
    /// Create a type error.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type {
            message: message.into(),
        }
    }

    /// Create a lifecycle error.
    pub fn lifecycle(state: LifecycleState, method: Method) -> Self {
        Self::Lifecycle { state, method }
    }

    /// Create a needs-migration error.
    pub fn needs_migration(found: u32, current: u32) -> Self {
        Self::NeedsMigration { found, current }
    }

    /// Create a not-implemented error.
    pub fn not_implemented(method: Method) -> Self {
        Self::NotImplemented { method }
    }

    /// Create a storage error with no cause.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error wrapping a cause.
    pub fn storage_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a key-not-found error.
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::storage_with("I/O failure", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = StoreError::lifecycle(LifecycleState::Closed, Method::Get);
        assert_eq!(err.to_string(), "store is closed, cannot serve get");

        let err = StoreError::needs_migration(1, 2);
        assert!(err.to_string().contains("v1"));
        assert!(err.to_string().contains("v2"));
    }

    #[test]
    fn storage_error_preserves_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = StoreError::storage_with("snapshot write failed", io);
        let source = std::error::Error::source(&err).expect("cause");
        assert!(source.to_string().contains("disk on fire"));
    }
}
