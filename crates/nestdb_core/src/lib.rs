//! # NestDB Core
//!
//! The mutation engine: a storage-engine-agnostic key/value surface where
//! callers address arbitrary nested locations inside stored documents with
//! string paths and mutate them through a fixed operation vocabulary.
//!
//! [`Store`] composes the path resolver and envelope codec (via the
//! backends) into the caller-facing operations, dispatching each one to the
//! configured [`StoreBackend`](nestdb_protocol::StoreBackend) through the
//! canonical payload protocol. Backends declare their capabilities at
//! construction; composable methods they lack are synthesized from
//! primitives.
//!
//! ## Usage
//!
//! ```no_run
//! # async fn example(backend: std::sync::Arc<dyn nestdb_protocol::StoreBackend>) -> nestdb_protocol::StoreResult<()> {
//! use nestdb_core::Store;
//! use nestdb_protocol::MathOp;
//!
//! let store = Store::new(backend);
//! store.init().await?;
//!
//! store.set("n", "", 10).await?;
//! store.math("n", "", MathOp::Multiply, 2).await?;
//! assert_eq!(store.get("n", "").await?.unwrap().as_int(), Some(20));
//!
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod store;

pub use store::Store;

// The vocabulary types callers need alongside the engine.
pub use nestdb_codec::{Path, PathSegment, Value};
pub use nestdb_protocol::{
    Capabilities, LifecycleState, MathOp, Method, StoreError, StoreResult,
};
