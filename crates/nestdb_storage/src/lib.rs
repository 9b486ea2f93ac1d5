//! # NestDB Storage
//!
//! Bundled storage backends for NestDB.
//!
//! This crate provides two implementations of the
//! [`StoreBackend`](nestdb_protocol::StoreBackend) contract:
//!
//! - [`MemoryBackend`] — full-capability, in-memory; for tests and
//!   ephemeral stores
//! - [`FileBackend`] — the persistent reference backend: a JSON snapshot
//!   file per store with atomic rewrites, an advisory file lock, schema
//!   version metadata, and the migration state machine
//!
//! Both backends implement the complete method vocabulary; engines built
//! over sparser third-party backends rely on capability synthesis instead.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod file;
mod memory;
pub mod migration;
mod snapshot;
mod table;

pub use file::{Config, FileBackend};
pub use memory::MemoryBackend;
pub use snapshot::{
    LegacyRow, LegacySnapshot, Metadata, Snapshot, CURRENT_SCHEMA_VERSION, LEGACY_SCHEMA_VERSION,
};
