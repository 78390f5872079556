//! Astro Store - record store adapters
//!
//! The analyzer never owns the session database. It consumes it through the
//! [`RecordStore`] trait, which models the read/lock/reload cycle of a store
//! shared with out-of-process tools:
//!
//! 1. [`RecordStore::reactivate`] takes the exclusive lock and reloads if the
//!    content changed since the last release
//! 2. reads ([`RecordStore::fetch_all_of_type`], [`RecordStore::find_by_id`])
//!    and the occasional field write happen under that lock
//! 3. [`RecordStore::sync_and_release`] flushes and drops the lock
//!
//! Two adapters ship with the crate: [`MemoryStore`] for tests and embedding,
//! and [`JsonFileStore`] for a session's `astro_db.json`.
//!
//! # Example
//!
//! ```rust,ignore
//! use astro_store::{JsonFileStore, RecordKind, RecordStore};
//!
//! let mut store = JsonFileStore::in_session_dir("/home/IMAGES/9-2-2022");
//! let changed = store.reactivate()?;
//! let stacks = store.fetch_all_of_type(RecordKind::Stack);
//! store.sync_and_release()?;
//! ```

#![allow(missing_docs)]

pub mod error;
pub mod json_file;
pub mod memory;
pub mod record;
pub mod store;

pub use error::StoreError;
pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use record::{fields, id_list, Juid, Record, RecordKind};
pub use store::RecordStore;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
