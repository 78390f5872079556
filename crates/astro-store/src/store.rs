//! The record store contract consumed by the analyzer

use crate::error::StoreError;
use crate::record::{Juid, Record, RecordKind};
use serde_json::Value;

/// Locked read/reload access to a shared record store
///
/// Implementations must tolerate other processes writing the store while it
/// is released. Reads are only meaningful between [`reactivate`] and
/// [`sync_and_release`].
///
/// [`reactivate`]: RecordStore::reactivate
/// [`sync_and_release`]: RecordStore::sync_and_release
pub trait RecordStore: Send {
    /// All records of one kind, in store order
    fn fetch_all_of_type(&self, kind: RecordKind) -> Vec<Record>;

    /// Point lookup across every collection
    fn find_by_id(&self, id: Juid) -> Option<Record>;

    /// Take the exclusive lock and reload
    ///
    /// Returns `true` when the content differs from the last snapshot this
    /// handle observed. Reactivating an already active store is a no-op
    /// returning `false`.
    ///
    /// # Errors
    /// Returns error if the backing data cannot be read or locked.
    fn reactivate(&mut self) -> Result<bool, StoreError>;

    /// Flush local changes and release the exclusive lock
    ///
    /// # Errors
    /// Returns [`StoreError::NotActive`] if the store is not held.
    fn sync_and_release(&mut self) -> Result<(), StoreError>;

    /// Write one field of one record; only valid while active
    ///
    /// Local writes are not reported as external change by the next
    /// [`reactivate`](RecordStore::reactivate).
    ///
    /// # Errors
    /// Returns error if the store is not active or the id is unknown.
    fn set_field(&mut self, id: Juid, field: &str, value: Value) -> Result<(), StoreError>;

    /// Whether the exclusive lock is currently held
    fn is_active(&self) -> bool;
}
