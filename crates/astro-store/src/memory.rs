//! In-memory record store
//!
//! Clones share one backing state, so a test can hand one handle to the
//! analyzer and keep another to play the part of an out-of-process tool.

use crate::error::StoreError;
use crate::record::{Juid, Record, RecordKind};
use crate::store::RecordStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared in-memory [`RecordStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: BTreeMap<RecordKind, Vec<Record>>,
    /// Bumped by every external write
    generation: u64,
    /// Generation observed by the last reactivate
    seen: Option<u64>,
    active: bool,
    reactivations: usize,
    releases: usize,
}

impl MemoryState {
    fn record_mut(&mut self, id: Juid) -> Option<&mut Record> {
        self.collections
            .values_mut()
            .flat_map(|records| records.iter_mut())
            .find(|r| r.id() == Some(id))
    }
}

impl MemoryStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create store seeded with records
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = (RecordKind, Record)>) -> Self {
        let store = Self::new();
        {
            let mut state = store.inner.lock();
            for (kind, record) in records {
                state.collections.entry(kind).or_default().push(record);
            }
        }
        store
    }

    /// Add a record as an external writer would
    pub fn insert(&self, kind: RecordKind, record: Record) {
        let mut state = self.inner.lock();
        state.collections.entry(kind).or_default().push(record);
        state.generation += 1;
    }

    /// Modify a record as an external writer would
    ///
    /// Returns `false` if no record carries `id`.
    pub fn update(&self, id: Juid, f: impl FnOnce(&mut Record)) -> bool {
        let mut state = self.inner.lock();
        match state.record_mut(id) {
            Some(record) => {
                f(record);
                state.generation += 1;
                true
            }
            None => false,
        }
    }

    /// Remove a record as an external writer would
    pub fn remove(&self, id: Juid) -> bool {
        let mut state = self.inner.lock();
        let mut removed = false;
        for records in state.collections.values_mut() {
            let before = records.len();
            records.retain(|r| r.id() != Some(id));
            removed |= records.len() != before;
        }
        if removed {
            state.generation += 1;
        }
        removed
    }

    /// Inspect a record regardless of lock state
    #[must_use]
    pub fn record(&self, id: Juid) -> Option<Record> {
        let state = self.inner.lock();
        state
            .collections
            .values()
            .flatten()
            .find(|r| r.id() == Some(id))
            .cloned()
    }

    /// Number of successful reactivations so far
    #[must_use]
    pub fn reactivation_count(&self) -> usize {
        self.inner.lock().reactivations
    }

    /// Number of releases so far
    #[must_use]
    pub fn release_count(&self) -> usize {
        self.inner.lock().releases
    }
}

impl RecordStore for MemoryStore {
    fn fetch_all_of_type(&self, kind: RecordKind) -> Vec<Record> {
        self.inner
            .lock()
            .collections
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    fn find_by_id(&self, id: Juid) -> Option<Record> {
        self.record(id)
    }

    fn reactivate(&mut self) -> Result<bool, StoreError> {
        let mut state = self.inner.lock();
        if state.active {
            return Ok(false);
        }
        state.active = true;
        state.reactivations += 1;
        let changed = state.seen != Some(state.generation);
        state.seen = Some(state.generation);
        Ok(changed)
    }

    fn sync_and_release(&mut self) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        if !state.active {
            return Err(StoreError::NotActive);
        }
        state.active = false;
        state.releases += 1;
        Ok(())
    }

    fn set_field(&mut self, id: Juid, field: &str, value: Value) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        if !state.active {
            return Err(StoreError::NotActive);
        }
        let record = state.record_mut(id).ok_or(StoreError::UnknownId(id))?;
        record.set(field, value);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.inner.lock().active
    }
}
