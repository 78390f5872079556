//! Record store backed by a session's `astro_db.json`
//!
//! The document is a JSON object whose top-level members are the record
//! collections (`exposures`, `stacks`, `inst_mags`, ...). Other tools open the
//! same file, so every access happens under an exclusive advisory lock taken
//! by [`RecordStore::reactivate`]. External change is detected by comparing a
//! SHA-256 digest of the file with the digest of the last version this handle
//! read or wrote.

use crate::error::StoreError;
use crate::record::{fields, Juid, Record, RecordKind};
use crate::store::RecordStore;
use fs2::FileExt;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// File-backed [`RecordStore`]
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    document: Map<String, Value>,
    /// Open, locked handle while active
    lock: Option<File>,
    digest: Option<[u8; 32]>,
    modified: bool,
}

impl JsonFileStore {
    /// Name of the database file inside a session directory
    pub const FILE_NAME: &'static str = "astro_db.json";

    /// Create a store for `path`; nothing is read until reactivation
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: Map::new(),
            lock: None,
            digest: None,
            modified: false,
        }
    }

    /// Store for the database of a session directory
    #[must_use]
    pub fn in_session_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(Self::FILE_NAME))
    }

    /// Path of the database file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn collection(&self, kind: RecordKind) -> impl Iterator<Item = &Value> {
        self.document
            .get(kind.collection())
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
    }

    fn parse(&self, bytes: &[u8]) -> Result<Map<String, Value>, StoreError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::malformed(&self.path, e.to_string()))?;
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(StoreError::malformed(
                &self.path,
                "top level is not an object",
            )),
        }
    }
}

impl RecordStore for JsonFileStore {
    fn fetch_all_of_type(&self, kind: RecordKind) -> Vec<Record> {
        self.collection(kind)
            .filter_map(|v| Record::from_value(v.clone()))
            .collect()
    }

    fn find_by_id(&self, id: Juid) -> Option<Record> {
        // Try the collection the id block points at before scanning everything
        let preferred = id.kind().into_iter();
        preferred
            .chain(RecordKind::ALL)
            .flat_map(|kind| self.collection(kind))
            .find(|v| v.get(fields::JUID).and_then(Value::as_i64) == Some(id.0))
            .and_then(|v| Record::from_value(v.clone()))
    }

    fn reactivate(&mut self) -> Result<bool, StoreError> {
        if self.lock.is_some() {
            return Ok(false);
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        file.lock_exclusive()
            .map_err(|e| StoreError::io(&self.path, e))?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| StoreError::io(&self.path, e))?;
        let digest: [u8; 32] = Sha256::digest(&bytes).into();

        let changed = self.digest != Some(digest);
        if changed {
            tracing::info!(path = %self.path.display(), "record store changed; reloading");
            self.document = match self.parse(&bytes) {
                Ok(document) => document,
                Err(e) => {
                    let _ = FileExt::unlock(&file);
                    return Err(e);
                }
            };
        }

        self.digest = Some(digest);
        self.lock = Some(file);
        self.modified = false;
        Ok(changed)
    }

    fn sync_and_release(&mut self) -> Result<(), StoreError> {
        let mut file = self.lock.take().ok_or(StoreError::NotActive)?;

        if self.modified {
            let bytes = serde_json::to_vec_pretty(&self.document)
                .map_err(|e| StoreError::malformed(&self.path, e.to_string()))?;
            let write = |file: &mut File| -> std::io::Result<()> {
                file.set_len(0)?;
                file.seek(SeekFrom::Start(0))?;
                file.write_all(&bytes)?;
                file.sync_all()
            };
            write(&mut file).map_err(|e| StoreError::io(&self.path, e))?;
            self.digest = Some(Sha256::digest(&bytes).into());
            self.modified = false;
        }

        FileExt::unlock(&file).map_err(|e| StoreError::io(&self.path, e))
    }

    fn set_field(&mut self, id: Juid, field: &str, value: Value) -> Result<(), StoreError> {
        if self.lock.is_none() {
            return Err(StoreError::NotActive);
        }

        let collections: Vec<&str> = RecordKind::ALL.iter().map(|k| k.collection()).collect();
        let target = self
            .document
            .iter_mut()
            .filter(|(name, _)| collections.contains(&name.as_str()))
            .filter_map(|(_, v)| v.as_array_mut())
            .flatten()
            .filter_map(Value::as_object_mut)
            .find(|obj| obj.get(fields::JUID).and_then(Value::as_i64) == Some(id.0))
            .ok_or(StoreError::UnknownId(id))?;

        target.insert(field.to_string(), value);
        self.modified = true;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.lock.is_some()
    }
}
