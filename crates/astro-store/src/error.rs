//! Error types for record store adapters

use crate::record::Juid;
use std::path::PathBuf;

/// Errors raised by a [`RecordStore`](crate::RecordStore) adapter
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error while reading, writing or locking the backing file
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing document could not be interpreted as a record store
    #[error("malformed record store {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    /// Operation requires the store to be reactivated (locked) first
    #[error("record store is not active")]
    NotActive,

    /// No record carries the requested id
    #[error("unknown record id {0}")]
    UnknownId(Juid),
}

impl StoreError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create malformed-document error for path
    pub fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            message: message.into(),
        }
    }
}
