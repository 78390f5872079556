//! Artifact probes
//!
//! The satisfaction engine never opens images. It asks an [`ArtifactProbe`]
//! whether a file exists, when it was last written and whether a
//! cross-matched star catalogue is available for it.

use crate::graph::Timestamp;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Filesystem questions asked during a walk
pub trait ArtifactProbe: Send + Sync {
    /// Whether a file exists at `path`
    fn exists(&self, path: &Path) -> bool;

    /// Last modification time, `None` if the file is absent
    fn modified(&self, path: &Path) -> Option<Timestamp>;

    /// Whether a cross-matched catalogue exists for `image`
    fn has_matched_catalogue(&self, image: &Path) -> bool;
}

/// Probe backed by the real filesystem
///
/// The matched catalogue of `/img/v1.fits` is the non-empty companion file
/// `/img/v1.fits.<suffix>`.
#[derive(Debug, Clone)]
pub struct FsProbe {
    catalogue_suffix: String,
}

impl FsProbe {
    /// Create a probe that looks for `<image>.<catalogue_suffix>`
    #[must_use]
    pub fn new(catalogue_suffix: impl Into<String>) -> Self {
        Self {
            catalogue_suffix: catalogue_suffix.into(),
        }
    }

    /// Companion catalogue path of `image`
    #[must_use]
    pub fn catalogue_path(&self, image: &Path) -> PathBuf {
        let mut name = image.as_os_str().to_os_string();
        name.push(".");
        name.push(&self.catalogue_suffix);
        PathBuf::from(name)
    }
}

impl ArtifactProbe for FsProbe {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn modified(&self, path: &Path) -> Option<Timestamp> {
        let modified = std::fs::metadata(path).ok()?.modified().ok()?;
        let secs = modified.duration_since(UNIX_EPOCH).ok()?.as_secs();
        Some(Timestamp(i64::try_from(secs).unwrap_or(i64::MAX)))
    }

    fn has_matched_catalogue(&self, image: &Path) -> bool {
        std::fs::metadata(self.catalogue_path(image)).is_ok_and(|m| m.len() > 0)
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    files: HashMap<PathBuf, Timestamp>,
    catalogues: HashSet<PathBuf>,
}

/// In-memory probe; clones share state
#[derive(Debug, Clone, Default)]
pub struct MemoryProbe {
    inner: Arc<RwLock<ProbeState>>,
}

impl MemoryProbe {
    /// Create an empty probe
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or touch a file
    pub fn put_file(&self, path: impl Into<PathBuf>, modified: Timestamp) {
        self.inner.write().files.insert(path.into(), modified);
    }

    /// Forget a file and its catalogue
    pub fn remove_file(&self, path: &Path) {
        let mut state = self.inner.write();
        state.files.remove(path);
        state.catalogues.remove(path);
    }

    /// Mark `image` as having a matched catalogue
    pub fn put_catalogue(&self, image: impl Into<PathBuf>) {
        self.inner.write().catalogues.insert(image.into());
    }

    /// Forget the matched catalogue of `image`
    pub fn remove_catalogue(&self, image: &Path) {
        self.inner.write().catalogues.remove(image);
    }
}

impl ArtifactProbe for MemoryProbe {
    fn exists(&self, path: &Path) -> bool {
        self.inner.read().files.contains_key(path)
    }

    fn modified(&self, path: &Path) -> Option<Timestamp> {
        self.inner.read().files.get(path).copied()
    }

    fn has_matched_catalogue(&self, image: &Path) -> bool {
        self.inner.read().catalogues.contains(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn fs_probe_reads_companion_catalogue() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("v1.fits");
        fs::write(&image, b"SIMPLE").unwrap();

        let probe = FsProbe::new("stars");
        assert!(probe.exists(&image));
        assert!(probe.modified(&image).is_some());
        assert!(!probe.has_matched_catalogue(&image));

        let catalogue = probe.catalogue_path(&image);
        assert_eq!(catalogue, dir.path().join("v1.fits.stars"));
        fs::write(&catalogue, b"").unwrap();
        assert!(!probe.has_matched_catalogue(&image));
        fs::write(&catalogue, b"1 12.3 45.6").unwrap();
        assert!(probe.has_matched_catalogue(&image));
    }

    #[test]
    fn memory_probe_clones_share_state() {
        let probe = MemoryProbe::new();
        let other = probe.clone();
        other.put_file("/img/a.fits", Timestamp(40));
        other.put_catalogue("/img/a.fits");

        assert_eq!(probe.modified(Path::new("/img/a.fits")), Some(Timestamp(40)));
        assert!(probe.has_matched_catalogue(Path::new("/img/a.fits")));

        probe.remove_file(Path::new("/img/a.fits"));
        assert!(!other.exists(Path::new("/img/a.fits")));
        assert!(!other.has_matched_catalogue(Path::new("/img/a.fits")));
    }
}
