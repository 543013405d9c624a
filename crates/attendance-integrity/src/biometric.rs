//! Biometric comparison and proof-image storage boundaries.
//!
//! Face descriptor extraction and the distance function live behind
//! [`BiometricComparator`]; where proof photos end up lives behind
//! [`ImageStore`]. [`FsImageStore`] is a content-addressed local store.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::error::{AttendanceError, Result};

/// Result of comparing a live image against a reference image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ComparisonOutcome {
    /// Distance between face descriptors (lower is more similar).
    Distance(f32),
    /// No face could be found in one of the images.
    NotDetected,
}

/// External face comparator.
pub trait BiometricComparator: Send + Sync {
    /// Compare the reference image at `reference_url` with `live_image`.
    fn compare(&self, reference_url: &str, live_image: &[u8]) -> Result<ComparisonOutcome>;
}

/// External store for proof photos.
pub trait ImageStore: Send + Sync {
    /// Persist `blob` and return a reference URL for it.
    fn store(&self, blob: &[u8]) -> Result<String>;
}

/// Filesystem image store. Files are named by the SHA-256 of their
/// content, so storing the same photo twice yields the same reference.
pub struct FsImageStore {
    base_dir: PathBuf,
}

impl FsImageStore {
    /// Create a store rooted at `base_dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `AttendanceError::Io` if the directory cannot be created.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }
}

impl ImageStore for FsImageStore {
    fn store(&self, blob: &[u8]) -> Result<String> {
        if blob.is_empty() {
            return Err(AttendanceError::InvalidInput("empty image".into()));
        }
        let name = format!("{}.img", hex::encode(Sha256::digest(blob)));
        let path = self.base_dir.join(name);
        if !path.exists() {
            std::fs::write(&path, blob)?;
        }
        Ok(format!("file://{}", path.display()))
    }
}
