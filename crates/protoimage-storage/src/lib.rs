//! Read-only buckets for protoimage.
//!
//! A bucket is a key/value store of files addressed by normalized,
//! slash-separated relative paths. The compiler only ever *reads* from a
//! bucket:
//!
//! ```text
//! ┌──────────────┐  get / exists / list  ┌──────────────────┐
//! │  ReadBucket  │◄──────────────────────│  file-set + run  │
//! └──────────────┘                       └──────────────────┘
//!   ├── MemoryBucket   (in-process map; tests, embedded sources)
//!   └── DirBucket      (local directory)
//! ```
//!
//! All paths handed to a bucket are normalized with [`path::normalize`] before
//! use, so `a/../b.proto` and `b.proto` address the same entry.

pub mod dir;
pub mod path;


use std::collections::BTreeMap;

use thiserror::Error;

pub use dir::DirBucket;
pub use path::PathError;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("{path}: file does not exist")]
    NotFound { path: String },

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl BucketError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BucketError::NotFound { .. })
    }
}

// ============================================================================
// Trait
// ============================================================================

/// Read-only access to a tree of files.
pub trait ReadBucket: Send + Sync {
    /// Read the full contents of the file at `path`.
    ///
    /// Returns [`BucketError::NotFound`] when there is no such file.
    fn get(&self, path: &str) -> Result<Vec<u8>, BucketError>;

    /// Whether a regular file exists at `path`.
    fn exists(&self, path: &str) -> Result<bool, BucketError>;

    /// All file paths at or below `prefix`, normalized and sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, BucketError>;

    /// Release any resources held by the bucket.
    fn close(&self) -> Result<(), BucketError> {
        Ok(())
    }
}

// ============================================================================
// In-memory bucket
// ============================================================================

/// A bucket backed by an ordered in-memory map.
#[derive(Debug, Clone, Default)]
pub struct MemoryBucket {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bucket from `(path, contents)` pairs. Paths are normalized.
    pub fn from_files<P, C, I>(files: I) -> Result<Self, BucketError>
    where
        P: AsRef<str>,
        C: Into<Vec<u8>>,
        I: IntoIterator<Item = (P, C)>,
    {
        let mut bucket = Self::new();
        for (path, contents) in files {
            bucket.insert(path.as_ref(), contents)?;
        }
        Ok(bucket)
    }

    /// Insert or replace a file.
    pub fn insert(&mut self, path: &str, contents: impl Into<Vec<u8>>) -> Result<(), BucketError> {
        let normalized = path::normalize(path)?;
        self.files.insert(normalized, contents.into());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl ReadBucket for MemoryBucket {
    fn get(&self, path: &str) -> Result<Vec<u8>, BucketError> {
        let normalized = path::normalize(path)?;
        self.files
            .get(&normalized)
            .cloned()
            .ok_or(BucketError::NotFound { path: normalized })
    }

    fn exists(&self, path: &str) -> Result<bool, BucketError> {
        let normalized = path::normalize(path)?;
        Ok(self.files.contains_key(&normalized))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, BucketError> {
        let prefix = path::normalize(prefix)?;
        Ok(self
            .files
            .keys()
            .filter(|p| path::is_under(p, &prefix))
            .cloned()
            .collect())
    }
}
