//! Local directory bucket.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{path, BucketError, ReadBucket};

/// A read-only bucket rooted at a directory on the local filesystem.
///
/// Symlinks are followed; anything that is not a regular file is invisible.
#[derive(Debug, Clone)]
pub struct DirBucket {
    root: PathBuf,
}

impl DirBucket {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, BucketError> {
        let root = root.into();
        let display = root.display().to_string();
        let meta = fs::metadata(&root).map_err(|source| BucketError::Io {
            path: display.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(BucketError::Io {
                path: display,
                source: std::io::Error::new(ErrorKind::InvalidInput, "not a directory"),
            });
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, normalized: &str) -> PathBuf {
        if normalized == "." {
            return self.root.clone();
        }
        normalized
            .split('/')
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }
}

impl ReadBucket for DirBucket {
    fn get(&self, path: &str) -> Result<Vec<u8>, BucketError> {
        let normalized = path::normalize(path)?;
        let full = self.resolve(&normalized);
        match fs::metadata(&full) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(BucketError::NotFound { path: normalized }),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(BucketError::NotFound { path: normalized })
            }
            Err(source) => {
                return Err(BucketError::Io {
                    path: normalized,
                    source,
                })
            }
        }
        fs::read(&full).map_err(|source| BucketError::Io {
            path: normalized,
            source,
        })
    }

    fn exists(&self, path: &str) -> Result<bool, BucketError> {
        let normalized = path::normalize(path)?;
        match fs::metadata(self.resolve(&normalized)) {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(BucketError::Io {
                path: normalized,
                source,
            }),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, BucketError> {
        let prefix = path::normalize(prefix)?;
        let start = self.resolve(&prefix);
        if !start.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in WalkDir::new(&start).follow_links(true) {
            let entry = entry.map_err(|err| BucketError::Io {
                path: prefix.clone(),
                source: err.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let joined = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(path::normalize(&joined)?);
        }
        out.sort();
        tracing::debug!(root = %self.root.display(), prefix = %prefix, files = out.len(), "listed directory bucket");
        Ok(out)
    }
}
