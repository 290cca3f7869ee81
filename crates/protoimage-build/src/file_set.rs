//! File-set resolution: which `.proto` files does a build compile?
//!
//! ```text
//!  bucket ──list(root)──▶ *.proto under each root
//!                          │  drop excludes
//!                          │  keep only explicit --path filters (if any)
//!                          ▼
//!                     ProtoFileSet (sorted by bucket path)
//! ```
//!
//! Every file is known by two paths: its *bucket path* (where it lives in the
//! bucket) and its *name* (relative to the root it was found under). Names are
//! what imports refer to and what ends up in the Image.

use thiserror::Error;

use protoimage_storage::{path, BucketError, PathError, ReadBucket};

use crate::config::BuildConfig;

pub const PROTO_EXT: &str = ".proto";

#[derive(Debug, Error)]
pub enum FileSetError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Bucket(#[from] BucketError),

    #[error("roots {first} and {second} overlap")]
    OverlappingRoots { first: String, second: String },

    #[error("excludes {first} and {second} overlap")]
    OverlappingExcludes { first: String, second: String },

    #[error("exclude {path} is equal to a root")]
    ExcludeIsRoot { path: String },

    #[error("exclude {path} is not contained in any root")]
    ExcludeOutsideRoots { path: String },

    #[error("path {path} is not contained in any root")]
    PathOutsideRoots { path: String },

    #[error("path {path} does not exist")]
    PathNotFound { path: String },

    #[error("{name} is contained in multiple roots: {first} and {second}")]
    DuplicateName {
        name: String,
        first: String,
        second: String,
    },
}

/// Inputs to [`resolve_file_set`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileSetOptions {
    /// Root directories; empty means the whole bucket.
    pub roots: Vec<String>,
    /// Directories or files to leave out.
    pub excludes: Vec<String>,
    /// Explicit file or directory filters (bucket paths). Empty means every
    /// file under the roots.
    pub paths: Vec<String>,
}

impl FileSetOptions {
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            roots: config.build.roots.clone(),
            excludes: config.build.excludes.clone(),
            paths: Vec::new(),
        }
    }

    pub fn with_paths(mut self, paths: Vec<String>) -> Self {
        self.paths = paths;
        self
    }
}

/// One file to compile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRef {
    /// Normalized root the file was found under.
    pub root: String,
    /// Root-relative name (the descriptor name).
    pub name: String,
    /// Bucket path.
    pub path: String,
}

/// The resolved, immutable list of files to compile.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProtoFileSet {
    roots: Vec<String>,
    files: Vec<FileRef>,
    explicit: Vec<String>,
}

impl ProtoFileSet {
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Files to compile, sorted by bucket path.
    pub fn files(&self) -> &[FileRef] {
        &self.files
    }

    /// Explicit path filters the set was narrowed to, normalized.
    pub fn explicit_paths(&self) -> &[String] {
        &self.explicit
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The root-relative name for a bucket path, if the path lies under one
    /// of the roots.
    pub fn name_for_path(&self, bucket_path: &str) -> Option<String> {
        self.roots.iter().find_map(|root| {
            path::relative_to(bucket_path, root).map(str::to_string)
        })
    }
}

fn normalize_all(paths: &[String]) -> Result<Vec<String>, PathError> {
    paths.iter().map(|p| path::normalize(p)).collect()
}

/// Reject roots or excludes where one contains another.
fn check_disjoint(
    paths: &[String],
    err: impl Fn(String, String) -> FileSetError,
) -> Result<(), FileSetError> {
    for (i, a) in paths.iter().enumerate() {
        for b in &paths[i + 1..] {
            if path::is_under(a, b) || path::is_under(b, a) {
                return Err(err(a.clone(), b.clone()));
            }
        }
    }
    Ok(())
}

/// Enumerate the `.proto` files to compile.
pub fn resolve_file_set(
    bucket: &dyn ReadBucket,
    options: &FileSetOptions,
) -> Result<ProtoFileSet, FileSetError> {
    let mut roots = normalize_all(&options.roots)?;
    if roots.is_empty() {
        roots.push(".".to_string());
    }
    let excludes = normalize_all(&options.excludes)?;
    let explicit = normalize_all(&options.paths)?;

    check_disjoint(&roots, |first, second| FileSetError::OverlappingRoots { first, second })?;
    check_disjoint(&excludes, |first, second| FileSetError::OverlappingExcludes {
        first,
        second,
    })?;
    for exclude in &excludes {
        if roots.contains(exclude) {
            return Err(FileSetError::ExcludeIsRoot {
                path: exclude.clone(),
            });
        }
        if !roots.iter().any(|root| path::is_under(exclude, root)) {
            return Err(FileSetError::ExcludeOutsideRoots {
                path: exclude.clone(),
            });
        }
    }
    for target in &explicit {
        if !roots.iter().any(|root| path::is_under(target, root)) {
            return Err(FileSetError::PathOutsideRoots {
                path: target.clone(),
            });
        }
        if !bucket.exists(target)? && bucket.list(target)?.is_empty() {
            return Err(FileSetError::PathNotFound {
                path: target.clone(),
            });
        }
    }

    let mut files: Vec<FileRef> = Vec::new();
    for root in &roots {
        for bucket_path in bucket.list(root)? {
            if path::ext(&bucket_path) != PROTO_EXT {
                continue;
            }
            if excludes.iter().any(|e| path::is_under(&bucket_path, e)) {
                continue;
            }
            if !explicit.is_empty() && !explicit.iter().any(|e| path::is_under(&bucket_path, e)) {
                continue;
            }
            let Some(name) = path::relative_to(&bucket_path, root) else {
                continue;
            };
            files.push(FileRef {
                root: root.clone(),
                name: name.to_string(),
                path: bucket_path.clone(),
            });
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let mut by_name: std::collections::HashMap<&str, &FileRef> = std::collections::HashMap::new();
    for file in &files {
        if let Some(previous) = by_name.insert(file.name.as_str(), file) {
            return Err(FileSetError::DuplicateName {
                name: file.name.clone(),
                first: previous.path.clone(),
                second: file.path.clone(),
            });
        }
    }

    tracing::debug!(
        roots = roots.len(),
        excludes = excludes.len(),
        explicit = explicit.len(),
        files = files.len(),
        "resolved file set"
    );

    Ok(ProtoFileSet {
        roots,
        files,
        explicit,
    })
}
