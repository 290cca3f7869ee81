//! Image building for protoimage.
//!
//! This crate turns a bucket of `.proto` sources into an [`Image`]:
//!
//! - [`file_set`]: which files to compile (roots, excludes, explicit paths)
//! - [`runner`]: parse, resolve and link them into descriptors
//! - [`annotation`]: the non-fatal problems found along the way
//! - [`config`]: `protoimage.yaml`
//! - [`wkt`]: the embedded well-known types
//!
//! Schema defects never abort a build. They come back as [`Annotation`]s next
//! to a best-effort [`Image`] that contains every file that compiled cleanly.

use thiserror::Error;

use protoimage_image::ImageError;
use protoimage_storage::BucketError;

pub mod annotation;
pub mod cancel;
pub mod config;
pub mod file_set;
pub mod runner;
pub mod wkt;

mod link;
mod source_info;
mod symbols;

pub use annotation::{print_annotations, Annotation, AnnotationKind, ErrorFormat, Severity};
pub use cancel::CancelToken;
pub use config::{BuildConfig, ConfigError, CONFIG_FILE_NAME};
pub use file_set::{resolve_file_set, FileRef, FileSetError, FileSetOptions, ProtoFileSet};
pub use protoimage_image::Image;
pub use runner::{BuildResult, Runner};

/// Fatal build failures. Schema problems are [`Annotation`]s, not errors.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Io(#[from] BucketError),

    #[error("build cancelled")]
    Cancelled,

    #[error(transparent)]
    FileSet(#[from] FileSetError),

    /// The assembled files violated an Image invariant.
    #[error("internal error: {0}")]
    Image(#[from] ImageError),

    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Resolve the file set described by `options` and compile it.
pub fn build(
    bucket: &dyn protoimage_storage::ReadBucket,
    options: &FileSetOptions,
    include_imports: bool,
    include_source_info: bool,
) -> Result<BuildResult, BuildError> {
    let file_set = resolve_file_set(bucket, options)?;
    Runner::new().run(bucket, &file_set, include_imports, include_source_info)
}
