//! Images: ordered, deduplicated descriptor graphs.
//!
//! An [`Image`] is the output of a build: every compiled file as a
//! `FileDescriptorProto`, in dependency order, each marked as either
//! explicitly requested or present only because something imports it.
//!
//! ```text
//!   index:   0            1             2
//!          ┌──────────┐ ┌──────────┐ ┌──────────┐
//!          │ any.proto│◄│ a.proto  │◄│ b.proto  │   (arrows = imports)
//!          │ import   │ │ target   │ │ target   │
//!          └──────────┘ └──────────┘ └──────────┘
//! ```
//!
//! Invariants (checked by [`Image::new`]):
//!
//! 1. every import of a file appears strictly earlier in the sequence
//! 2. no file name appears twice
//! 3. every import is present (closure)
//!
//! Images are never mutated; transformations in [`transform`] return new
//! values.

pub mod transform;
pub mod wire;

use std::collections::HashMap;

use prost_types::FileDescriptorProto;
use thiserror::Error;

use protoimage_storage::PathError;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("image file has no name")]
    UnnamedFile,

    #[error("invalid image file name {name:?}: {source}")]
    InvalidName {
        name: String,
        #[source]
        source: PathError,
    },

    #[error("duplicate file in image: {name}")]
    DuplicateFile { name: String },

    #[error("{file} imports {import}, which is not present in the Image")]
    MissingImport { file: String, import: String },

    #[error("{file} imports {import}, which does not appear before it in the Image")]
    OutOfOrder { file: String, import: String },

    #[error("{name} is not present in the Image")]
    NotPresent { name: String },

    #[error("failed to decode image: {0}")]
    Decode(#[from] prost::DecodeError),
}

// ============================================================================
// ImageFile
// ============================================================================

/// One compiled file plus its import-only marker.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFile {
    descriptor: FileDescriptorProto,
    is_import: bool,
    is_syntax_unspecified: bool,
}

impl ImageFile {
    pub fn new(descriptor: FileDescriptorProto, is_import: bool) -> Self {
        Self {
            descriptor,
            is_import,
            is_syntax_unspecified: false,
        }
    }

    /// Marks a file that had no `syntax` statement (proto2 implied).
    pub fn with_syntax_unspecified(mut self, unspecified: bool) -> Self {
        self.is_syntax_unspecified = unspecified;
        self
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn is_import(&self) -> bool {
        self.is_import
    }

    pub fn is_syntax_unspecified(&self) -> bool {
        self.is_syntax_unspecified
    }

    pub fn descriptor(&self) -> &FileDescriptorProto {
        &self.descriptor
    }

    /// Import paths as declared, in declaration order.
    pub fn imports(&self) -> &[String] {
        &self.descriptor.dependency
    }

    pub(crate) fn with_import(&self, is_import: bool) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            is_import,
            is_syntax_unspecified: self.is_syntax_unspecified,
        }
    }
}

// ============================================================================
// Image
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Image {
    files: Vec<ImageFile>,
    index: HashMap<String, usize>,
}

impl Image {
    /// Build an image, checking order, uniqueness and closure.
    pub fn new(files: Vec<ImageFile>) -> Result<Self, ImageError> {
        Self::validated(files, true)
    }

    /// Like [`Image::new`], but tolerates imports that are absent from the
    /// image. Used for images that had their imports stripped.
    pub fn new_without_closure(files: Vec<ImageFile>) -> Result<Self, ImageError> {
        Self::validated(files, false)
    }

    fn validated(files: Vec<ImageFile>, require_closure: bool) -> Result<Self, ImageError> {
        let mut index: HashMap<String, usize> = HashMap::with_capacity(files.len());
        for (i, file) in files.iter().enumerate() {
            let name = file.name();
            if name.is_empty() {
                return Err(ImageError::UnnamedFile);
            }
            let normalized =
                protoimage_storage::path::normalize(name).map_err(|source| ImageError::InvalidName {
                    name: name.to_string(),
                    source,
                })?;
            if normalized != name {
                return Err(ImageError::InvalidName {
                    name: name.to_string(),
                    source: PathError::NotNormalized {
                        path: name.to_string(),
                    },
                });
            }
            if index.insert(name.to_string(), i).is_some() {
                return Err(ImageError::DuplicateFile {
                    name: name.to_string(),
                });
            }
        }

        for (i, file) in files.iter().enumerate() {
            for import in file.imports() {
                match index.get(import) {
                    Some(&j) if j < i => {}
                    Some(_) => {
                        return Err(ImageError::OutOfOrder {
                            file: file.name().to_string(),
                            import: import.clone(),
                        })
                    }
                    None if require_closure => {
                        return Err(ImageError::MissingImport {
                            file: file.name().to_string(),
                            import: import.clone(),
                        })
                    }
                    None => {}
                }
            }
        }

        Ok(Self { files, index })
    }

    pub fn files(&self) -> &[ImageFile] {
        &self.files
    }

    pub fn file(&self, name: &str) -> Option<&ImageFile> {
        self.index.get(name).map(|&i| &self.files[i])
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Names of all files, in image order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(ImageFile::name)
    }

    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn fd(name: &str, deps: &[&str]) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(name.to_string()),
            dependency: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_topologically_ordered_files() {
        let image = Image::new(vec![
            ImageFile::new(fd("a.proto", &[]), true),
            ImageFile::new(fd("b.proto", &["a.proto"]), false),
        ])
        .unwrap();
        assert_eq!(image.len(), 2);
        assert!(image.file("a.proto").unwrap().is_import());
        assert!(image.file("c.proto").is_none());
    }

    #[test]
    fn rejects_duplicates() {
        let err = Image::new(vec![
            ImageFile::new(fd("a.proto", &[]), false),
            ImageFile::new(fd("a.proto", &[]), false),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ImageError::DuplicateFile {
                name: "a.proto".to_string()
            }
        );
    }

    #[test]
    fn rejects_imports_that_come_later() {
        let err = Image::new(vec![
            ImageFile::new(fd("b.proto", &["a.proto"]), false),
            ImageFile::new(fd("a.proto", &[]), false),
        ])
        .unwrap_err();
        assert!(matches!(err, ImageError::OutOfOrder { .. }));
    }

    #[test]
    fn closure_is_required_unless_relaxed() {
        let files = vec![ImageFile::new(fd("b.proto", &["a.proto"]), false)];
        assert!(matches!(
            Image::new(files.clone()).unwrap_err(),
            ImageError::MissingImport { .. }
        ));
        assert_eq!(Image::new_without_closure(files).unwrap().len(), 1);
    }

    #[test]
    fn rejects_unnormalized_names() {
        let err = Image::new(vec![ImageFile::new(fd("a/../b.proto", &[]), false)]).unwrap_err();
        assert!(matches!(err, ImageError::InvalidName { .. }));
        let err = Image::new(vec![ImageFile::new(fd("", &[]), false)]).unwrap_err();
        assert_eq!(err, ImageError::UnnamedFile);
    }
}
