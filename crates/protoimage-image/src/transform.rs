//! Pure transformations over an [`Image`].
//!
//! None of these touch the source image; each returns a fresh value.

use std::collections::{BTreeSet, HashSet};

use prost_types::{FileDescriptorProto, FileDescriptorSet};

use crate::{Image, ImageError, ImageFile};

impl Image {
    /// The bare descriptor sequence, in image order, without import markers.
    pub fn to_descriptor_set(&self) -> FileDescriptorSet {
        FileDescriptorSet {
            file: self
                .files()
                .iter()
                .map(|f| f.descriptor().clone())
                .collect::<Vec<FileDescriptorProto>>(),
        }
    }

    /// Names of every import-only file, sorted.
    pub fn import_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .files()
            .iter()
            .filter(|f| f.is_import())
            .map(|f| f.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Only the files the caller asked for, in their original relative order.
    ///
    /// The result is not closed over its imports.
    pub fn without_imports(&self) -> Image {
        let files: Vec<ImageFile> = self
            .files()
            .iter()
            .filter(|f| !f.is_import())
            .cloned()
            .collect();
        let index = files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name().to_string(), i))
            .collect();
        // Dropping files keeps order and uniqueness intact.
        Image { files, index }
    }

    /// The import closure of `names` within this image.
    ///
    /// Requested files come back as non-imports; everything pulled in only
    /// through imports is marked as an import. Names are normalized before
    /// lookup. With `allow_not_found`, names absent from the image are
    /// skipped; otherwise the first one is reported as
    /// [`ImageError::NotPresent`].
    pub fn with_specific_names<S: AsRef<str>>(
        &self,
        allow_not_found: bool,
        names: &[S],
    ) -> Result<Image, ImageError> {
        let mut targets: BTreeSet<String> = BTreeSet::new();
        for raw in names {
            let raw = raw.as_ref();
            let name = protoimage_storage::path::normalize(raw).unwrap_or_else(|_| raw.to_string());
            if self.position(&name).is_some() {
                targets.insert(name);
            } else if !allow_not_found {
                return Err(ImageError::NotPresent { name });
            }
        }

        let mut reachable: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = targets.iter().map(String::as_str).collect();
        while let Some(name) = stack.pop() {
            if !reachable.insert(name) {
                continue;
            }
            if let Some(file) = self.file(name) {
                for import in file.imports() {
                    if !reachable.contains(import.as_str()) {
                        stack.push(import.as_str());
                    }
                }
            }
        }

        let files: Vec<ImageFile> = self
            .files()
            .iter()
            .filter(|f| reachable.contains(f.name()))
            .map(|f| f.with_import(!targets.contains(f.name())))
            .collect();
        // The closure of a subset is only as complete as the source image.
        if self.is_closed() {
            Image::new(files)
        } else {
            Image::new_without_closure(files)
        }
    }

    /// Whether every import of every file is itself in the image.
    pub fn is_closed(&self) -> bool {
        self.files()
            .iter()
            .all(|f| f.imports().iter().all(|import| self.position(import).is_some()))
    }
}
