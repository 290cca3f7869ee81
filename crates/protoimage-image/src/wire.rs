//! Binary image encoding.
//!
//! The envelope is
//!
//! ```text
//! message Image     { repeated ImageFile file = 1; }
//! message ImageFile { <all FileDescriptorProto fields>; ImageFileExtension ext = 8042; }
//! message ImageFileExtension { optional bool is_import = 1; optional bool is_syntax_unspecified = 2; }
//! ```
//!
//! An `ImageFile` is written as the encoded `FileDescriptorProto` followed by
//! field 8042. Protobuf merges concatenated messages, so a plain descriptor
//! decoder reads an `ImageFile` as the descriptor it wraps, and an encoded
//! image decodes as a `FileDescriptorSet`.

use prost::Message;
use prost_types::FileDescriptorProto;

use crate::{Image, ImageError, ImageFile};

#[derive(Clone, PartialEq, Message)]
struct WireImage {
    #[prost(bytes = "vec", repeated, tag = "1")]
    file: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
struct WireImageFileExtension {
    #[prost(bool, optional, tag = "1")]
    is_import: Option<bool>,
    #[prost(bool, optional, tag = "2")]
    is_syntax_unspecified: Option<bool>,
}

/// Only field 8042 of an `ImageFile`; every other field is skipped on decode.
#[derive(Clone, PartialEq, Message)]
struct WireImageFileTail {
    #[prost(message, optional, tag = "8042")]
    extension: Option<WireImageFileExtension>,
}

impl Image {
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let file = self
            .files()
            .iter()
            .map(|f| {
                let mut bytes = f.descriptor().encode_to_vec();
                let tail = WireImageFileTail {
                    extension: Some(WireImageFileExtension {
                        is_import: Some(f.is_import()),
                        is_syntax_unspecified: f.is_syntax_unspecified().then_some(true),
                    }),
                };
                bytes.extend(tail.encode_to_vec());
                bytes
            })
            .collect();
        WireImage { file }.encode_to_vec()
    }

    /// Decode an encoded image. Order and uniqueness are checked; the image
    /// may have had its imports stripped, so closure is not.
    pub fn decode(bytes: &[u8]) -> Result<Image, ImageError> {
        let wire = WireImage::decode(bytes)?;
        let mut files = Vec::with_capacity(wire.file.len());
        for raw in &wire.file {
            let descriptor = FileDescriptorProto::decode(raw.as_slice())?;
            let tail = WireImageFileTail::decode(raw.as_slice())?;
            let ext = tail.extension.unwrap_or_default();
            files.push(
                ImageFile::new(descriptor, ext.is_import.unwrap_or(false))
                    .with_syntax_unspecified(ext.is_syntax_unspecified.unwrap_or(false)),
            );
        }
        Image::new_without_closure(files)
    }
}
