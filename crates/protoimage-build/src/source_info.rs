//! `SourceCodeInfo` assembly.
//!
//! Paths are descriptor.proto field numbers interleaved with repeated-field
//! indexes, e.g. `[4, 0, 2, 1]` is the second field of the first message.

use prost_types::source_code_info::Location;
use prost_types::SourceCodeInfo;

use protoimage_dsl::ast::{Comments, Declaration};
use protoimage_dsl::Span;

pub(crate) mod path {
    pub const FILE_PACKAGE: i32 = 2;
    pub const FILE_DEPENDENCY: i32 = 3;
    pub const FILE_MESSAGE: i32 = 4;
    pub const FILE_ENUM: i32 = 5;
    pub const FILE_SERVICE: i32 = 6;
    pub const FILE_EXTENSION: i32 = 7;
    pub const FILE_OPTIONS: i32 = 8;
    pub const FILE_PUBLIC_DEPENDENCY: i32 = 10;
    pub const FILE_WEAK_DEPENDENCY: i32 = 11;
    pub const FILE_SYNTAX: i32 = 12;

    pub const MESSAGE_NAME: i32 = 1;
    pub const MESSAGE_FIELD: i32 = 2;
    pub const MESSAGE_NESTED: i32 = 3;
    pub const MESSAGE_ENUM: i32 = 4;
    pub const MESSAGE_EXTENSION_RANGE: i32 = 5;
    pub const MESSAGE_EXTENSION: i32 = 6;
    pub const MESSAGE_OPTIONS: i32 = 7;
    pub const MESSAGE_ONEOF: i32 = 8;
    pub const MESSAGE_RESERVED_RANGE: i32 = 9;
    pub const MESSAGE_RESERVED_NAME: i32 = 10;

    pub const FIELD_NAME: i32 = 1;
    pub const FIELD_EXTENDEE: i32 = 2;
    pub const FIELD_NUMBER: i32 = 3;
    pub const FIELD_LABEL: i32 = 4;
    pub const FIELD_TYPE: i32 = 5;
    pub const FIELD_TYPE_NAME: i32 = 6;
    pub const FIELD_DEFAULT: i32 = 7;
    pub const FIELD_OPTIONS: i32 = 8;
    pub const FIELD_JSON_NAME: i32 = 10;

    pub const ONEOF_NAME: i32 = 1;
    pub const ONEOF_OPTIONS: i32 = 2;

    pub const RANGE_START: i32 = 1;
    pub const RANGE_END: i32 = 2;
    pub const EXTENSION_RANGE_OPTIONS: i32 = 3;

    pub const ENUM_NAME: i32 = 1;
    pub const ENUM_VALUE: i32 = 2;
    pub const ENUM_OPTIONS: i32 = 3;
    pub const ENUM_RESERVED_RANGE: i32 = 4;
    pub const ENUM_RESERVED_NAME: i32 = 5;

    pub const ENUM_VALUE_NAME: i32 = 1;
    pub const ENUM_VALUE_NUMBER: i32 = 2;
    pub const ENUM_VALUE_OPTIONS: i32 = 3;

    pub const SERVICE_NAME: i32 = 1;
    pub const SERVICE_METHOD: i32 = 2;
    pub const SERVICE_OPTIONS: i32 = 3;

    pub const METHOD_NAME: i32 = 1;
    pub const METHOD_INPUT: i32 = 2;
    pub const METHOD_OUTPUT: i32 = 3;
    pub const METHOD_OPTIONS: i32 = 4;
    pub const METHOD_CLIENT_STREAMING: i32 = 5;
    pub const METHOD_SERVER_STREAMING: i32 = 6;
}

/// Collects source locations. A disabled builder drops
/// everything, so callers never need to branch on the setting.
#[derive(Debug, Default)]
pub(crate) struct SourceInfoBuilder {
    enabled: bool,
    locations: Vec<Location>,
}

impl SourceInfoBuilder {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            locations: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, path: &[i32], span: Span) {
        self.push(path, span, None);
    }

    /// A declaration: its span plus any attached comments.
    pub(crate) fn add_decl(&mut self, path: &[i32], decl: &Declaration) {
        self.push(path, decl.span, Some(&decl.comments));
    }

    /// `base` extended by `tail`.
    pub(crate) fn add_child(&mut self, base: &[i32], tail: &[i32], span: Span) {
        if !self.enabled {
            return;
        }
        let mut path = base.to_vec();
        path.extend_from_slice(tail);
        self.push(&path, span, None);
    }

    fn push(&mut self, path: &[i32], span: Span, comments: Option<&Comments>) {
        if !self.enabled {
            return;
        }
        let mut location = Location {
            path: path.to_vec(),
            span: span.to_source_info(),
            ..Default::default()
        };
        if let Some(comments) = comments {
            location.leading_comments = comments.leading.clone();
            location.trailing_comments = comments.trailing.clone();
            location.leading_detached_comments = comments.detached.clone();
        }
        self.locations.push(location);
    }

    /// Locations come out in source order; a parent precedes children that
    /// start at the same position.
    pub(crate) fn finish(mut self) -> Option<SourceCodeInfo> {
        if !self.enabled {
            return None;
        }
        self.locations
            .sort_by_key(|l| (l.span.first().copied(), l.span.get(1).copied(), l.path.len()));
        Some(SourceCodeInfo {
            location: self.locations,
        })
    }
}

/// `base` followed by `tail`.
pub(crate) fn child(base: &[i32], tail: &[i32]) -> Vec<i32> {
    let mut path = Vec::with_capacity(base.len() + tail.len());
    path.extend_from_slice(base);
    path.extend_from_slice(tail);
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_builder_produces_nothing() {
        let mut builder = SourceInfoBuilder::new(false);
        builder.add(&[], Span::new(0, 0, 3, 0));
        assert!(builder.finish().is_none());
    }

    #[test]
    fn keeps_comments_and_span_shape() {
        let mut builder = SourceInfoBuilder::new(true);
        let decl = Declaration {
            span: Span::new(2, 0, 2, 12),
            comments: Comments {
                leading: Some(" hello\n".to_string()),
                trailing: None,
                detached: vec![" stray\n".to_string()],
            },
        };
        builder.add_decl(&[path::FILE_MESSAGE, 0], &decl);
        builder.add_child(&[path::FILE_MESSAGE, 0], &[path::MESSAGE_NAME], Span::new(2, 8, 2, 11));
        builder.add(&[], Span::new(0, 0, 5, 1));
        let info = builder.finish().unwrap();
        assert_eq!(info.location.len(), 3);
        assert_eq!(info.location[0].span, vec![0, 0, 5, 1]);
        assert_eq!(info.location[1].span, vec![2, 0, 12]);
        assert_eq!(info.location[1].leading_comments.as_deref(), Some(" hello\n"));
        assert_eq!(info.location[1].leading_detached_comments, vec![" stray\n"]);
        assert_eq!(info.location[2].path, vec![4, 0, 1]);
    }

    #[test]
    fn child_paths_concatenate() {
        assert_eq!(child(&[4, 1], &[2, 0]), vec![4, 1, 2, 0]);
    }
}
