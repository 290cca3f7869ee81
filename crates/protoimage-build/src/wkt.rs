//! Embedded well-known type sources.
//!
//! Imports of `google/protobuf/*.proto` that are not present in the bucket
//! resolve to these copies, so a build never needs a protoc include path.

macro_rules! wkt {
    ($name:literal) => {
        (
            concat!("google/protobuf/", $name),
            include_str!(concat!("wkt/google/protobuf/", $name)),
        )
    };
}

static FILES: &[(&str, &str)] = &[
    wkt!("any.proto"),
    wkt!("api.proto"),
    wkt!("descriptor.proto"),
    wkt!("duration.proto"),
    wkt!("empty.proto"),
    wkt!("field_mask.proto"),
    wkt!("source_context.proto"),
    wkt!("struct.proto"),
    wkt!("timestamp.proto"),
    wkt!("type.proto"),
    wkt!("wrappers.proto"),
];

/// Source text of the embedded file with this name.
pub fn lookup(name: &str) -> Option<&'static str> {
    FILES
        .iter()
        .find(|(file, _)| *file == name)
        .map(|(_, source)| *source)
}

/// Names of all embedded files, sorted.
pub fn names() -> impl Iterator<Item = &'static str> {
    FILES.iter().map(|(name, _)| *name)
}
