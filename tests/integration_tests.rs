//! Integration tests for the complete protoimage pipeline
//!
//! These tests drive the crates together:
//! - bucket → file set → runner → Image
//! - Image → transformations → wire format
//! - Image → FileDescriptorSet, compared against protoc when available
//!
//! Run with: cargo test --test integration_tests
//! The googleapis and protoc tests are ignored by default:
//! PROTOIMAGE_GOOGLEAPIS_DIR=/path/to/googleapis cargo test --test integration_tests -- --ignored

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

use prost::Message;
use prost_types::FileDescriptorSet;

use protoimage_build::{resolve_file_set, BuildResult, FileSetOptions, Runner};
use protoimage_image::{Image, ImageError};
use protoimage_storage::{DirBucket, MemoryBucket, ReadBucket};

// ============================================================================
// Generated corpus
// ============================================================================

const PACKAGES: usize = 6;
const FILES_PER_PACKAGE: usize = 5;

/// An interdependent corpus: every file imports its predecessor in the same
/// package and the last file of the previous package, and uses types from
/// both plus a few well-known types.
fn corpus_sources() -> Vec<(String, String)> {
    let mut files = Vec::new();
    for p in 0..PACKAGES {
        for f in 0..FILES_PER_PACKAGE {
            let mut imports = vec!["google/protobuf/timestamp.proto".to_string()];
            let mut fields = vec!["  google.protobuf.Timestamp at = 1;".to_string()];
            if f > 0 {
                imports.push(format!("corp/p{p}/f{}.proto", f - 1));
                fields.push(format!("  M{} prev = 2;", f - 1));
                fields.push(format!("  M{}.Kind prev_kind = 3;", f - 1));
            }
            if p > 0 {
                imports.push(format!("corp/p{}/f{}.proto", p - 1, FILES_PER_PACKAGE - 1));
                fields.push(format!(
                    "  .corp.p{}.M{} upstream = 4;",
                    p - 1,
                    FILES_PER_PACKAGE - 1
                ));
            }
            let imports: String = imports
                .iter()
                .map(|i| format!("import \"{i}\";\n"))
                .collect();
            let source = format!(
                r#"syntax = "proto3";

package corp.p{p};

{imports}
option go_package = "example.com/corp/p{p}";

// M{f} is generated.
message M{f} {{
{fields}
  map<string, int64> counts = 10;
  oneof choice {{
    string label = 11;
    int32 code = 12;
  }}
  optional bool flag = 13;
  repeated Nested items = 14;

  message Nested {{
    string id = 1;
  }}

  enum Kind {{
    KIND_UNSPECIFIED = 0;
    KIND_A = 1;
  }}
}}

service Svc{f} {{
  rpc Get(M{f}) returns (M{f});
}}
"#,
                fields = fields.join("\n"),
            );
            files.push((format!("corp/p{p}/f{f}.proto"), source));
        }
    }
    files
}

struct Corpus {
    sources: Vec<(String, String)>,
    bucket: MemoryBucket,
    built: BuildResult,
}

fn corpus() -> &'static Corpus {
    static CORPUS: OnceLock<Corpus> = OnceLock::new();
    CORPUS.get_or_init(|| {
        let sources = corpus_sources();
        let bucket = MemoryBucket::from_files(sources.iter().map(|(p, c)| (p.as_str(), c.as_str())))
            .expect("corpus bucket");
        let file_set = resolve_file_set(&bucket, &FileSetOptions::default()).expect("file set");
        let built = Runner::new()
            .run(&bucket, &file_set, true, true)
            .expect("corpus build");
        Corpus {
            sources,
            bucket,
            built,
        }
    })
}

fn assert_topological(image: &Image) {
    let mut seen: HashSet<&str> = HashSet::new();
    for file in image.files() {
        for import in file.imports() {
            assert!(seen.contains(import.as_str()), "{} before {import}", file.name());
        }
        assert!(seen.insert(file.name()), "duplicate {}", file.name());
    }
}

#[test]
fn test_generated_corpus_builds_cleanly() {
    let corpus = corpus();
    assert!(corpus.built.annotations.is_empty(), "{:?}", corpus.built.annotations);

    let image = &corpus.built.image;
    assert_eq!(image.len(), PACKAGES * FILES_PER_PACKAGE + 1);
    assert_eq!(image.import_names(), vec!["google/protobuf/timestamp.proto"]);
    assert_eq!(image.files()[0].name(), "google/protobuf/timestamp.proto");
    assert_topological(image);

    let last = image.file("corp/p5/f4.proto").expect("last file");
    let message = &last.descriptor().message_type[0];
    let upstream = message.field.iter().find(|f| f.name() == "upstream").unwrap();
    assert_eq!(upstream.type_name(), ".corp.p4.M4");
    let prev_kind = message.field.iter().find(|f| f.name() == "prev_kind").unwrap();
    assert_eq!(prev_kind.type_name(), ".corp.p5.M3.Kind");
    assert_eq!(prev_kind.json_name(), "prevKind");
    let service = &last.descriptor().service[0];
    assert_eq!(service.method[0].input_type(), ".corp.p5.M4");
}

#[test]
fn test_corpus_transformations() {
    let image = &corpus().built.image;

    let without = image.without_imports();
    assert_eq!(without.len(), PACKAGES * FILES_PER_PACKAGE);
    assert!(without.import_names().is_empty());
    assert_eq!(without.without_imports(), without);

    let subset = image
        .with_specific_names(true, &["corp/p1/../p1/f1.proto", "corp/nope.proto"])
        .expect("subset");
    let names: Vec<&str> = subset.names().collect();
    assert_eq!(
        names,
        vec![
            "google/protobuf/timestamp.proto",
            "corp/p0/f0.proto",
            "corp/p0/f1.proto",
            "corp/p0/f2.proto",
            "corp/p0/f3.proto",
            "corp/p0/f4.proto",
            "corp/p1/f0.proto",
            "corp/p1/f1.proto",
        ]
    );
    assert_eq!(subset.without_imports().names().collect::<Vec<_>>(), vec!["corp/p1/f1.proto"]);

    let err = image
        .with_specific_names(false, &["corp/p1/f1.proto", "corp/nope.proto"])
        .unwrap_err();
    assert_eq!(err.to_string(), "corp/nope.proto is not present in the Image");
    assert!(matches!(err, ImageError::NotPresent { .. }));
}

#[test]
fn test_corpus_wire_format() {
    let image = &corpus().built.image;
    let decoded = Image::decode(&image.encode_to_vec()).expect("decode");
    assert_eq!(&decoded, image);

    let set = FileDescriptorSet::decode(image.to_descriptor_set().encode_to_vec().as_slice())
        .expect("descriptor set");
    assert_eq!(set.file.len(), image.len());
    assert_eq!(set.file[0].name(), "google/protobuf/timestamp.proto");
}

#[test]
fn test_dir_bucket_matches_memory_bucket() {
    let corpus = corpus();
    let dir = tempfile::tempdir().unwrap();
    for (path, contents) in &corpus.sources {
        let full = dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, contents).unwrap();
    }
    let bucket = DirBucket::new(dir.path()).unwrap();
    assert_eq!(
        bucket.list(".").unwrap(),
        corpus.bucket.list(".").unwrap()
    );
    let file_set = resolve_file_set(&bucket, &FileSetOptions::default()).unwrap();
    let built = Runner::new().run(&bucket, &file_set, true, true).unwrap();
    assert!(built.annotations.is_empty());
    assert_eq!(built.image, corpus.built.image);
    bucket.close().unwrap();
}

#[test]
fn test_broken_file_only_excludes_its_dependents() {
    let corpus = corpus();
    let mut bucket = corpus.bucket.clone();
    bucket
        .insert(
            "corp/p3/f2.proto",
            "syntax = \"proto3\";\npackage corp.p3;\nmessage M2 { Nope n = 1; }\n",
        )
        .unwrap();
    let file_set = resolve_file_set(&bucket, &FileSetOptions::default()).unwrap();
    let built = Runner::new().run(&bucket, &file_set, true, false).unwrap();

    // Files importing two broken files get one annotation per import.
    let mut broken: Vec<&str> = built.annotations.iter().map(|a| a.path.as_str()).collect();
    broken.dedup();
    assert_eq!(
        broken,
        vec![
            "corp/p3/f2.proto",
            "corp/p3/f3.proto",
            "corp/p3/f4.proto",
            "corp/p4/f0.proto",
            "corp/p4/f1.proto",
            "corp/p4/f2.proto",
            "corp/p4/f3.proto",
            "corp/p4/f4.proto",
            "corp/p5/f0.proto",
            "corp/p5/f1.proto",
            "corp/p5/f2.proto",
            "corp/p5/f3.proto",
            "corp/p5/f4.proto",
        ]
    );
    assert_eq!(built.annotations[0].message, "\"Nope\" is not defined.");
    assert_eq!(
        built.annotations[1].message,
        "Import \"corp/p3/f2.proto\" was not found or had errors."
    );
    // p0..p2, p3/f0, p3/f1 and the well-known import.
    assert_eq!(built.image.len(), 3 * FILES_PER_PACKAGE + 2 + 1);
    assert_topological(&built.image);
}

// ============================================================================
// googleapis
// ============================================================================

const WELL_KNOWN: [&str; 11] = [
    "google/protobuf/any.proto",
    "google/protobuf/api.proto",
    "google/protobuf/descriptor.proto",
    "google/protobuf/duration.proto",
    "google/protobuf/empty.proto",
    "google/protobuf/field_mask.proto",
    "google/protobuf/source_context.proto",
    "google/protobuf/struct.proto",
    "google/protobuf/timestamp.proto",
    "google/protobuf/type.proto",
    "google/protobuf/wrappers.proto",
];

fn googleapis_dir() -> Option<String> {
    let dir = std::env::var("PROTOIMAGE_GOOGLEAPIS_DIR").ok();
    if dir.is_none() {
        eprintln!("PROTOIMAGE_GOOGLEAPIS_DIR not set, skipping");
    }
    dir
}

/// googleapis at 37c923effe8b002884466074f84bc4e78e6ade62.
#[test]
#[ignore]
fn test_googleapis() {
    let Some(dir) = googleapis_dir() else { return };
    let bucket = DirBucket::new(&dir).unwrap();
    let file_set = resolve_file_set(&bucket, &FileSetOptions::default()).unwrap();
    let built = Runner::new().run(&bucket, &file_set, true, false).unwrap();

    assert!(built.annotations.is_empty(), "{:?}", built.annotations);
    let image = built.image;
    assert_eq!(image.len(), 1585);
    assert_eq!(image.import_names(), WELL_KNOWN);
    assert_topological(&image);

    let without = image.without_imports();
    assert_eq!(without.len(), 1574);
    assert!(without.import_names().is_empty());
    assert_eq!(without.without_imports().len(), 1574);

    let names = [
        "google/protobuf/descriptor.proto",
        "google/protobuf/api.proto",
        "google/../google/type/date.proto",
        "google/foo/nonsense.proto",
    ];
    assert_well_known_subset(&image, &names);
    bucket.close().unwrap();
}

/// Requested names come back as targets and their closure as imports.
fn assert_well_known_subset(image: &Image, names: &[&str]) {
    let subset = image.with_specific_names(true, names).unwrap();
    assert_eq!(subset.len(), 6);
    assert_eq!(
        subset.import_names(),
        vec![
            "google/protobuf/any.proto",
            "google/protobuf/source_context.proto",
            "google/protobuf/type.proto",
        ]
    );
    let stripped = subset.without_imports();
    let mut targets: Vec<&str> = stripped.names().collect();
    targets.sort_unstable();
    assert_eq!(
        targets,
        vec![
            "google/protobuf/api.proto",
            "google/protobuf/descriptor.proto",
            "google/type/date.proto",
        ]
    );
    assert_eq!(
        image.with_specific_names(false, names).unwrap_err().to_string(),
        "google/foo/nonsense.proto is not present in the Image"
    );
}

#[test]
fn test_well_known_subset() {
    let bucket = MemoryBucket::from_files([
        (
            "google/type/date.proto",
            "syntax = \"proto3\";\npackage google.type;\nmessage Date { int32 year = 1; int32 month = 2; int32 day = 3; }\n",
        ),
        (
            "acme/deps.proto",
            "syntax = \"proto3\";\nimport \"google/protobuf/api.proto\";\nimport \"google/protobuf/descriptor.proto\";\n",
        ),
    ])
    .unwrap();
    let options = FileSetOptions::default();
    let file_set = resolve_file_set(&bucket, &options).unwrap();
    let built = Runner::new().run(&bucket, &file_set, true, false).unwrap();
    assert!(built.annotations.is_empty(), "{:?}", built.annotations);

    assert_well_known_subset(
        &built.image,
        &[
            "google/protobuf/descriptor.proto",
            "google/protobuf/api.proto",
            "google/../google/type/date.proto",
            "google/foo/nonsense.proto",
        ],
    );
}

// ============================================================================
// protoc differential
// ============================================================================

fn protoc_available() -> bool {
    let found = Command::new("protoc").arg("--version").output().is_ok();
    if !found {
        eprintln!("protoc not on PATH, skipping");
    }
    found
}

fn protoc_descriptor_set(root: &Path, names: &[String]) -> FileDescriptorSet {
    let out = tempfile::NamedTempFile::new().unwrap();
    let status = Command::new("protoc")
        .arg("-I")
        .arg(root)
        .arg("--include_imports")
        .arg(format!("--descriptor_set_out={}", out.path().display()))
        .args(names)
        .current_dir(root)
        .status()
        .expect("run protoc");
    assert!(status.success(), "protoc failed");
    FileDescriptorSet::decode(fs::read(out.path()).unwrap().as_slice()).unwrap()
}

fn assert_matches_protoc(root: &Path, image: &Image) {
    let names: Vec<String> = image
        .files()
        .iter()
        .filter(|f| !f.is_import())
        .map(|f| f.name().to_string())
        .collect();
    let expected = protoc_descriptor_set(root, &names);
    let actual = image.to_descriptor_set();
    let expected_names: Vec<&str> = expected.file.iter().map(|f| f.name()).collect();
    let actual_names: Vec<&str> = actual.file.iter().map(|f| f.name()).collect();
    assert_eq!(actual_names, expected_names);
    for (ours, theirs) in actual.file.iter().zip(&expected.file) {
        assert_eq!(ours, theirs, "{} differs from protoc", ours.name());
    }
}

#[test]
#[ignore]
fn test_corpus_matches_protoc() {
    if !protoc_available() {
        return;
    }
    let corpus = corpus();
    let dir = tempfile::tempdir().unwrap();
    for (path, contents) in &corpus.sources {
        let full = dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, contents).unwrap();
    }
    let bucket = DirBucket::new(dir.path()).unwrap();
    let file_set = resolve_file_set(&bucket, &FileSetOptions::default()).unwrap();
    let built = Runner::new().run(&bucket, &file_set, true, false).unwrap();
    assert!(built.annotations.is_empty());
    assert_matches_protoc(dir.path(), &built.image);
}

#[test]
#[ignore]
fn test_googleapis_matches_protoc() {
    let Some(dir) = googleapis_dir() else { return };
    if !protoc_available() {
        return;
    }
    let bucket = DirBucket::new(&dir).unwrap();
    let file_set = resolve_file_set(&bucket, &FileSetOptions::default()).unwrap();
    let built = Runner::new().run(&bucket, &file_set, true, false).unwrap();
    assert!(built.annotations.is_empty(), "{:?}", built.annotations);
    assert_matches_protoc(Path::new(&dir), &built.image);
}
