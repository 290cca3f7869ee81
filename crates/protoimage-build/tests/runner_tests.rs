use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::FileDescriptorProto;

use protoimage_build::{
    resolve_file_set, Annotation, AnnotationKind, BuildError, BuildResult, CancelToken,
    FileSetOptions, Runner,
};
use protoimage_storage::MemoryBucket;

fn bucket(files: &[(&str, &str)]) -> MemoryBucket {
    MemoryBucket::from_files(files.iter().copied()).unwrap()
}

fn build_with(runner: &Runner, files: &[(&str, &str)], options: &FileSetOptions, source_info: bool) -> BuildResult {
    let bucket = bucket(files);
    let file_set = resolve_file_set(&bucket, options).unwrap();
    runner.run(&bucket, &file_set, true, source_info).unwrap()
}

fn build(files: &[(&str, &str)]) -> BuildResult {
    build_with(&Runner::new(), files, &FileSetOptions::default(), false)
}

fn names(result: &BuildResult) -> Vec<&str> {
    result.image.names().collect()
}

fn messages(annotations: &[Annotation]) -> Vec<&str> {
    annotations.iter().map(|a| a.message.as_str()).collect()
}

fn descriptor<'r>(result: &'r BuildResult, name: &str) -> &'r FileDescriptorProto {
    result.image.file(name).unwrap().descriptor()
}

#[test]
fn imports_come_before_dependents() {
    let result = build(&[
        (
            "a.proto",
            "syntax = \"proto3\";\npackage p;\nimport \"b.proto\";\nmessage A { B b = 1; }\n",
        ),
        (
            "b.proto",
            "syntax = \"proto3\";\npackage p;\nimport \"c.proto\";\nmessage B { C c = 1; }\n",
        ),
        ("c.proto", "syntax = \"proto3\";\npackage p;\nmessage C { int64 id = 1; }\n"),
    ]);
    assert!(result.annotations.is_empty(), "{:?}", result.annotations);
    assert_eq!(names(&result), vec!["c.proto", "b.proto", "a.proto"]);

    let a = descriptor(&result, "a.proto");
    assert_eq!(a.syntax(), "proto3");
    let field = &a.message_type[0].field[0];
    assert_eq!(field.type_name(), ".p.B");
    assert_eq!(field.r#type(), Type::Message);
    assert_eq!(field.label(), Label::Optional);
    assert_eq!(field.json_name(), "b");
    assert!(result.image.files().iter().all(|f| !f.is_import()));
}

#[test]
fn well_known_types_are_embedded_imports() {
    let result = build(&[(
        "acme/event.proto",
        r#"syntax = "proto3";
package acme;
import "google/protobuf/timestamp.proto";
message Event { google.protobuf.Timestamp at = 1; }
"#,
    )]);
    assert!(result.annotations.is_empty(), "{:?}", result.annotations);
    assert_eq!(names(&result), vec!["google/protobuf/timestamp.proto", "acme/event.proto"]);
    assert_eq!(result.image.import_names(), vec!["google/protobuf/timestamp.proto"]);
    assert_eq!(
        descriptor(&result, "acme/event.proto").message_type[0].field[0].type_name(),
        ".google.protobuf.Timestamp"
    );

    let bucket = bucket(&[(
        "acme/event.proto",
        "syntax = \"proto3\";\nimport \"google/protobuf/empty.proto\";\n",
    )]);
    let file_set = resolve_file_set(&bucket, &FileSetOptions::default()).unwrap();
    let stripped = Runner::new().run(&bucket, &file_set, false, false).unwrap();
    assert_eq!(stripped.image.names().collect::<Vec<_>>(), vec!["acme/event.proto"]);
    let subset = stripped
        .image
        .with_specific_names(false, &["acme/event.proto"])
        .unwrap();
    assert_eq!(subset.names().collect::<Vec<_>>(), vec!["acme/event.proto"]);
    assert!(subset.import_names().is_empty());
}

#[test]
fn files_outside_the_explicit_paths_are_imports() {
    let files = [
        ("proto/a.proto", "syntax = \"proto3\";\nimport \"b.proto\";\n"),
        ("proto/b.proto", "syntax = \"proto3\";\n"),
    ];
    let options = FileSetOptions {
        roots: vec!["proto".to_string()],
        excludes: Vec::new(),
        paths: vec!["proto/a.proto".to_string()],
    };
    let result = build_with(&Runner::new(), &files, &options, false);
    assert!(result.annotations.is_empty(), "{:?}", result.annotations);
    assert_eq!(names(&result), vec!["b.proto", "a.proto"]);
    assert!(result.image.file("b.proto").unwrap().is_import());
    assert!(!result.image.file("a.proto").unwrap().is_import());
}

#[test]
fn missing_import_excludes_only_the_importer() {
    let result = build(&[
        ("a.proto", "syntax = \"proto3\";\nimport \"nope.proto\";\n"),
        ("ok.proto", "syntax = \"proto3\";\nmessage Ok {}\n"),
    ]);
    assert_eq!(names(&result), vec!["ok.proto"]);
    assert_eq!(result.annotations.len(), 1);
    let annotation = &result.annotations[0];
    assert_eq!(annotation.path, "a.proto");
    assert_eq!(annotation.kind, AnnotationKind::Import);
    assert_eq!(annotation.start_line, 2);
    assert_eq!(annotation.message, "import \"nope.proto\": file does not exist");
}

#[test]
fn syntax_errors_propagate_to_dependents() {
    let result = build(&[
        ("a.proto", "syntax = \"proto3\";\nmessage {\n"),
        ("b.proto", "syntax = \"proto3\";\nimport \"a.proto\";\n"),
        ("c.proto", "syntax = \"proto3\";\nimport \"b.proto\";\n"),
    ]);
    assert!(result.image.is_empty());
    let by_path: Vec<(&str, AnnotationKind)> = result
        .annotations
        .iter()
        .map(|a| (a.path.as_str(), a.kind))
        .collect();
    assert_eq!(
        by_path,
        vec![
            ("a.proto", AnnotationKind::Syntax),
            ("b.proto", AnnotationKind::Import),
            ("c.proto", AnnotationKind::Import),
        ]
    );
    assert_eq!(result.annotations[1].message, "Import \"a.proto\" was not found or had errors.");
    assert_eq!(result.annotations[2].message, "Import \"b.proto\" was not found or had errors.");
}

#[test]
fn import_cycles_are_reported() {
    let result = build(&[
        ("a.proto", "syntax = \"proto3\";\nimport \"b.proto\";\n"),
        ("b.proto", "syntax = \"proto3\";\nimport \"a.proto\";\n"),
        ("c.proto", "syntax = \"proto3\";\n"),
    ]);
    assert_eq!(names(&result), vec!["c.proto"]);
    assert!(messages(&result.annotations)
        .contains(&"File recursively imports itself: a.proto -> b.proto -> a.proto"));
}

#[test]
fn duplicate_imports_are_reported() {
    let result = build(&[
        ("a.proto", "syntax = \"proto3\";\nimport \"b.proto\";\nimport \"b.proto\";\n"),
        ("b.proto", "syntax = \"proto3\";\n"),
    ]);
    assert_eq!(names(&result), vec!["b.proto"]);
    assert_eq!(messages(&result.annotations), vec!["Import \"b.proto\" was listed twice."]);
}

#[test]
fn undefined_types_are_located() {
    let result = build(&[(
        "a.proto",
        "syntax = \"proto3\";\npackage acme.v1;\n\nmessage A {\n  Missing m = 1;\n}\n",
    )]);
    assert!(result.image.is_empty());
    assert_eq!(result.annotations.len(), 1);
    let annotation = &result.annotations[0];
    assert_eq!(annotation.kind, AnnotationKind::Compile);
    assert_eq!(annotation.start_line, 5);
    assert_eq!(annotation.start_column, 3);
    assert_eq!(annotation.message, "\"Missing\" is not defined.");
    assert_eq!(annotation.to_string(), "a.proto:5:3:\"Missing\" is not defined.");
}

#[test]
fn link_errors_propagate_to_dependents_as_import_errors() {
    let result = build(&[
        ("a.proto", "syntax = \"proto3\";\nmessage A {\n  Nope n = 1;\n}\n"),
        ("b.proto", "syntax = \"proto3\";\nimport \"a.proto\";\nmessage B {\n  A.Inner x = 1;\n}\n"),
        ("c.proto", "syntax = \"proto3\";\nimport \"b.proto\";\nmessage C {}\n"),
        ("ok.proto", "syntax = \"proto3\";\nmessage Ok {}\n"),
    ]);
    assert_eq!(names(&result), vec!["ok.proto"]);
    let found: Vec<(&str, AnnotationKind, &str)> = result
        .annotations
        .iter()
        .map(|a| (a.path.as_str(), a.kind, a.message.as_str()))
        .collect();
    assert_eq!(
        found,
        vec![
            ("a.proto", AnnotationKind::Compile, "\"Nope\" is not defined."),
            ("b.proto", AnnotationKind::Import, "Import \"a.proto\" was not found or had errors."),
            ("c.proto", AnnotationKind::Import, "Import \"b.proto\" was not found or had errors."),
        ]
    );
    assert_eq!(result.annotations[1].start_line, 2);
}

#[test]
fn symbols_must_be_imported() {
    let result = build(&[
        ("c.proto", "syntax = \"proto3\";\npackage p;\nmessage C {}\n"),
        ("b.proto", "syntax = \"proto3\";\npackage p;\nimport public \"c.proto\";\n"),
        ("d.proto", "syntax = \"proto3\";\npackage p;\nimport \"c.proto\";\n"),
        (
            "ok.proto",
            "syntax = \"proto3\";\npackage p;\nimport \"b.proto\";\nmessage Ok { C c = 1; }\n",
        ),
        (
            "bad.proto",
            "syntax = \"proto3\";\npackage p;\nimport \"d.proto\";\nmessage Bad { C c = 1; }\n",
        ),
    ]);
    assert!(result.image.file("ok.proto").is_some());
    assert!(result.image.file("bad.proto").is_none());
    assert_eq!(
        messages(&result.annotations),
        vec![
            "\"p.C\" seems to be defined in \"c.proto\", which is not imported by \"bad.proto\".  To use it here, please add the necessary import."
        ]
    );
}

#[test]
fn duplicate_symbols_across_files() {
    let result = build(&[
        ("a.proto", "syntax = \"proto3\";\npackage p;\nmessage Dup {}\n"),
        ("b.proto", "syntax = \"proto3\";\npackage p;\nmessage Dup {}\n"),
    ]);
    assert_eq!(names(&result), vec!["a.proto"]);
    assert_eq!(
        messages(&result.annotations),
        vec!["\"p.Dup\" is already defined in file \"a.proto\"."]
    );
    assert_eq!(result.annotations[0].path, "b.proto");
}

#[test]
fn message_and_enum_validation() {
    let result = build(&[(
        "a.proto",
        r#"syntax = "proto3";
package acme;
message M {
  string a = 1;
  string b = 1;
  reserved 7;
  int32 c = 7;
}
enum E {
  E_ONE = 1;
}
"#,
    )]);
    assert_eq!(
        messages(&result.annotations),
        vec![
            "Field number 1 has already been used in \"acme.M\" by field \"a\".",
            "Field \"c\" uses reserved number 7.",
            "The first enum value must be zero in proto3.",
        ]
    );
}

#[test]
fn maps_and_proto3_optional_are_synthesised() {
    let result = build(&[(
        "a.proto",
        r#"syntax = "proto3";
package acme;
message M {
  map<string, int32> counts = 1;
  optional string name = 2;
  oneof kind {
    string x = 3;
  }
}
"#,
    )]);
    assert!(result.annotations.is_empty(), "{:?}", result.annotations);
    let message = &descriptor(&result, "a.proto").message_type[0];

    let counts = &message.field[0];
    assert_eq!(counts.label(), Label::Repeated);
    assert_eq!(counts.type_name(), ".acme.M.CountsEntry");
    let entry = &message.nested_type[0];
    assert_eq!(entry.name(), "CountsEntry");
    assert_eq!(entry.options.as_ref().unwrap().map_entry, Some(true));
    assert_eq!(entry.field[0].r#type(), Type::String);
    assert_eq!(entry.field[1].r#type(), Type::Int32);

    let oneofs: Vec<&str> = message.oneof_decl.iter().map(|o| o.name()).collect();
    assert_eq!(oneofs, vec!["kind", "_name"]);
    let name = &message.field[1];
    assert_eq!(name.proto3_optional, Some(true));
    assert_eq!(name.oneof_index, Some(1));
    assert_eq!(message.field[2].oneof_index, Some(0));
}

#[test]
fn custom_options_resolve_against_extensions() {
    let files = [(
        "acme/a.proto",
        r#"syntax = "proto3";
package acme;
import "google/protobuf/descriptor.proto";
extend google.protobuf.FieldOptions {
  string tag = 50000;
}
message M {
  string name = 1 [(tag) = "x", deprecated = true];
}
"#,
    )];
    let result = build(&files);
    assert!(result.annotations.is_empty(), "{:?}", result.annotations);
    assert_eq!(result.image.import_names(), vec!["google/protobuf/descriptor.proto"]);

    let file = descriptor(&result, "acme/a.proto");
    assert_eq!(file.extension[0].extendee(), ".google.protobuf.FieldOptions");
    let options = file.message_type[0].field[0].options.as_ref().unwrap();
    assert_eq!(options.deprecated, Some(true));
    let custom = &options.uninterpreted_option[0];
    assert_eq!(custom.name[0].name_part, "acme.tag");
    assert!(custom.name[0].is_extension);
    assert_eq!(custom.string_value.as_deref(), Some(&b"x"[..]));

    let result = build(&[(
        "b.proto",
        "syntax = \"proto3\";\nmessage M { string name = 1 [(nope) = 1]; }\n",
    )]);
    assert_eq!(
        messages(&result.annotations),
        vec!["Option \"(nope)\" unknown. Ensure that your proto definition file imports the proto which defines the option."]
    );
}

#[test]
fn proto2_defaults_and_groups() {
    let result = build(&[(
        "a.proto",
        r#"syntax = "proto2";
package acme;
message M {
  optional int32 n = 1 [default = -3];
  optional double d = 2 [default = 1.5];
  optional Color c = 3 [default = BLUE];
  repeated group Item = 4 {
    optional string id = 1;
  }
  extensions 100 to max;
}
enum Color {
  RED = 1;
  BLUE = 2;
}
extend M {
  optional string note = 100;
}
"#,
    )]);
    assert!(result.annotations.is_empty(), "{:?}", result.annotations);
    let file = descriptor(&result, "a.proto");
    assert_eq!(file.syntax, None);
    let message = &file.message_type[0];
    assert_eq!(message.field[0].default_value(), "-3");
    assert_eq!(message.field[1].default_value(), "1.5");
    assert_eq!(message.field[2].default_value(), "BLUE");
    assert_eq!(message.field[3].name(), "item");
    assert_eq!(message.field[3].r#type(), Type::Group);
    assert_eq!(message.field[3].type_name(), ".acme.M.Item");
    assert_eq!(message.nested_type[0].name(), "Item");
    assert_eq!(message.extension_range[0].end, Some(536_870_912));
    assert_eq!(file.extension[0].extendee(), ".acme.M");

    let result = build(&[(
        "b.proto",
        "syntax = \"proto2\";\nmessage M { extensions 100 to 199; }\nextend M { optional int32 x = 5; }\n",
    )]);
    assert_eq!(
        messages(&result.annotations),
        vec!["\"M\" does not declare 5 as an extension number."]
    );
}

#[test]
fn services_resolve_message_types() {
    let result = build(&[(
        "a.proto",
        r#"syntax = "proto3";
package acme;
message Req {}
message Resp {}
enum Kind { KIND_UNSPECIFIED = 0; }
service Svc {
  rpc Get(Req) returns (stream Resp);
  rpc Bad(Kind) returns (Resp);
}
"#,
    )]);
    assert_eq!(messages(&result.annotations), vec!["\"Kind\" is not a message type."]);

    let result = build(&[(
        "a.proto",
        "syntax = \"proto3\";\npackage acme;\nmessage Req {}\nservice Svc { rpc Get(stream Req) returns (Req); }\n",
    )]);
    let method = &descriptor(&result, "a.proto").service[0].method[0];
    assert_eq!(method.input_type(), ".acme.Req");
    assert_eq!(method.client_streaming, Some(true));
    assert_eq!(method.server_streaming, None);
}

#[test]
fn source_info_is_optional() {
    let files = [(
        "a.proto",
        "syntax = \"proto3\";\npackage acme;\n\n// A thing.\nmessage Thing {}\n",
    )];
    let without = build_with(&Runner::new(), &files, &FileSetOptions::default(), false);
    assert!(descriptor(&without, "a.proto").source_code_info.is_none());

    let with = build_with(&Runner::new(), &files, &FileSetOptions::default(), true);
    let info = descriptor(&with, "a.proto").source_code_info.as_ref().unwrap();
    let message = info.location.iter().find(|l| l.path == vec![4, 0]).unwrap();
    assert_eq!(message.leading_comments.as_deref(), Some(" A thing.\n"));
    assert_eq!(message.span, vec![4, 0, 16]);
    assert!(info.location.iter().any(|l| l.path.is_empty()));
    assert!(info.location.iter().any(|l| l.path == vec![12]));
}

#[test]
fn output_does_not_depend_on_parallelism() {
    let sources: Vec<(String, String)> = (0..40)
        .map(|i| {
            let import = if i > 0 {
                format!("import \"gen/f{}.proto\";\n", i - 1)
            } else {
                String::new()
            };
            let field = if i > 0 {
                format!("  M{} prev = 1;\n", i - 1)
            } else {
                String::new()
            };
            (
                format!("gen/f{i}.proto"),
                format!("syntax = \"proto3\";\npackage gen;\n{import}message M{i} {{\n{field}}}\n"),
            )
        })
        .collect();
    let files: Vec<(&str, &str)> = sources.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();

    let serial = build_with(&Runner::new().with_parallelism(1), &files, &FileSetOptions::default(), true);
    let parallel = build_with(&Runner::new().with_parallelism(8), &files, &FileSetOptions::default(), true);
    assert!(serial.annotations.is_empty(), "{:?}", serial.annotations);
    assert_eq!(serial.image.len(), 40);
    assert_eq!(serial.image, parallel.image);
    assert_eq!(serial.image.files()[0].name(), "gen/f0.proto");
}

#[test]
fn cancelled_runs_return_no_image() {
    let bucket = bucket(&[("a.proto", "syntax = \"proto3\";\n")]);
    let file_set = resolve_file_set(&bucket, &FileSetOptions::default()).unwrap();
    let token = CancelToken::new();
    token.cancel();
    let result = Runner::new().with_cancel(token).run(&bucket, &file_set, true, false);
    assert!(matches!(result, Err(BuildError::Cancelled)));
}

#[test]
fn build_resolves_the_file_set_first() {
    let bucket = bucket(&[
        ("proto/a.proto", "syntax = \"proto3\";\nimport \"b.proto\";\n"),
        ("proto/b.proto", "syntax = \"proto3\";\n"),
    ]);
    let options = FileSetOptions {
        roots: vec!["proto".to_string()],
        excludes: Vec::new(),
        paths: vec!["proto/a.proto".to_string()],
    };
    let result = protoimage_build::build(&bucket, &options, false, false).unwrap();
    assert!(result.annotations.is_empty(), "{:?}", result.annotations);
    assert_eq!(names(&result), vec!["a.proto"]);

    let options = FileSetOptions {
        paths: vec!["missing.proto".to_string()],
        ..FileSetOptions::default()
    };
    let err = protoimage_build::build(&bucket, &options, true, false).unwrap_err();
    assert!(matches!(err, BuildError::FileSet(_)), "{err}");
}

#[test]
fn annotations_are_sorted_by_path_then_position() {
    let result = build(&[
        ("b.proto", "syntax = \"proto3\";\nmessage B { X x = 1; }\n"),
        ("a.proto", "syntax = \"proto3\";\nmessage A {\n  Y y = 1;\n  Z z = 2;\n}\n"),
    ]);
    let order: Vec<String> = result.annotations.iter().map(|a| a.to_string()).collect();
    assert_eq!(
        order,
        vec![
            "a.proto:3:3:\"Y\" is not defined.",
            "a.proto:4:3:\"Z\" is not defined.",
            "b.proto:2:13:\"X\" is not defined.",
        ]
    );
}
