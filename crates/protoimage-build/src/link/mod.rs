//! Linking: AST + symbol table → `FileDescriptorProto`.
//!
//! Each file is linked independently against the shared, read-only
//! [`SymbolTable`]; problems are collected as annotations rather than
//! returned as errors, so one bad reference never hides the next.

mod options;
mod resolve;
mod values;

use std::collections::{HashMap, HashSet};

use prost_types::descriptor_proto::{ExtensionRange, ReservedRange};
use prost_types::enum_descriptor_proto::EnumReservedRange;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumOptions, EnumValueDescriptorProto,
    EnumValueOptions, ExtensionRangeOptions, FieldDescriptorProto, FieldOptions,
    FileDescriptorProto, FileOptions, MessageOptions, MethodDescriptorProto, MethodOptions,
    OneofDescriptorProto, OneofOptions, ServiceDescriptorProto, ServiceOptions,
};

use protoimage_dsl::ast::*;
use protoimage_dsl::{Span, Syntax};

use crate::annotation::{Annotation, AnnotationKind};
use crate::runner::ParsedFile;
use crate::source_info::{child, path, SourceInfoBuilder};
use crate::symbols::{
    group_field_name, json_name, map_entry_name, qualify, range_bounds, SymbolInfo, SymbolTable,
};

use resolve::FieldType;

const MAX_FIELD_NUMBER: i64 = 536_870_911;
const FIRST_RESERVED_NUMBER: i64 = 19_000;
const LAST_RESERVED_NUMBER: i64 = 19_999;

/// Shared, read-only inputs of the link phase.
pub(crate) struct LinkContext<'a> {
    pub files: &'a [ParsedFile],
    /// Per file, per import statement: the imported file, if it was found.
    pub deps: &'a [Vec<Option<usize>>],
    pub table: &'a SymbolTable,
    pub include_source_info: bool,
}

impl<'a> LinkContext<'a> {
    /// Files whose symbols `index` may reference: itself, its direct
    /// imports, and whatever those re-export through `import public`.
    pub(crate) fn visible_files(&self, index: usize) -> HashSet<usize> {
        let mut visible = HashSet::from([index]);
        let mut stack: Vec<usize> = self.deps[index].iter().flatten().copied().collect();
        while let Some(dep) = stack.pop() {
            if !visible.insert(dep) {
                continue;
            }
            for (import, target) in self.files[dep].ast.imports.iter().zip(&self.deps[dep]) {
                if let (ImportKind::Public, Some(target)) = (import.kind, target) {
                    stack.push(*target);
                }
            }
        }
        visible
    }
}

/// Build the descriptor for file `index`.
pub(crate) fn link_file<'a>(ctx: &'a LinkContext<'a>, index: usize) -> (FileDescriptorProto, Vec<Annotation>) {
    let file = &ctx.files[index];
    let linker = Linker {
        ctx,
        file,
        visible: ctx.visible_files(index),
        proto3: file.ast.syntax == Syntax::Proto3,
        annotations: Vec::new(),
        source: SourceInfoBuilder::new(ctx.include_source_info),
    };
    linker.link()
}

#[derive(Clone, Copy)]
enum FieldSite {
    Message,
    Oneof(i32),
    Extension,
}

pub(crate) struct Linker<'a> {
    ctx: &'a LinkContext<'a>,
    file: &'a ParsedFile,
    visible: HashSet<usize>,
    proto3: bool,
    annotations: Vec<Annotation>,
    source: SourceInfoBuilder,
}

fn is_pseudo_option(decl: &OptionDecl) -> bool {
    matches!(decl.simple_name(), Some("default" | "json_name"))
}

impl<'a> Linker<'a> {
    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.annotations
            .push(Annotation::error(&self.file.path, AnnotationKind::Compile, message).at(span));
    }

    fn link(mut self) -> (FileDescriptorProto, Vec<Annotation>) {
        let file: &'a ParsedFile = self.file;
        let ast = &file.ast;
        let package = ast
            .package
            .as_ref()
            .map(|p| p.name.value.clone())
            .unwrap_or_default();

        let mut fd = FileDescriptorProto {
            name: Some(file.name.clone()),
            package: ast.package.as_ref().map(|p| p.name.value.clone()),
            ..Default::default()
        };
        self.source.add(&[], ast.span);
        if let Some(decl) = &ast.syntax_decl {
            self.source.add_decl(&[path::FILE_SYNTAX], decl);
        }
        // protoc leaves `syntax` unset for proto2.
        if self.proto3 {
            fd.syntax = Some(Syntax::Proto3.as_str().to_string());
        }
        if let Some(p) = &ast.package {
            self.source.add_decl(&[path::FILE_PACKAGE], &p.decl);
        }

        for (i, import) in ast.imports.iter().enumerate() {
            fd.dependency.push(import.path.value.clone());
            self.source.add_decl(&[path::FILE_DEPENDENCY, i as i32], &import.decl);
            match import.kind {
                ImportKind::Public => {
                    let k = fd.public_dependency.len() as i32;
                    self.source.add(&[path::FILE_PUBLIC_DEPENDENCY, k], import.decl.span);
                    fd.public_dependency.push(i as i32);
                }
                ImportKind::Weak => {
                    let k = fd.weak_dependency.len() as i32;
                    self.source.add(&[path::FILE_WEAK_DEPENDENCY, k], import.decl.span);
                    fd.weak_dependency.push(i as i32);
                }
                ImportKind::Default => {}
            }
        }

        fd.options = self.options::<FileOptions>(&[path::FILE_OPTIONS], &package, &ast.options);

        for message in &ast.messages {
            let p = [path::FILE_MESSAGE, fd.message_type.len() as i32];
            let built = self.message(&p, &package, &message.name, &message.body, &message.decl);
            fd.message_type.push(built);
        }
        for e in &ast.enums {
            let p = [path::FILE_ENUM, fd.enum_type.len() as i32];
            let built = self.enumeration(&p, &package, e);
            fd.enum_type.push(built);
        }
        for service in &ast.services {
            let p = [path::FILE_SERVICE, fd.service.len() as i32];
            let built = self.service(&p, &package, service);
            fd.service.push(built);
        }
        for extend in &ast.extends {
            self.extend(
                &[path::FILE_EXTENSION],
                &[path::FILE_MESSAGE],
                &package,
                extend,
                &mut fd.extension,
                &mut fd.message_type,
            );
        }

        fd.source_code_info = self.source.finish();
        (fd, self.annotations)
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    fn message(
        &mut self,
        msg_path: &[i32],
        scope: &str,
        name: &Ident,
        body: &[MessageElement],
        decl: &Declaration,
    ) -> DescriptorProto {
        let full = qualify(scope, &name.value);
        self.source.add_decl(msg_path, decl);
        self.source.add_child(msg_path, &[path::MESSAGE_NAME], name.span);

        let mut msg = DescriptorProto {
            name: Some(name.value.clone()),
            ..Default::default()
        };
        // (number, name, span) of every non-extension field, for validation.
        let mut numbered: Vec<(i64, String, Span)> = Vec::new();
        let mut proto3_optional: Vec<usize> = Vec::new();
        let mut option_decls: Vec<&OptionDecl> = Vec::new();

        for element in body {
            match element {
                MessageElement::Field(field) => {
                    let index = msg.field.len();
                    let p = child(msg_path, &[path::MESSAGE_FIELD, index as i32]);
                    let built = self.field(&p, &full, field, FieldSite::Message);
                    if built.proto3_optional == Some(true) {
                        proto3_optional.push(index);
                    }
                    numbered.push((field.number.value, field.name.value.clone(), field.number.span));
                    msg.field.push(built);
                }
                MessageElement::Map(map) => {
                    let field_path = child(msg_path, &[path::MESSAGE_FIELD, msg.field.len() as i32]);
                    let entry_path = child(msg_path, &[path::MESSAGE_NESTED, msg.nested_type.len() as i32]);
                    let (field, entry) = self.map_field(&field_path, &entry_path, &full, map);
                    numbered.push((map.number.value, map.name.value.clone(), map.number.span));
                    msg.field.push(field);
                    msg.nested_type.push(entry);
                }
                MessageElement::Group(group) => {
                    let field_path = child(msg_path, &[path::MESSAGE_FIELD, msg.field.len() as i32]);
                    let type_path = child(msg_path, &[path::MESSAGE_NESTED, msg.nested_type.len() as i32]);
                    let (field, nested) = self.group(&field_path, &type_path, &full, group, FieldSite::Message);
                    numbered.push((
                        group.number.value,
                        group_field_name(&group.name.value),
                        group.number.span,
                    ));
                    msg.field.push(field);
                    msg.nested_type.push(nested);
                }
                MessageElement::Oneof(oneof) => {
                    let oneof_index = msg.oneof_decl.len() as i32;
                    let oneof_path = child(msg_path, &[path::MESSAGE_ONEOF, oneof_index]);
                    self.source.add_decl(&oneof_path, &oneof.decl);
                    self.source.add_child(&oneof_path, &[path::ONEOF_NAME], oneof.name.span);
                    let options = self.options::<OneofOptions>(
                        &child(&oneof_path, &[path::ONEOF_OPTIONS]),
                        &qualify(&full, &oneof.name.value),
                        oneof.body.iter().filter_map(|e| match e {
                            OneofElement::Option(o) => Some(o),
                            _ => None,
                        }),
                    );
                    msg.oneof_decl.push(OneofDescriptorProto {
                        name: Some(oneof.name.value.clone()),
                        options,
                    });

                    let mut members = 0;
                    for element in &oneof.body {
                        let field_path = child(msg_path, &[path::MESSAGE_FIELD, msg.field.len() as i32]);
                        match element {
                            OneofElement::Field(field) => {
                                let built = self.field(&field_path, &full, field, FieldSite::Oneof(oneof_index));
                                numbered.push((field.number.value, field.name.value.clone(), field.number.span));
                                msg.field.push(built);
                            }
                            OneofElement::Group(group) => {
                                let type_path =
                                    child(msg_path, &[path::MESSAGE_NESTED, msg.nested_type.len() as i32]);
                                let (field, nested) = self.group(
                                    &field_path,
                                    &type_path,
                                    &full,
                                    group,
                                    FieldSite::Oneof(oneof_index),
                                );
                                numbered.push((
                                    group.number.value,
                                    group_field_name(&group.name.value),
                                    group.number.span,
                                ));
                                msg.field.push(field);
                                msg.nested_type.push(nested);
                            }
                            OneofElement::Option(_) => continue,
                        }
                        members += 1;
                    }
                    if members == 0 {
                        self.error(oneof.name.span, "Oneof must have at least one field.");
                    }
                }
                MessageElement::Message(nested) => {
                    let p = child(msg_path, &[path::MESSAGE_NESTED, msg.nested_type.len() as i32]);
                    let built = self.message(&p, &full, &nested.name, &nested.body, &nested.decl);
                    msg.nested_type.push(built);
                }
                MessageElement::Enum(e) => {
                    let p = child(msg_path, &[path::MESSAGE_ENUM, msg.enum_type.len() as i32]);
                    let built = self.enumeration(&p, &full, e);
                    msg.enum_type.push(built);
                }
                MessageElement::Extend(extend) => {
                    self.extend(
                        &child(msg_path, &[path::MESSAGE_EXTENSION]),
                        &child(msg_path, &[path::MESSAGE_NESTED]),
                        &full,
                        extend,
                        &mut msg.extension,
                        &mut msg.nested_type,
                    );
                }
                MessageElement::Extensions(ranges) => {
                    self.source.add_decl(&child(msg_path, &[path::MESSAGE_EXTENSION_RANGE]), &ranges.decl);
                    let first = msg.extension_range.len();
                    for range in &ranges.ranges {
                        let p = child(msg_path, &[path::MESSAGE_EXTENSION_RANGE, msg.extension_range.len() as i32]);
                        self.range_source(&p, range);
                        let (start, end) = range_bounds(range);
                        self.check_range(range, start, end, MAX_FIELD_NUMBER + 1, "Extension");
                        msg.extension_range.push(ExtensionRange {
                            start: Some(start as i32),
                            end: Some(end as i32),
                            options: None,
                        });
                    }
                    if !ranges.options.is_empty() {
                        // The options of one statement apply to each of its ranges.
                        for index in first..msg.extension_range.len() {
                            let p = child(
                                msg_path,
                                &[path::MESSAGE_EXTENSION_RANGE, index as i32, path::EXTENSION_RANGE_OPTIONS],
                            );
                            msg.extension_range[index].options =
                                self.options::<ExtensionRangeOptions>(&p, &full, &ranges.options);
                        }
                    }
                }
                MessageElement::Reserved(reserved) => match &reserved.kind {
                    ReservedKind::Ranges(ranges) => {
                        self.source.add_decl(&child(msg_path, &[path::MESSAGE_RESERVED_RANGE]), &reserved.decl);
                        for range in ranges {
                            let p = child(msg_path, &[path::MESSAGE_RESERVED_RANGE, msg.reserved_range.len() as i32]);
                            self.range_source(&p, range);
                            let (start, end) = range_bounds(range);
                            self.check_range(range, start, end, MAX_FIELD_NUMBER + 1, "Reserved");
                            msg.reserved_range.push(ReservedRange {
                                start: Some(start as i32),
                                end: Some(end as i32),
                            });
                        }
                    }
                    ReservedKind::Names(names) => {
                        self.source.add_decl(&child(msg_path, &[path::MESSAGE_RESERVED_NAME]), &reserved.decl);
                        for name in names {
                            let p = child(msg_path, &[path::MESSAGE_RESERVED_NAME, msg.reserved_name.len() as i32]);
                            self.source.add(&p, name.span);
                            msg.reserved_name.push(name.value.clone());
                        }
                    }
                },
                MessageElement::Option(option) => option_decls.push(option),
            }
        }

        msg.options = self.options::<MessageOptions>(&child(msg_path, &[path::MESSAGE_OPTIONS]), &full, option_decls);

        // Synthetic oneofs for proto3 `optional` come after every real oneof.
        if !proto3_optional.is_empty() {
            let mut taken: HashSet<String> = msg
                .field
                .iter()
                .filter_map(|f| f.name.clone())
                .chain(msg.oneof_decl.iter().filter_map(|o| o.name.clone()))
                .collect();
            for index in proto3_optional {
                let field_name = msg.field[index].name.clone().unwrap_or_default();
                let mut oneof_name = if field_name.starts_with('_') {
                    field_name
                } else {
                    format!("_{field_name}")
                };
                while taken.contains(&oneof_name) {
                    oneof_name = format!("X{oneof_name}");
                }
                taken.insert(oneof_name.clone());
                msg.field[index].oneof_index = Some(msg.oneof_decl.len() as i32);
                msg.oneof_decl.push(OneofDescriptorProto {
                    name: Some(oneof_name),
                    options: None,
                });
            }
        }

        self.validate_message(&full, &msg, &numbered);
        msg
    }

    fn range_source(&mut self, range_path: &[i32], range: &Range) {
        self.source.add(range_path, range.span);
        self.source.add_child(range_path, &[path::RANGE_START], range.start.span);
        let end_span = range.end.as_ref().map_or(range.start.span, |end| end.span);
        self.source.add_child(range_path, &[path::RANGE_END], end_span);
    }

    fn check_range(&mut self, range: &Range, start: i64, end: i64, limit: i64, what: &str) {
        if start <= 0 {
            self.error(range.start.span, format!("{what} numbers must be positive integers."));
        } else if end > limit {
            let span = range.end.as_ref().map_or(range.start.span, |end| end.span);
            self.error(span, format!("{what} numbers cannot be greater than {}.", limit - 1));
        } else if end <= start {
            self.error(range.span, format!("{what} range end number must be greater than start number."));
        }
    }

    fn validate_message(&mut self, full: &str, msg: &DescriptorProto, numbered: &[(i64, String, Span)]) {
        let mut by_number: HashMap<i64, &str> = HashMap::new();
        for (number, name, span) in numbered {
            if let Some(previous) = by_number.get(number) {
                self.error(
                    *span,
                    format!("Field number {number} has already been used in \"{full}\" by field \"{previous}\"."),
                );
            } else {
                by_number.insert(*number, name);
            }

            for range in &msg.reserved_range {
                let (start, end) = (range.start() as i64, range.end() as i64);
                if (start..end).contains(number) {
                    self.error(*span, format!("Field \"{name}\" uses reserved number {number}."));
                }
            }
            if msg.reserved_name.iter().any(|n| n == name) {
                self.error(*span, format!("Field name \"{name}\" is reserved."));
            }
            for range in &msg.extension_range {
                let (start, end) = (range.start() as i64, range.end() as i64);
                if (start..end).contains(number) {
                    self.error(
                        *span,
                        format!("Extension range {start} to {} includes field \"{name}\" ({number}).", end - 1),
                    );
                }
            }
        }

        if self.proto3 {
            let mut by_json: HashMap<String, &str> = HashMap::new();
            for field in &msg.field {
                let name = field.name();
                let key = json_name(name).to_ascii_lowercase();
                if let Some(previous) = by_json.get(&key) {
                    let span = numbered
                        .iter()
                        .find(|(_, n, _)| n == name)
                        .map(|(_, _, s)| *s)
                        .unwrap_or_default();
                    self.error(
                        span,
                        format!(
                            "The JSON camel-case name of field \"{name}\" conflicts with field \"{previous}\". This is not allowed in proto3."
                        ),
                    );
                } else {
                    by_json.insert(key, name);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Fields
    // ------------------------------------------------------------------------

    fn field_number(&mut self, number: &Spanned<i64>, site: FieldSite) -> i32 {
        let n = number.value;
        if n <= 0 {
            self.error(number.span, "Field numbers must be positive integers.");
        } else if n > MAX_FIELD_NUMBER {
            self.error(
                number.span,
                format!("Field numbers cannot be greater than {MAX_FIELD_NUMBER}."),
            );
        } else if !matches!(site, FieldSite::Extension) && (FIRST_RESERVED_NUMBER..=LAST_RESERVED_NUMBER).contains(&n) {
            self.error(
                number.span,
                format!(
                    "Field numbers {FIRST_RESERVED_NUMBER} through {LAST_RESERVED_NUMBER} are reserved for the protocol buffer library implementation."
                ),
            );
        }
        n.clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }

    /// Name, number, label and site of a field; the type is filled in by
    /// the caller.
    #[allow(clippy::too_many_arguments)]
    fn field_shell(
        &mut self,
        field_path: &[i32],
        label: Option<&Spanned<LabelKind>>,
        name: &str,
        name_span: Span,
        number: &Spanned<i64>,
        decl: &Declaration,
        site: FieldSite,
    ) -> FieldDescriptorProto {
        self.source.add_decl(field_path, decl);
        let mut fd = FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(self.field_number(number, site)),
            json_name: Some(json_name(name)),
            ..Default::default()
        };
        let label_kind = match label {
            Some(label) => {
                self.source.add_child(field_path, &[path::FIELD_LABEL], label.span);
                match label.value {
                    LabelKind::Optional => Label::Optional,
                    LabelKind::Required => Label::Required,
                    LabelKind::Repeated => Label::Repeated,
                }
            }
            None => Label::Optional,
        };
        fd.label = Some(label_kind as i32);
        if self.proto3
            && matches!(label.map(|l| l.value), Some(LabelKind::Optional))
            && !matches!(site, FieldSite::Extension)
        {
            fd.proto3_optional = Some(true);
        }
        if let FieldSite::Oneof(index) = site {
            fd.oneof_index = Some(index);
        }
        self.source.add_child(field_path, &[path::FIELD_NAME], name_span);
        self.source.add_child(field_path, &[path::FIELD_NUMBER], number.span);
        fd
    }

    fn field(&mut self, field_path: &[i32], scope: &str, field: &Field, site: FieldSite) -> FieldDescriptorProto {
        let mut fd = self.field_shell(
            field_path,
            field.label.as_ref(),
            &field.name.value,
            field.name.span,
            &field.number,
            &field.decl,
            site,
        );
        let field_full = qualify(scope, &field.name.value);

        let type_tag = if is_scalar_type(&field.ty.value) {
            path::FIELD_TYPE
        } else {
            path::FIELD_TYPE_NAME
        };
        self.source.add_child(field_path, &[type_tag], field.ty.span);

        let resolved = self.field_type(&field.ty, &field_full);
        if let Some(ft) = &resolved {
            fd.r#type = Some(ft.ty as i32);
            fd.type_name = ft.type_name.clone();
            if ft.ty == Type::Enum && self.proto3 && !matches!(site, FieldSite::Extension) {
                if let Some(symbol) = ft.symbol {
                    if self.ctx.files[symbol.file].ast.syntax == Syntax::Proto2 {
                        self.error(
                            field.ty.span,
                            format!(
                                "Enum type \"{}\" is not a proto3 enum, but is used in \"{scope}\" which is a proto3 message type.",
                                ft.type_name.as_deref().unwrap_or_default().trim_start_matches('.')
                            ),
                        );
                    }
                }
            }
        }
        self.field_options(field_path, &mut fd, &field_full, &field.options, resolved.as_ref(), site);
        fd
    }

    /// Pseudo-options (`default`, `json_name`) plus the standard and custom
    /// field options.
    fn field_options(
        &mut self,
        field_path: &[i32],
        fd: &mut FieldDescriptorProto,
        field_full: &str,
        decls: &[OptionDecl],
        resolved: Option<&FieldType<'a>>,
        site: FieldSite,
    ) {
        let mut default_seen = false;
        let mut json_seen = false;
        for decl in decls.iter().filter(|d| is_pseudo_option(d)) {
            match decl.simple_name() {
                Some("default") => {
                    if std::mem::replace(&mut default_seen, true) {
                        self.error(decl.name_span(), "Already set option \"default\".");
                        continue;
                    }
                    self.source.add_child(field_path, &[path::FIELD_DEFAULT], decl.value.span);
                    if fd.label == Some(Label::Repeated as i32) {
                        self.error(decl.name_span(), "Repeated fields can't have default values.");
                        continue;
                    }
                    let Some(ft) = resolved else { continue };
                    let enum_values = match ft.symbol.map(|s| &s.info) {
                        Some(SymbolInfo::Enum { values }) => Some(values.as_slice()),
                        _ => None,
                    };
                    match values::default_value(ft.ty, &decl.value.value, enum_values) {
                        Ok(value) => fd.default_value = Some(value),
                        Err(message) => self.error(decl.value.span, message),
                    }
                }
                Some("json_name") => {
                    if std::mem::replace(&mut json_seen, true) {
                        self.error(decl.name_span(), "Already set option \"json_name\".");
                        continue;
                    }
                    if matches!(site, FieldSite::Extension) {
                        self.error(decl.name_span(), "option json_name is not allowed on extension fields.");
                        continue;
                    }
                    self.source.add_child(field_path, &[path::FIELD_JSON_NAME], decl.value.span);
                    match &decl.value.value {
                        OptionValue::Str(bytes) => {
                            fd.json_name = Some(String::from_utf8_lossy(bytes).into_owned());
                        }
                        _ => self.error(decl.value.span, "Expected string for JSON name."),
                    }
                }
                _ => {}
            }
        }

        let options = self.options::<FieldOptions>(
            &child(field_path, &[path::FIELD_OPTIONS]),
            field_full,
            decls.iter().filter(|d| !is_pseudo_option(d)),
        );
        if let Some(options) = &options {
            if options.packed.is_some() {
                let packable = fd.label == Some(Label::Repeated as i32)
                    && resolved.is_some_and(|ft| {
                        !matches!(ft.ty, Type::String | Type::Bytes | Type::Message | Type::Group)
                    });
                if !packable {
                    let span = decls
                        .iter()
                        .find(|d| d.simple_name() == Some("packed"))
                        .map(|d| d.name_span())
                        .unwrap_or_default();
                    self.error(span, "[packed = true] can only be specified for repeated primitive fields.");
                }
            }
        }
        fd.options = options;
    }

    fn map_field(
        &mut self,
        field_path: &[i32],
        entry_path: &[i32],
        scope: &str,
        map: &MapField,
    ) -> (FieldDescriptorProto, DescriptorProto) {
        let mut fd = self.field_shell(
            field_path,
            None,
            &map.name.value,
            map.name.span,
            &map.number,
            &map.decl,
            FieldSite::Message,
        );
        let field_full = qualify(scope, &map.name.value);
        let entry_name = map_entry_name(&map.name.value);
        fd.label = Some(Label::Repeated as i32);
        fd.r#type = Some(Type::Message as i32);
        fd.type_name = Some(format!(".{}", qualify(scope, &entry_name)));
        self.source.add_child(field_path, &[path::FIELD_TYPE_NAME], map.type_span);

        let key_type = match self.field_type(&map.key_type, &field_full) {
            Some(ft) => {
                match ft.ty {
                    Type::Float | Type::Double | Type::Bytes | Type::Message | Type::Group => self.error(
                        map.key_type.span,
                        "Key in map fields cannot be float/double, bytes or message types.",
                    ),
                    Type::Enum => self.error(map.key_type.span, "Key in map fields cannot be enum types."),
                    _ => {}
                }
                Some(ft.ty)
            }
            None => None,
        };
        let value_type = self.field_type(&map.value_type, &field_full);

        let entry_field = |name: &str, number: i32, ty: Option<Type>, type_name: Option<String>| {
            FieldDescriptorProto {
                name: Some(name.to_string()),
                number: Some(number),
                label: Some(Label::Optional as i32),
                r#type: ty.map(|t| t as i32),
                type_name,
                json_name: Some(name.to_string()),
                ..Default::default()
            }
        };
        let value_field = entry_field(
            "value",
            2,
            value_type.as_ref().map(|ft| ft.ty),
            value_type.as_ref().and_then(|ft| ft.type_name.clone()),
        );
        let entry = DescriptorProto {
            name: Some(entry_name),
            field: vec![entry_field("key", 1, key_type, None), value_field],
            options: Some(MessageOptions {
                map_entry: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.source.add(entry_path, map.decl.span);

        self.field_options(field_path, &mut fd, &field_full, &map.options, None, FieldSite::Message);
        (fd, entry)
    }

    fn group(
        &mut self,
        field_path: &[i32],
        type_path: &[i32],
        scope: &str,
        group: &Group,
        site: FieldSite,
    ) -> (FieldDescriptorProto, DescriptorProto) {
        let field_name = group_field_name(&group.name.value);
        let mut fd = self.field_shell(
            field_path,
            group.label.as_ref(),
            &field_name,
            group.name.span,
            &group.number,
            &group.decl,
            site,
        );
        fd.r#type = Some(Type::Group as i32);
        fd.type_name = Some(format!(".{}", qualify(scope, &group.name.value)));
        self.source.add_child(field_path, &[path::FIELD_TYPE], group.keyword_span);
        self.source.add_child(field_path, &[path::FIELD_TYPE_NAME], group.name.span);

        let group_type = FieldType {
            ty: Type::Group,
            type_name: fd.type_name.clone(),
            symbol: None,
        };
        let field_full = qualify(scope, &field_name);
        self.field_options(field_path, &mut fd, &field_full, &group.options, Some(&group_type), site);

        let nested = self.message(type_path, scope, &group.name, &group.body, &group.decl);
        (fd, nested)
    }

    // ------------------------------------------------------------------------
    // Extensions
    // ------------------------------------------------------------------------

    /// Append the fields of an `extend` block to `extensions`; group bodies go
    /// to `types`. `extension_base`/`type_base` are the source paths of those
    /// two lists.
    fn extend(
        &mut self,
        extension_base: &[i32],
        type_base: &[i32],
        scope: &str,
        extend: &Extend,
        extensions: &mut Vec<FieldDescriptorProto>,
        types: &mut Vec<DescriptorProto>,
    ) {
        self.source.add_decl(extension_base, &extend.decl);
        let extendee = self.resolve_message(&extend.extendee, &qualify(scope, "extend"));

        if let Some((full, _)) = &extendee {
            if self.proto3 && !is_options_message(full) {
                self.error(
                    extend.extendee.span,
                    "Extensions in proto3 are only allowed for defining options.",
                );
            }
        }

        for element in &extend.body {
            let ext_path = child(extension_base, &[extensions.len() as i32]);
            let (mut fd, number) = match element {
                ExtendElement::Field(field) => (self.field(&ext_path, scope, field, FieldSite::Extension), &field.number),
                ExtendElement::Group(group) => {
                    let type_path = child(type_base, &[types.len() as i32]);
                    let (fd, nested) = self.group(&ext_path, &type_path, scope, group, FieldSite::Extension);
                    types.push(nested);
                    (fd, &group.number)
                }
            };
            self.source.add_child(&ext_path, &[path::FIELD_EXTENDEE], extend.extendee.span);

            if let Some((full, symbol)) = &extendee {
                fd.extendee = Some(format!(".{full}"));
                if let SymbolInfo::Message { extension_ranges } = &symbol.info {
                    let declared = extension_ranges
                        .iter()
                        .any(|(start, end)| (*start..*end).contains(&number.value));
                    if !declared {
                        self.error(
                            number.span,
                            format!("\"{full}\" does not declare {} as an extension number.", number.value),
                        );
                    }
                }
            }
            extensions.push(fd);
        }
    }

    // ------------------------------------------------------------------------
    // Enums
    // ------------------------------------------------------------------------

    fn enumeration(&mut self, enum_path: &[i32], scope: &str, e: &Enum) -> EnumDescriptorProto {
        let full = qualify(scope, &e.name.value);
        self.source.add_decl(enum_path, &e.decl);
        self.source.add_child(enum_path, &[path::ENUM_NAME], e.name.span);

        let mut out = EnumDescriptorProto {
            name: Some(e.name.value.clone()),
            ..Default::default()
        };
        let mut option_decls: Vec<&OptionDecl> = Vec::new();
        let mut value_spans: Vec<Span> = Vec::new();

        for element in &e.body {
            match element {
                EnumElement::Value(value) => {
                    let value_path = child(enum_path, &[path::ENUM_VALUE, out.value.len() as i32]);
                    self.source.add_decl(&value_path, &value.decl);
                    self.source.add_child(&value_path, &[path::ENUM_VALUE_NAME], value.name.span);
                    self.source.add_child(&value_path, &[path::ENUM_VALUE_NUMBER], value.number.span);
                    let number = match i32::try_from(value.number.value) {
                        Ok(n) => n,
                        Err(_) => {
                            self.error(value.number.span, "Integer out of range.");
                            0
                        }
                    };
                    // Enum values are scoped as siblings of the enum.
                    let options = self.options::<EnumValueOptions>(
                        &child(&value_path, &[path::ENUM_VALUE_OPTIONS]),
                        &qualify(scope, &value.name.value),
                        &value.options,
                    );
                    out.value.push(EnumValueDescriptorProto {
                        name: Some(value.name.value.clone()),
                        number: Some(number),
                        options,
                    });
                    value_spans.push(value.name.span);
                }
                EnumElement::Reserved(reserved) => match &reserved.kind {
                    ReservedKind::Ranges(ranges) => {
                        self.source.add_decl(&child(enum_path, &[path::ENUM_RESERVED_RANGE]), &reserved.decl);
                        for range in ranges {
                            let p = child(enum_path, &[path::ENUM_RESERVED_RANGE, out.reserved_range.len() as i32]);
                            self.range_source(&p, range);
                            let start = range.start.value;
                            let end = match &range.end {
                                None => start,
                                Some(Spanned { value: None, .. }) => i32::MAX as i64,
                                Some(Spanned { value: Some(end), .. }) => *end,
                            };
                            if end < start {
                                self.error(range.span, "Reserved range end number must be greater than start number.");
                            }
                            out.reserved_range.push(EnumReservedRange {
                                start: Some(start.clamp(i32::MIN as i64, i32::MAX as i64) as i32),
                                end: Some(end.clamp(i32::MIN as i64, i32::MAX as i64) as i32),
                            });
                        }
                    }
                    ReservedKind::Names(names) => {
                        self.source.add_decl(&child(enum_path, &[path::ENUM_RESERVED_NAME]), &reserved.decl);
                        for name in names {
                            let p = child(enum_path, &[path::ENUM_RESERVED_NAME, out.reserved_name.len() as i32]);
                            self.source.add(&p, name.span);
                            out.reserved_name.push(name.value.clone());
                        }
                    }
                },
                EnumElement::Option(option) => option_decls.push(option),
            }
        }

        out.options = self.options::<EnumOptions>(&child(enum_path, &[path::ENUM_OPTIONS]), &full, option_decls);
        self.validate_enum(&full, &e.name, &out, &value_spans);
        out
    }

    fn validate_enum(&mut self, full: &str, name: &Ident, e: &EnumDescriptorProto, spans: &[Span]) {
        if e.value.is_empty() {
            self.error(name.span, "Enums must contain at least one value.");
            return;
        }
        if self.proto3 && e.value[0].number() != 0 {
            self.error(spans[0], "The first enum value must be zero in proto3.");
        }

        let allow_alias = e.options.as_ref().and_then(|o| o.allow_alias) == Some(true);
        let mut by_number: HashMap<i32, &str> = HashMap::new();
        let mut aliased = false;
        for (value, span) in e.value.iter().zip(spans) {
            if let Some(first) = by_number.get(&value.number()) {
                aliased = true;
                if !allow_alias {
                    self.error(
                        *span,
                        format!(
                            "\"{}\" uses the same enum value as \"{first}\". If this is intended, set 'option allow_alias = true;' to the enum definition.",
                            value.name()
                        ),
                    );
                }
            } else {
                by_number.insert(value.number(), value.name());
            }

            if e
                .reserved_range
                .iter()
                .any(|r| (r.start()..=r.end()).contains(&value.number()))
            {
                self.error(
                    *span,
                    format!("Enum value \"{}\" uses reserved number {}.", value.name(), value.number()),
                );
            }
            if e.reserved_name.iter().any(|n| n == value.name()) {
                self.error(*span, format!("Enum value \"{}\" is reserved.", value.name()));
            }
        }
        if allow_alias && !aliased {
            self.error(
                name.span,
                format!(
                    "\"{full}\" declares support for enum aliases but no enum values share field numbers. Please remove the unnecessary 'option allow_alias = true;' declaration."
                ),
            );
        }
    }

    // ------------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------------

    fn service(&mut self, service_path: &[i32], scope: &str, service: &Service) -> ServiceDescriptorProto {
        let full = qualify(scope, &service.name.value);
        self.source.add_decl(service_path, &service.decl);
        self.source.add_child(service_path, &[path::SERVICE_NAME], service.name.span);

        let mut out = ServiceDescriptorProto {
            name: Some(service.name.value.clone()),
            ..Default::default()
        };
        let mut option_decls: Vec<&OptionDecl> = Vec::new();
        for element in &service.body {
            match element {
                ServiceElement::Method(method) => {
                    let method_path = child(service_path, &[path::SERVICE_METHOD, out.method.len() as i32]);
                    let built = self.method(&method_path, &full, method);
                    out.method.push(built);
                }
                ServiceElement::Option(option) => option_decls.push(option),
            }
        }
        out.options = self.options::<ServiceOptions>(&child(service_path, &[path::SERVICE_OPTIONS]), &full, option_decls);
        out
    }

    fn method(&mut self, method_path: &[i32], service: &str, method: &Method) -> MethodDescriptorProto {
        let full = qualify(service, &method.name.value);
        self.source.add_decl(method_path, &method.decl);
        self.source.add_child(method_path, &[path::METHOD_NAME], method.name.span);
        if let Some(span) = method.input.stream {
            self.source.add_child(method_path, &[path::METHOD_CLIENT_STREAMING], span);
        }
        self.source.add_child(method_path, &[path::METHOD_INPUT], method.input.name.span);
        if let Some(span) = method.output.stream {
            self.source.add_child(method_path, &[path::METHOD_SERVER_STREAMING], span);
        }
        self.source.add_child(method_path, &[path::METHOD_OUTPUT], method.output.name.span);

        let input = self.resolve_message(&method.input.name, &full);
        let output = self.resolve_message(&method.output.name, &full);
        let options = self.options::<MethodOptions>(&child(method_path, &[path::METHOD_OPTIONS]), &full, &method.options);
        MethodDescriptorProto {
            name: Some(method.name.value.clone()),
            input_type: input.map(|(name, _)| format!(".{name}")),
            output_type: output.map(|(name, _)| format!(".{name}")),
            options,
            client_streaming: method.input.stream.map(|_| true),
            server_streaming: method.output.stream.map(|_| true),
        }
    }
}

fn is_options_message(full_name: &str) -> bool {
    matches!(
        full_name,
        "google.protobuf.FileOptions"
            | "google.protobuf.MessageOptions"
            | "google.protobuf.FieldOptions"
            | "google.protobuf.OneofOptions"
            | "google.protobuf.ExtensionRangeOptions"
            | "google.protobuf.EnumOptions"
            | "google.protobuf.EnumValueOptions"
            | "google.protobuf.ServiceOptions"
            | "google.protobuf.MethodOptions"
    )
}
