//! Cross-file symbol table.
//!
//! Built once, serially, from every successfully parsed file, then shared
//! read-only by the per-file linkers. Name lookup follows protoc's scoping
//! rules: the innermost enclosing scope is searched first, and a compound
//! name commits to the first scope whose leading component is an aggregate.

use std::collections::{HashMap, HashSet};

use protoimage_dsl::ast::*;
use protoimage_dsl::Span;

use crate::runner::ParsedFile;

/// Exclusive upper bound of extension ranges declared `to max`.
pub(crate) const EXTENSION_RANGE_END: i64 = 536_870_912;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SymbolKind {
    Package,
    Message,
    Enum,
    EnumValue,
    Service,
    Method,
    Field,
    Oneof,
    Extension,
}

impl SymbolKind {
    pub(crate) fn is_aggregate(self) -> bool {
        matches!(
            self,
            SymbolKind::Package | SymbolKind::Message | SymbolKind::Enum | SymbolKind::Service
        )
    }

    pub(crate) fn is_type(self) -> bool {
        matches!(self, SymbolKind::Message | SymbolKind::Enum)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum SymbolInfo {
    None,
    /// Every file that declares this package or a sub-package of it.
    Package { files: Vec<usize> },
    /// Extension ranges as `[start, end)`.
    Message { extension_ranges: Vec<(i64, i64)> },
    Enum { values: Vec<String> },
    /// `extendee` as written, resolved relative to `scope`.
    Extension {
        extendee: String,
        scope: String,
        number: i64,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Symbol {
    pub kind: SymbolKind,
    /// Defining file (index into the parsed file list).
    pub file: usize,
    pub info: SymbolInfo,
}

/// A symbol defined twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Conflict {
    pub file: usize,
    pub span: Span,
    pub message: String,
}

/// Outcome of a name lookup.
#[derive(Debug)]
pub(crate) enum Lookup<'t> {
    Found(String, &'t Symbol),
    /// Found, but in a file that the referencing file cannot see.
    NotImported { full_name: String, file: usize },
    /// `hint` is set when a compound name committed to a scope in which the
    /// rest of the name does not exist.
    NotFound { hint: Option<String> },
}

#[derive(Debug, Default)]
pub(crate) struct SymbolTable {
    symbols: HashMap<String, Symbol>,
}

pub(crate) fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}

/// `foo_bar` → `FooBarEntry`.
pub(crate) fn map_entry_name(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 5);
    let mut upper_next = true;
    for c in field.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out.push_str("Entry");
    out
}

/// `foo_bar_baz` → `fooBarBaz`.
pub(crate) fn json_name(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper_next = false;
    for c in field.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Field name of a group: the group's type name, lowercased.
pub(crate) fn group_field_name(group: &str) -> String {
    group.to_ascii_lowercase()
}

impl SymbolTable {
    pub(crate) fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Collect the symbols of `files`, visiting them in `order`.
    pub(crate) fn build(files: &[ParsedFile], order: &[usize]) -> (Self, Vec<Conflict>) {
        let mut collector = Collector {
            table: SymbolTable::default(),
            conflicts: Vec::new(),
            files,
            file: 0,
        };
        for &index in order {
            collector.file = index;
            collector.collect_file(&files[index].ast);
        }
        (collector.table, collector.conflicts)
    }

    /// Resolve `name` as written inside the element whose full name is
    /// `relative_to`.
    ///
    /// With `types_only`, a simple name that finds a non-type symbol keeps
    /// searching outer scopes. `visible` restricts lookups to the given
    /// files; `None` makes every file visible.
    pub(crate) fn lookup(
        &self,
        name: &str,
        relative_to: &str,
        types_only: bool,
        visible: Option<&HashSet<usize>>,
    ) -> Lookup<'_> {
        let mut undeclared: Option<(String, usize)> = None;

        if let Some(absolute) = name.strip_prefix('.') {
            return match self.find(absolute, visible, &mut undeclared) {
                Some(symbol) => Lookup::Found(absolute.to_string(), symbol),
                None => not_found(undeclared, None),
            };
        }

        let first = name.split('.').next().unwrap_or(name);
        let compound = first.len() < name.len();
        let mut scope = relative_to.to_string();
        loop {
            let Some(dot) = scope.rfind('.') else {
                return match self.find(name, visible, &mut undeclared) {
                    Some(symbol) => Lookup::Found(name.to_string(), symbol),
                    None => not_found(undeclared, None),
                };
            };
            scope.truncate(dot);
            if scope.is_empty() {
                continue;
            }

            let candidate = format!("{scope}.{first}");
            let Some(symbol) = self.find(&candidate, visible, &mut undeclared) else {
                continue;
            };
            if compound {
                if symbol.kind.is_aggregate() {
                    let full = format!("{scope}.{name}");
                    return match self.find(&full, visible, &mut undeclared) {
                        Some(symbol) => Lookup::Found(full, symbol),
                        None => not_found(undeclared, Some(full)),
                    };
                }
            } else if !types_only || symbol.kind.is_type() {
                return Lookup::Found(candidate, symbol);
            }
        }
    }

    fn find(
        &self,
        full_name: &str,
        visible: Option<&HashSet<usize>>,
        undeclared: &mut Option<(String, usize)>,
    ) -> Option<&Symbol> {
        let symbol = self.symbols.get(full_name)?;
        let Some(visible) = visible else {
            return Some(symbol);
        };
        let is_visible = match &symbol.info {
            SymbolInfo::Package { files } => files.iter().any(|f| visible.contains(f)),
            _ => visible.contains(&symbol.file),
        };
        if is_visible {
            return Some(symbol);
        }
        if symbol.kind != SymbolKind::Package && undeclared.is_none() {
            *undeclared = Some((full_name.to_string(), symbol.file));
        }
        None
    }
}

fn not_found<'t>(undeclared: Option<(String, usize)>, hint: Option<String>) -> Lookup<'t> {
    match undeclared {
        Some((full_name, file)) => Lookup::NotImported { full_name, file },
        None => Lookup::NotFound { hint },
    }
}

// ============================================================================
// Collection
// ============================================================================

struct Collector<'a> {
    table: SymbolTable,
    conflicts: Vec<Conflict>,
    files: &'a [ParsedFile],
    file: usize,
}

impl<'a> Collector<'a> {
    fn add(&mut self, scope: &str, name: &str, kind: SymbolKind, span: Span, info: SymbolInfo) {
        let full = qualify(scope, name);
        match self.table.symbols.get_mut(&full) {
            None => {
                self.table.symbols.insert(
                    full,
                    Symbol {
                        kind,
                        file: self.file,
                        info,
                    },
                );
            }
            Some(existing) if existing.kind == SymbolKind::Package && kind == SymbolKind::Package => {
                if let SymbolInfo::Package { files } = &mut existing.info {
                    if !files.contains(&self.file) {
                        files.push(self.file);
                    }
                }
            }
            Some(existing) => {
                let other = &self.files[existing.file].name;
                let mut message = if existing.kind == SymbolKind::Package || kind == SymbolKind::Package {
                    format!("\"{full}\" is already defined (as something other than a package) in file \"{other}\".")
                } else if existing.file == self.file {
                    if scope.is_empty() {
                        format!("\"{name}\" is already defined.")
                    } else {
                        format!("\"{name}\" is already defined in \"{scope}\".")
                    }
                } else {
                    format!("\"{full}\" is already defined in file \"{other}\".")
                };
                if kind == SymbolKind::EnumValue && existing.kind == SymbolKind::EnumValue {
                    let parent = if scope.is_empty() { "global scope" } else { scope };
                    message.push_str(&format!(
                        " Note that enum values use C++ scoping rules, meaning that enum values are siblings of their type, not children of it.  Therefore, \"{name}\" must be unique within {parent}, not just within the enum."
                    ));
                }
                self.conflicts.push(Conflict {
                    file: self.file,
                    span,
                    message,
                });
            }
        }
    }

    fn collect_file(&mut self, ast: &ProtoFile) {
        let mut scope = String::new();
        if let Some(package) = &ast.package {
            for component in package.name.value.split('.') {
                let parent = scope.clone();
                self.add(
                    &parent,
                    component,
                    SymbolKind::Package,
                    package.name.span,
                    SymbolInfo::Package {
                        files: vec![self.file],
                    },
                );
                scope = qualify(&parent, component);
            }
        }
        for message in &ast.messages {
            self.collect_message(&scope, &message.name, &message.body);
        }
        for e in &ast.enums {
            self.collect_enum(&scope, e);
        }
        for service in &ast.services {
            self.add(&scope, &service.name.value, SymbolKind::Service, service.name.span, SymbolInfo::None);
            let full = qualify(&scope, &service.name.value);
            for element in &service.body {
                if let ServiceElement::Method(method) = element {
                    self.add(&full, &method.name.value, SymbolKind::Method, method.name.span, SymbolInfo::None);
                }
            }
        }
        for extend in &ast.extends {
            self.collect_extend(&scope, extend);
        }
    }

    fn collect_message(&mut self, scope: &str, name: &Ident, body: &[MessageElement]) {
        let extension_ranges = body
            .iter()
            .filter_map(|e| match e {
                MessageElement::Extensions(r) => Some(r.ranges.iter().map(range_bounds)),
                _ => None,
            })
            .flatten()
            .collect();
        self.add(
            scope,
            &name.value,
            SymbolKind::Message,
            name.span,
            SymbolInfo::Message { extension_ranges },
        );
        let full = qualify(scope, &name.value);

        for element in body {
            match element {
                MessageElement::Field(field) => {
                    self.add(&full, &field.name.value, SymbolKind::Field, field.name.span, SymbolInfo::None);
                }
                MessageElement::Map(map) => {
                    self.add(&full, &map.name.value, SymbolKind::Field, map.name.span, SymbolInfo::None);
                    self.add(
                        &full,
                        &map_entry_name(&map.name.value),
                        SymbolKind::Message,
                        map.name.span,
                        SymbolInfo::Message {
                            extension_ranges: Vec::new(),
                        },
                    );
                }
                MessageElement::Group(group) => self.collect_group(&full, group, SymbolKind::Field, None),
                MessageElement::Oneof(oneof) => {
                    self.add(&full, &oneof.name.value, SymbolKind::Oneof, oneof.name.span, SymbolInfo::None);
                    for element in &oneof.body {
                        match element {
                            OneofElement::Field(field) => self.add(
                                &full,
                                &field.name.value,
                                SymbolKind::Field,
                                field.name.span,
                                SymbolInfo::None,
                            ),
                            OneofElement::Group(group) => {
                                self.collect_group(&full, group, SymbolKind::Field, None)
                            }
                            OneofElement::Option(_) => {}
                        }
                    }
                }
                MessageElement::Message(nested) => self.collect_message(&full, &nested.name, &nested.body),
                MessageElement::Enum(e) => self.collect_enum(&full, e),
                MessageElement::Extend(extend) => self.collect_extend(&full, extend),
                MessageElement::Extensions(_) | MessageElement::Reserved(_) | MessageElement::Option(_) => {}
            }
        }
    }

    fn collect_group(&mut self, scope: &str, group: &Group, kind: SymbolKind, extendee: Option<&str>) {
        let field_name = group_field_name(&group.name.value);
        let info = match extendee {
            Some(extendee) => SymbolInfo::Extension {
                extendee: extendee.to_string(),
                scope: qualify(scope, &field_name),
                number: group.number.value,
            },
            None => SymbolInfo::None,
        };
        self.add(scope, &field_name, kind, group.name.span, info);
        self.collect_message(scope, &group.name, &group.body);
    }

    fn collect_enum(&mut self, scope: &str, e: &Enum) {
        let values: Vec<String> = e
            .body
            .iter()
            .filter_map(|el| match el {
                EnumElement::Value(v) => Some(v.name.value.clone()),
                _ => None,
            })
            .collect();
        self.add(scope, &e.name.value, SymbolKind::Enum, e.name.span, SymbolInfo::Enum { values });
        for element in &e.body {
            if let EnumElement::Value(value) = element {
                // Enum values are siblings of their enum, not children.
                self.add(scope, &value.name.value, SymbolKind::EnumValue, value.name.span, SymbolInfo::None);
            }
        }
    }

    fn collect_extend(&mut self, scope: &str, extend: &Extend) {
        for element in &extend.body {
            match element {
                ExtendElement::Field(field) => self.add(
                    scope,
                    &field.name.value,
                    SymbolKind::Extension,
                    field.name.span,
                    SymbolInfo::Extension {
                        extendee: extend.extendee.value.clone(),
                        scope: qualify(scope, &field.name.value),
                        number: field.number.value,
                    },
                ),
                ExtendElement::Group(group) => {
                    self.collect_group(scope, group, SymbolKind::Extension, Some(&extend.extendee.value))
                }
            }
        }
    }
}

/// `[start, end)` of a range written as `a`, `a to b` or `a to max`.
pub(crate) fn range_bounds(range: &Range) -> (i64, i64) {
    let start = range.start.value;
    let end = match &range.end {
        None => start + 1,
        Some(Spanned { value: None, .. }) => EXTENSION_RANGE_END,
        Some(Spanned {
            value: Some(end), ..
        }) => end + 1,
    };
    (start, end)
}
