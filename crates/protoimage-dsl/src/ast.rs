//! Typed AST for `.proto` files.
//!
//! The AST keeps declaration order (descriptors are order-sensitive) and a
//! [`Span`] plus attached [`Comments`] for everything that can show up in
//! source info.

use serde::{Deserialize, Serialize};

pub type Name = String;

// ============================================================================
// Positions
// ============================================================================

/// A source range. Lines and columns are zero-based; the end is exclusive.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Span {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Span {
    pub fn new(start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        Self {
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        Span {
            start_line: self.start_line,
            start_col: self.start_col,
            end_line: other.end_line,
            end_col: other.end_col,
        }
    }

    /// Descriptor source-info encoding: three elements when the span is on a
    /// single line, four otherwise.
    pub fn to_source_info(self) -> Vec<i32> {
        if self.start_line == self.end_line {
            vec![
                self.start_line as i32,
                self.start_col as i32,
                self.end_col as i32,
            ]
        } else {
            vec![
                self.start_line as i32,
                self.start_col as i32,
                self.end_line as i32,
                self.end_col as i32,
            ]
        }
    }
}

/// Comments attached to a declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comments {
    pub leading: Option<String>,
    pub trailing: Option<String>,
    pub detached: Vec<String>,
}

impl Comments {
    pub fn is_empty(&self) -> bool {
        self.leading.is_none() && self.trailing.is_none() && self.detached.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Spanned<T> {
    pub value: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(value: T, span: Span) -> Self {
        Self { value, span }
    }
}

pub type Ident = Spanned<Name>;

// ============================================================================
// File
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Syntax {
    Proto2,
    Proto3,
}

impl Syntax {
    pub fn as_str(self) -> &'static str {
        match self {
            Syntax::Proto2 => "proto2",
            Syntax::Proto3 => "proto3",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtoFile {
    pub syntax: Syntax,
    /// `None` when the file has no `syntax` statement (proto2 is implied).
    pub syntax_decl: Option<Declaration>,
    pub package: Option<Package>,
    pub imports: Vec<Import>,
    pub options: Vec<OptionDecl>,
    pub messages: Vec<Message>,
    pub enums: Vec<Enum>,
    pub services: Vec<Service>,
    pub extends: Vec<Extend>,
    /// Covers the whole file.
    pub span: Span,
}

/// Span + comments of a simple statement.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Declaration {
    pub span: Span,
    pub comments: Comments,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Package {
    pub name: Ident,
    pub decl: Declaration,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Default,
    Public,
    Weak,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Import {
    pub path: Spanned<String>,
    pub kind: ImportKind,
    pub decl: Declaration,
}

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptionNamePart {
    pub name: Name,
    /// `true` for parenthesised extension names: `(foo.bar)`.
    pub is_extension: bool,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum OptionValue {
    /// Bare identifier: `true`, `false`, enum value names, `inf`, `nan`.
    Ident(Name),
    /// Integer literal with an optional leading minus sign.
    Int { negative: bool, magnitude: u64 },
    Float(f64),
    Str(Vec<u8>),
    /// `{ ... }` text-format message literal, kept verbatim.
    Aggregate(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionDecl {
    pub name: Vec<OptionNamePart>,
    pub value: Spanned<OptionValue>,
    pub decl: Declaration,
}

impl OptionDecl {
    /// The option name as written, e.g. `(google.api.http).get`.
    pub fn name_text(&self) -> String {
        self.name
            .iter()
            .map(|part| {
                if part.is_extension {
                    format!("({})", part.name)
                } else {
                    part.name.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Simple (non-extension, single-part) option name, if this is one.
    pub fn simple_name(&self) -> Option<&str> {
        match self.name.as_slice() {
            [part] if !part.is_extension => Some(part.name.as_str()),
            _ => None,
        }
    }

    pub fn name_span(&self) -> Span {
        let first = self.name.first().map(|p| p.span).unwrap_or_default();
        let last = self.name.last().map(|p| p.span).unwrap_or_default();
        first.to(last)
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LabelKind {
    Optional,
    Required,
    Repeated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub name: Ident,
    pub body: Vec<MessageElement>,
    pub decl: Declaration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MessageElement {
    Field(Field),
    Map(MapField),
    Group(Group),
    Oneof(Oneof),
    Message(Message),
    Enum(Enum),
    Extend(Extend),
    Extensions(ExtensionRanges),
    Reserved(Reserved),
    Option(OptionDecl),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Field {
    pub label: Option<Spanned<LabelKind>>,
    /// Type name as written; scalar keywords (`int32`, `string`, ...) or a
    /// possibly dotted message/enum reference (leading `.` = fully qualified).
    pub ty: Spanned<Name>,
    pub name: Ident,
    pub number: Spanned<i64>,
    pub options: Vec<OptionDecl>,
    pub decl: Declaration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MapField {
    pub key_type: Spanned<Name>,
    pub value_type: Spanned<Name>,
    /// Span of the whole `map<K, V>` type.
    pub type_span: Span,
    pub name: Ident,
    pub number: Spanned<i64>,
    pub options: Vec<OptionDecl>,
    pub decl: Declaration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub label: Option<Spanned<LabelKind>>,
    /// Span of the `group` keyword.
    pub keyword_span: Span,
    pub name: Ident,
    pub number: Spanned<i64>,
    pub options: Vec<OptionDecl>,
    pub body: Vec<MessageElement>,
    pub decl: Declaration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Oneof {
    pub name: Ident,
    pub body: Vec<OneofElement>,
    pub decl: Declaration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum OneofElement {
    Field(Field),
    Group(Group),
    Option(OptionDecl),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Range {
    pub start: Spanned<i64>,
    /// `None` for a single number, `Some(None)` for `to max`.
    pub end: Option<Spanned<Option<i64>>>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtensionRanges {
    pub ranges: Vec<Range>,
    pub options: Vec<OptionDecl>,
    pub decl: Declaration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReservedKind {
    Ranges(Vec<Range>),
    Names(Vec<Spanned<Name>>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reserved {
    pub kind: ReservedKind,
    pub decl: Declaration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Extend {
    pub extendee: Spanned<Name>,
    pub body: Vec<ExtendElement>,
    pub decl: Declaration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ExtendElement {
    Field(Field),
    Group(Group),
}

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Enum {
    pub name: Ident,
    pub body: Vec<EnumElement>,
    pub decl: Declaration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EnumElement {
    Value(EnumValue),
    Option(OptionDecl),
    Reserved(Reserved),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnumValue {
    pub name: Ident,
    pub number: Spanned<i64>,
    pub options: Vec<OptionDecl>,
    pub decl: Declaration,
}

// ============================================================================
// Services
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub name: Ident,
    pub body: Vec<ServiceElement>,
    pub decl: Declaration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ServiceElement {
    Method(Method),
    Option(OptionDecl),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MethodType {
    /// Span of the `stream` keyword when present.
    pub stream: Option<Span>,
    pub name: Spanned<Name>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Method {
    pub name: Ident,
    pub input: MethodType,
    pub output: MethodType,
    pub options: Vec<OptionDecl>,
    pub decl: Declaration,
}

// ============================================================================
// Scalars
// ============================================================================

/// Scalar field type keywords.
pub const SCALAR_TYPES: &[&str] = &[
    "double", "float", "int64", "uint64", "int32", "fixed64", "fixed32", "bool", "string", "bytes",
    "uint32", "sfixed32", "sfixed64", "sint32", "sint64",
];

pub fn is_scalar_type(name: &str) -> bool {
    SCALAR_TYPES.contains(&name)
}
