//! Protocol Buffers schema language (proto2 / proto3)
//!
//! This crate turns `.proto` source text into a typed AST that keeps every
//! declaration's span and attached comments. It does not resolve names or
//! validate numbering; that happens when descriptors are assembled.
//!
//! ```text
//!   source ──tokenize──▶ tokens (+ comments) ──parse_proto──▶ ProtoFile
//! ```

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::{ProtoFile, Span, Syntax};
pub use parser::{parse_proto, ParseError};
