//! Reference resolution with protoc-compatible error text.

use prost_types::field_descriptor_proto::Type;

use protoimage_dsl::ast::{is_scalar_type, Name, Spanned};

use crate::symbols::{Lookup, Symbol, SymbolKind, SymbolTable};

use super::Linker;

/// A resolved field type.
pub(super) struct FieldType<'a> {
    pub ty: Type,
    /// Fully qualified with a leading dot; `None` for scalars.
    pub type_name: Option<String>,
    pub symbol: Option<&'a Symbol>,
}

pub(super) fn scalar_type(name: &str) -> Option<Type> {
    Some(match name {
        "double" => Type::Double,
        "float" => Type::Float,
        "int64" => Type::Int64,
        "uint64" => Type::Uint64,
        "int32" => Type::Int32,
        "fixed64" => Type::Fixed64,
        "fixed32" => Type::Fixed32,
        "bool" => Type::Bool,
        "string" => Type::String,
        "bytes" => Type::Bytes,
        "uint32" => Type::Uint32,
        "sfixed32" => Type::Sfixed32,
        "sfixed64" => Type::Sfixed64,
        "sint32" => Type::Sint32,
        "sint64" => Type::Sint64,
        _ => return None,
    })
}

impl<'a> Linker<'a> {
    pub(super) fn not_imported_message(&self, full_name: &str, defined_in: &str) -> String {
        format!(
            "\"{full_name}\" seems to be defined in \"{defined_in}\", which is not imported by \"{}\".  To use it here, please add the necessary import.",
            self.file.name
        )
    }

    /// Look `name` up from inside `relative_to`, reporting failures.
    pub(super) fn resolve(
        &mut self,
        name: &Spanned<Name>,
        relative_to: &str,
        types_only: bool,
    ) -> Option<(String, &'a Symbol)> {
        let table: &'a SymbolTable = self.ctx.table;
        match table.lookup(&name.value, relative_to, types_only, Some(&self.visible)) {
            Lookup::Found(full_name, symbol) => Some((full_name, symbol)),
            Lookup::NotImported { full_name, file } => {
                let defined_in = self.ctx.files[file].name.clone();
                let message = self.not_imported_message(&full_name, &defined_in);
                self.error(name.span, message);
                None
            }
            Lookup::NotFound { hint: Some(resolved) } => {
                self.error(
                    name.span,
                    format!(
                        "\"{written}\" is resolved to \"{resolved}\", which is not defined. The innermost scope is searched first in name resolution. Consider using a leading '.'(i.e., \".{written}\") to start from the outermost scope.",
                        written = name.value
                    ),
                );
                None
            }
            Lookup::NotFound { hint: None } => {
                self.error(name.span, format!("\"{}\" is not defined.", name.value));
                None
            }
        }
    }

    /// Resolve a reference that must name a message (rpc input/output,
    /// extendees). Returns the full name without a leading dot.
    pub(super) fn resolve_message(&mut self, name: &Spanned<Name>, relative_to: &str) -> Option<(String, &'a Symbol)> {
        let (full_name, symbol) = self.resolve(name, relative_to, true)?;
        if symbol.kind != SymbolKind::Message {
            self.error(name.span, format!("\"{}\" is not a message type.", name.value));
            return None;
        }
        Some((full_name, symbol))
    }

    /// Resolve a field's type: a scalar keyword, a message or an enum.
    pub(super) fn field_type(&mut self, ty: &Spanned<Name>, relative_to: &str) -> Option<FieldType<'a>> {
        if is_scalar_type(&ty.value) {
            return scalar_type(&ty.value).map(|ty| FieldType {
                ty,
                type_name: None,
                symbol: None,
            });
        }
        let (full_name, symbol) = self.resolve(ty, relative_to, true)?;
        let kind = match symbol.kind {
            SymbolKind::Message => Type::Message,
            SymbolKind::Enum => Type::Enum,
            _ => {
                self.error(ty.span, format!("\"{}\" is not a type.", ty.value));
                return None;
            }
        };
        Some(FieldType {
            ty: kind,
            type_name: Some(format!(".{full_name}")),
            symbol: Some(symbol),
        })
    }
}
