//! Option interpretation.
//!
//! Standard options (`java_package`, `deprecated`, `packed`, ...) are written
//! into the typed fields of the matching `*Options` message. Custom options
//! (`(acme.meta).owner = "x"`) must name an extension of that options message;
//! once the name resolves they are kept as `uninterpreted_option` entries.

use std::collections::HashSet;

use prost_types::uninterpreted_option::NamePart;
use prost_types::{
    EnumOptions, EnumValueOptions, ExtensionRangeOptions, FieldOptions, FileOptions,
    MessageOptions, MethodOptions, OneofOptions, ServiceOptions, UninterpretedOption,
};

use protoimage_dsl::ast::{OptionDecl, OptionValue};

use crate::symbols::{Lookup, SymbolInfo, SymbolKind};

use super::Linker;

/// A descriptor `*Options` message.
pub(crate) trait OptionsMessage: Default {
    const FULL_NAME: &'static str;

    /// Apply a standard option. `Ok(None)` means there is no such option;
    /// `Ok(Some(n))` is the field number that was set.
    fn set(&mut self, name: &str, value: &OptionValue) -> Result<Option<i32>, String>;

    fn uninterpreted_mut(&mut self) -> &mut Vec<UninterpretedOption>;
}

fn as_bool(name: &str, value: &OptionValue) -> Result<Option<bool>, String> {
    match value {
        OptionValue::Ident(v) if v == "true" => Ok(Some(true)),
        OptionValue::Ident(v) if v == "false" => Ok(Some(false)),
        _ => Err(format!("Value must be \"true\" or \"false\" for boolean option \"{name}\".")),
    }
}

fn as_string(name: &str, value: &OptionValue) -> Result<Option<String>, String> {
    match value {
        OptionValue::Str(bytes) => String::from_utf8(bytes.clone())
            .map(Some)
            .map_err(|_| format!("Value for string option \"{name}\" is not valid UTF-8.")),
        _ => Err(format!("Value must be quoted string for string option \"{name}\".")),
    }
}

fn as_enum(
    name: &str,
    value: &OptionValue,
    enum_name: &str,
    values: &[(&str, i32)],
) -> Result<Option<i32>, String> {
    let OptionValue::Ident(id) = value else {
        return Err(format!("Value must be identifier for enum-valued option \"{name}\"."));
    };
    values
        .iter()
        .find(|(n, _)| n == id)
        .map(|(_, number)| Some(*number))
        .ok_or_else(|| format!("Enum type \"{enum_name}\" has no value named \"{id}\" for option \"{name}\"."))
}

impl OptionsMessage for FileOptions {
    const FULL_NAME: &'static str = "google.protobuf.FileOptions";

    fn set(&mut self, name: &str, value: &OptionValue) -> Result<Option<i32>, String> {
        let number = match name {
            "java_package" => {
                self.java_package = as_string(name, value)?;
                1
            }
            "java_outer_classname" => {
                self.java_outer_classname = as_string(name, value)?;
                8
            }
            "optimize_for" => {
                self.optimize_for = as_enum(
                    name,
                    value,
                    "google.protobuf.FileOptions.OptimizeMode",
                    &[("SPEED", 1), ("CODE_SIZE", 2), ("LITE_RUNTIME", 3)],
                )?;
                9
            }
            "java_multiple_files" => {
                self.java_multiple_files = as_bool(name, value)?;
                10
            }
            "go_package" => {
                self.go_package = as_string(name, value)?;
                11
            }
            "cc_generic_services" => {
                self.cc_generic_services = as_bool(name, value)?;
                16
            }
            "java_generic_services" => {
                self.java_generic_services = as_bool(name, value)?;
                17
            }
            "py_generic_services" => {
                self.py_generic_services = as_bool(name, value)?;
                18
            }
            #[allow(deprecated)]
            "java_generate_equals_and_hash" => {
                self.java_generate_equals_and_hash = as_bool(name, value)?;
                20
            }
            "deprecated" => {
                self.deprecated = as_bool(name, value)?;
                23
            }
            "java_string_check_utf8" => {
                self.java_string_check_utf8 = as_bool(name, value)?;
                27
            }
            "cc_enable_arenas" => {
                self.cc_enable_arenas = as_bool(name, value)?;
                31
            }
            "objc_class_prefix" => {
                self.objc_class_prefix = as_string(name, value)?;
                36
            }
            "csharp_namespace" => {
                self.csharp_namespace = as_string(name, value)?;
                37
            }
            "swift_prefix" => {
                self.swift_prefix = as_string(name, value)?;
                39
            }
            "php_class_prefix" => {
                self.php_class_prefix = as_string(name, value)?;
                40
            }
            "php_namespace" => {
                self.php_namespace = as_string(name, value)?;
                41
            }
            "php_generic_services" => {
                self.php_generic_services = as_bool(name, value)?;
                42
            }
            "php_metadata_namespace" => {
                self.php_metadata_namespace = as_string(name, value)?;
                44
            }
            "ruby_package" => {
                self.ruby_package = as_string(name, value)?;
                45
            }
            _ => return Ok(None),
        };
        Ok(Some(number))
    }

    fn uninterpreted_mut(&mut self) -> &mut Vec<UninterpretedOption> {
        &mut self.uninterpreted_option
    }
}

impl OptionsMessage for MessageOptions {
    const FULL_NAME: &'static str = "google.protobuf.MessageOptions";

    fn set(&mut self, name: &str, value: &OptionValue) -> Result<Option<i32>, String> {
        let number = match name {
            "message_set_wire_format" => {
                self.message_set_wire_format = as_bool(name, value)?;
                1
            }
            "no_standard_descriptor_accessor" => {
                self.no_standard_descriptor_accessor = as_bool(name, value)?;
                2
            }
            "deprecated" => {
                self.deprecated = as_bool(name, value)?;
                3
            }
            "map_entry" => {
                self.map_entry = as_bool(name, value)?;
                7
            }
            _ => return Ok(None),
        };
        Ok(Some(number))
    }

    fn uninterpreted_mut(&mut self) -> &mut Vec<UninterpretedOption> {
        &mut self.uninterpreted_option
    }
}

impl OptionsMessage for FieldOptions {
    const FULL_NAME: &'static str = "google.protobuf.FieldOptions";

    fn set(&mut self, name: &str, value: &OptionValue) -> Result<Option<i32>, String> {
        let number = match name {
            "ctype" => {
                self.ctype = as_enum(
                    name,
                    value,
                    "google.protobuf.FieldOptions.CType",
                    &[("STRING", 0), ("CORD", 1), ("STRING_PIECE", 2)],
                )?;
                1
            }
            "packed" => {
                self.packed = as_bool(name, value)?;
                2
            }
            "deprecated" => {
                self.deprecated = as_bool(name, value)?;
                3
            }
            "lazy" => {
                self.lazy = as_bool(name, value)?;
                5
            }
            "jstype" => {
                self.jstype = as_enum(
                    name,
                    value,
                    "google.protobuf.FieldOptions.JSType",
                    &[("JS_NORMAL", 0), ("JS_STRING", 1), ("JS_NUMBER", 2)],
                )?;
                6
            }
            "weak" => {
                self.weak = as_bool(name, value)?;
                10
            }
            _ => return Ok(None),
        };
        Ok(Some(number))
    }

    fn uninterpreted_mut(&mut self) -> &mut Vec<UninterpretedOption> {
        &mut self.uninterpreted_option
    }
}

impl OptionsMessage for OneofOptions {
    const FULL_NAME: &'static str = "google.protobuf.OneofOptions";

    fn set(&mut self, _name: &str, _value: &OptionValue) -> Result<Option<i32>, String> {
        Ok(None)
    }

    fn uninterpreted_mut(&mut self) -> &mut Vec<UninterpretedOption> {
        &mut self.uninterpreted_option
    }
}

impl OptionsMessage for ExtensionRangeOptions {
    const FULL_NAME: &'static str = "google.protobuf.ExtensionRangeOptions";

    fn set(&mut self, _name: &str, _value: &OptionValue) -> Result<Option<i32>, String> {
        Ok(None)
    }

    fn uninterpreted_mut(&mut self) -> &mut Vec<UninterpretedOption> {
        &mut self.uninterpreted_option
    }
}

impl OptionsMessage for EnumOptions {
    const FULL_NAME: &'static str = "google.protobuf.EnumOptions";

    fn set(&mut self, name: &str, value: &OptionValue) -> Result<Option<i32>, String> {
        let number = match name {
            "allow_alias" => {
                self.allow_alias = as_bool(name, value)?;
                2
            }
            "deprecated" => {
                self.deprecated = as_bool(name, value)?;
                3
            }
            _ => return Ok(None),
        };
        Ok(Some(number))
    }

    fn uninterpreted_mut(&mut self) -> &mut Vec<UninterpretedOption> {
        &mut self.uninterpreted_option
    }
}

impl OptionsMessage for EnumValueOptions {
    const FULL_NAME: &'static str = "google.protobuf.EnumValueOptions";

    fn set(&mut self, name: &str, value: &OptionValue) -> Result<Option<i32>, String> {
        match name {
            "deprecated" => {
                self.deprecated = as_bool(name, value)?;
                Ok(Some(1))
            }
            _ => Ok(None),
        }
    }

    fn uninterpreted_mut(&mut self) -> &mut Vec<UninterpretedOption> {
        &mut self.uninterpreted_option
    }
}

impl OptionsMessage for ServiceOptions {
    const FULL_NAME: &'static str = "google.protobuf.ServiceOptions";

    fn set(&mut self, name: &str, value: &OptionValue) -> Result<Option<i32>, String> {
        match name {
            "deprecated" => {
                self.deprecated = as_bool(name, value)?;
                Ok(Some(33))
            }
            _ => Ok(None),
        }
    }

    fn uninterpreted_mut(&mut self) -> &mut Vec<UninterpretedOption> {
        &mut self.uninterpreted_option
    }
}

impl OptionsMessage for MethodOptions {
    const FULL_NAME: &'static str = "google.protobuf.MethodOptions";

    fn set(&mut self, name: &str, value: &OptionValue) -> Result<Option<i32>, String> {
        let number = match name {
            "deprecated" => {
                self.deprecated = as_bool(name, value)?;
                33
            }
            "idempotency_level" => {
                self.idempotency_level = as_enum(
                    name,
                    value,
                    "google.protobuf.MethodOptions.IdempotencyLevel",
                    &[("IDEMPOTENCY_UNKNOWN", 0), ("NO_SIDE_EFFECTS", 1), ("IDEMPOTENT", 2)],
                )?;
                34
            }
            _ => return Ok(None),
        };
        Ok(Some(number))
    }

    fn uninterpreted_mut(&mut self) -> &mut Vec<UninterpretedOption> {
        &mut self.uninterpreted_option
    }
}

fn uninterpreted(parts: Vec<NamePart>, value: &OptionValue) -> UninterpretedOption {
    let mut option = UninterpretedOption {
        name: parts,
        ..Default::default()
    };
    match value {
        OptionValue::Ident(id) => option.identifier_value = Some(id.clone()),
        OptionValue::Int {
            negative: false,
            magnitude,
        } => option.positive_int_value = Some(*magnitude),
        OptionValue::Int {
            negative: true,
            magnitude,
        } => {
            // -2^63 is the most negative value that fits.
            if *magnitude <= i64::MIN.unsigned_abs() {
                option.negative_int_value = Some((*magnitude as i128).wrapping_neg() as i64);
            } else {
                option.double_value = Some(-(*magnitude as f64));
            }
        }
        OptionValue::Float(v) => option.double_value = Some(*v),
        OptionValue::Str(bytes) => option.string_value = Some(bytes.clone()),
        OptionValue::Aggregate(text) => option.aggregate_value = Some(text.clone()),
    }
    option
}

impl<'a> Linker<'a> {
    /// Interpret `decls` declared on the element `scope` (a full name) and
    /// return the options message, or `None` when nothing was set. Source
    /// locations are recorded under `path`.
    ///
    /// Pseudo-options (`default`, `json_name`) must be filtered out by the
    /// caller.
    pub(super) fn options<'d, O: OptionsMessage>(
        &mut self,
        path: &[i32],
        scope: &str,
        decls: impl IntoIterator<Item = &'d OptionDecl>,
    ) -> Option<O> {
        let mut options = O::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut any = false;

        for decl in decls {
            any = true;
            let name_text = decl.name_text();
            let first = &decl.name[0];

            if !first.is_extension {
                if decl.name.len() > 1 {
                    self.error(
                        decl.name_span(),
                        format!("Option \"{}\" is not a message type.", first.name),
                    );
                    continue;
                }
                match options.set(&first.name, &decl.value.value) {
                    Ok(Some(number)) => {
                        if !seen.insert(name_text.clone()) {
                            self.error(decl.name_span(), format!("Option \"{name_text}\" was already set."));
                            continue;
                        }
                        self.source.add_decl(&super::child(path, &[number]), &decl.decl);
                    }
                    Ok(None) => self.error(decl.name_span(), format!("Option \"{name_text}\" unknown.")),
                    Err(message) => self.error(decl.value.span, message),
                }
                continue;
            }

            let Some((full_name, number)) = self.resolve_custom_option::<O>(scope, decl) else {
                continue;
            };
            if decl.name.len() == 1 && !seen.insert(full_name.clone()) {
                self.error(decl.name_span(), format!("Option \"{name_text}\" was already set."));
                continue;
            }
            let mut parts = vec![NamePart {
                name_part: full_name,
                is_extension: true,
            }];
            parts.extend(decl.name[1..].iter().map(|part| NamePart {
                name_part: part.name.clone(),
                is_extension: part.is_extension,
            }));
            options.uninterpreted_mut().push(uninterpreted(parts, &decl.value.value));
            self.source.add_decl(&super::child(path, &[number]), &decl.decl);
        }

        any.then_some(options)
    }

    /// Resolve the leading `(name)` of a custom option to an extension of
    /// `O`; returns its full name and field number.
    fn resolve_custom_option<O: OptionsMessage>(
        &mut self,
        scope: &str,
        decl: &OptionDecl,
    ) -> Option<(String, i32)> {
        let first = &decl.name[0];
        let name_text = decl.name_text();
        let table = self.ctx.table;
        let relative_to = super::qualify(scope, "option");
        let (full_name, symbol) = match table.lookup(&first.name, &relative_to, false, Some(&self.visible)) {
            Lookup::Found(full_name, symbol) => (full_name, symbol),
            Lookup::NotImported { full_name, file } => {
                let defined_in = self.ctx.files[file].name.clone();
                let message = self.not_imported_message(&full_name, &defined_in);
                self.error(first.span, message);
                return None;
            }
            Lookup::NotFound { .. } => {
                self.error(
                    first.span,
                    format!(
                        "Option \"{name_text}\" unknown. Ensure that your proto definition file imports the proto which defines the option."
                    ),
                );
                return None;
            }
        };
        let SymbolInfo::Extension {
            extendee,
            scope: extension_scope,
            number,
        } = &symbol.info
        else {
            let what = if symbol.kind == SymbolKind::Field { "a regular field" } else { "not an extension" };
            self.error(
                first.span,
                format!("Option \"({full_name})\" is {what}; custom options must be extensions."),
            );
            return None;
        };
        let extendee_full = match table.lookup(extendee, extension_scope, true, None) {
            Lookup::Found(name, _) => name,
            _ => return None,
        };
        if extendee_full != O::FULL_NAME {
            let short = O::FULL_NAME.rsplit('.').next().unwrap_or(O::FULL_NAME);
            self.error(
                first.span,
                format!("\"{full_name}\" is not a field or extension of message \"{short}\"."),
            );
            return None;
        }
        Some((full_name, *number as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_file_options_are_typed() {
        let mut options = FileOptions::default();
        assert_eq!(
            options.set("java_package", &OptionValue::Str(b"com.acme".to_vec())).unwrap(),
            Some(1)
        );
        assert_eq!(
            options.set("optimize_for", &OptionValue::Ident("CODE_SIZE".into())).unwrap(),
            Some(9)
        );
        assert_eq!(options.java_package.as_deref(), Some("com.acme"));
        assert_eq!(options.optimize_for, Some(2));
        assert_eq!(options.set("nope", &OptionValue::Ident("x".into())).unwrap(), None);
    }

    #[test]
    #[allow(deprecated)]
    fn deprecated_file_options_are_still_set() {
        let mut options = FileOptions::default();
        assert_eq!(
            options
                .set("java_generate_equals_and_hash", &OptionValue::Ident("true".into()))
                .unwrap(),
            Some(20)
        );
        assert_eq!(options.java_generate_equals_and_hash, Some(true));
    }

    #[test]
    fn value_kind_mismatches_are_reported() {
        let mut options = FileOptions::default();
        assert_eq!(
            options.set("java_multiple_files", &OptionValue::Str(b"yes".to_vec())).unwrap_err(),
            "Value must be \"true\" or \"false\" for boolean option \"java_multiple_files\"."
        );
        let mut field = FieldOptions::default();
        assert!(field
            .set("jstype", &OptionValue::Ident("JS_BIGINT".into()))
            .unwrap_err()
            .contains("has no value named \"JS_BIGINT\""));
    }

    #[test]
    fn uninterpreted_values_keep_their_kind() {
        let parts = vec![NamePart {
            name_part: "acme.owner".to_string(),
            is_extension: true,
        }];
        let option = uninterpreted(
            parts.clone(),
            &OptionValue::Int {
                negative: true,
                magnitude: 3,
            },
        );
        assert_eq!(option.negative_int_value, Some(-3));
        let option = uninterpreted(parts, &OptionValue::Aggregate("a : 1".into()));
        assert_eq!(option.aggregate_value.as_deref(), Some("a : 1"));
    }
}
