//! Field default values, rendered the way descriptor consumers expect them in
//! `FieldDescriptorProto.default_value`.

use prost_types::field_descriptor_proto::Type;

use protoimage_dsl::ast::OptionValue;

/// Render `value` as the default of a field of type `ty`. `enum_values`
/// lists the value names of the field's enum type, if it has one.
pub(crate) fn default_value(
    ty: Type,
    value: &OptionValue,
    enum_values: Option<&[String]>,
) -> Result<String, String> {
    match ty {
        Type::Int32 | Type::Sint32 | Type::Sfixed32 => signed(value, i32::MIN as i64, i32::MAX as i64),
        Type::Int64 | Type::Sint64 | Type::Sfixed64 => signed(value, i64::MIN, i64::MAX),
        Type::Uint32 | Type::Fixed32 => unsigned(value, u32::MAX as u64),
        Type::Uint64 | Type::Fixed64 => unsigned(value, u64::MAX),
        Type::Float | Type::Double => match value {
            OptionValue::Int {
                negative,
                magnitude,
            } => {
                let v = *magnitude as f64;
                Ok(simple_dtoa(if *negative { -v } else { v }))
            }
            OptionValue::Float(v) => Ok(simple_dtoa(*v)),
            OptionValue::Ident(id) if id == "inf" => Ok("inf".to_string()),
            OptionValue::Ident(id) if id == "nan" => Ok("nan".to_string()),
            _ => Err("Expected number.".to_string()),
        },
        Type::Bool => match value {
            OptionValue::Ident(id) if id == "true" || id == "false" => Ok(id.clone()),
            _ => Err("Expected \"true\" or \"false\".".to_string()),
        },
        Type::String => match value {
            OptionValue::Str(bytes) => String::from_utf8(bytes.clone())
                .map_err(|_| "String default value is not valid UTF-8.".to_string()),
            _ => Err("Expected string.".to_string()),
        },
        Type::Bytes => match value {
            OptionValue::Str(bytes) => Ok(c_escape(bytes)),
            _ => Err("Expected string.".to_string()),
        },
        Type::Enum => match value {
            OptionValue::Ident(id) => {
                if enum_values.map_or(true, |values| values.iter().any(|v| v == id)) {
                    Ok(id.clone())
                } else {
                    Err(format!("Enum type has no value named \"{id}\"."))
                }
            }
            _ => Err("Default value for an enum field must be an identifier.".to_string()),
        },
        Type::Message | Type::Group => Err("Messages can't have default values.".to_string()),
    }
}

fn signed(value: &OptionValue, min: i64, max: i64) -> Result<String, String> {
    let OptionValue::Int {
        negative,
        magnitude,
    } = value
    else {
        return Err("Expected integer.".to_string());
    };
    let v = if *negative {
        if *magnitude > min.unsigned_abs() {
            return Err("Integer out of range.".to_string());
        }
        (*magnitude as i128).wrapping_neg() as i64
    } else {
        if *magnitude > max as u64 {
            return Err("Integer out of range.".to_string());
        }
        *magnitude as i64
    };
    Ok(v.to_string())
}

fn unsigned(value: &OptionValue, max: u64) -> Result<String, String> {
    match value {
        OptionValue::Int { negative: true, .. } => {
            Err("Unsigned field can't have negative default value.".to_string())
        }
        OptionValue::Int {
            magnitude,
            negative: false,
        } => {
            if *magnitude > max {
                Err("Integer out of range.".to_string())
            } else {
                Ok(magnitude.to_string())
            }
        }
        _ => Err("Expected integer.".to_string()),
    }
}

/// Shortest of `%.15g` / `%.17g` that reads back as the same double.
pub(crate) fn simple_dtoa(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let short = format_g(value, 15);
    if short.parse::<f64>().ok() == Some(value) {
        short
    } else {
        format_g(value, 17)
    }
}

/// C `printf("%.{precision}g")`.
pub(crate) fn format_g(value: f64, precision: usize) -> String {
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let precision = precision.max(1);
    let sci = format!("{:.*e}", precision - 1, value);
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= precision as i32 {
        let mantissa = trim_fraction(mantissa);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

/// Escape bytes the way protoc writes `bytes` defaults.
pub(crate) fn c_escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'"' => out.push_str("\\\""),
            b'\'' => out.push_str("\\'"),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{b:03o}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(negative: bool, magnitude: u64) -> OptionValue {
        OptionValue::Int {
            negative,
            magnitude,
        }
    }

    #[test]
    fn format_g_matches_printf() {
        assert_eq!(format_g(1.5, 15), "1.5");
        assert_eq!(format_g(100.0, 15), "100");
        assert_eq!(format_g(1e20, 15), "1e+20");
        assert_eq!(format_g(1.25e-7, 15), "1.25e-07");
        assert_eq!(format_g(0.0001, 15), "0.0001");
        assert_eq!(format_g(-2.5, 6), "-2.5");
        assert_eq!(format_g(123456789.0, 6), "1.23457e+08");
    }

    #[test]
    fn simple_dtoa_round_trips() {
        assert_eq!(simple_dtoa(0.1), "0.1");
        assert_eq!(simple_dtoa(f64::INFINITY), "inf");
        assert_eq!(simple_dtoa(f64::NEG_INFINITY), "-inf");
        let third = 1.0 / 3.0;
        assert_eq!(simple_dtoa(third).parse::<f64>().unwrap(), third);
    }

    #[test]
    fn integer_defaults_are_range_checked() {
        assert_eq!(default_value(Type::Int32, &int(true, 5), None).unwrap(), "-5");
        assert_eq!(
            default_value(Type::Int32, &int(true, 2_147_483_648), None).unwrap(),
            "-2147483648"
        );
        assert!(default_value(Type::Int32, &int(false, 2_147_483_648), None).is_err());
        assert_eq!(
            default_value(Type::Int64, &int(true, 9_223_372_036_854_775_808), None).unwrap(),
            "-9223372036854775808"
        );
        assert_eq!(
            default_value(Type::Uint32, &int(true, 1), None).unwrap_err(),
            "Unsigned field can't have negative default value."
        );
        assert_eq!(default_value(Type::Uint64, &int(false, u64::MAX), None).unwrap(), u64::MAX.to_string());
    }

    #[test]
    fn float_defaults_use_shortest_form() {
        assert_eq!(default_value(Type::Double, &int(false, 10), None).unwrap(), "10");
        assert_eq!(default_value(Type::Float, &OptionValue::Float(-0.25), None).unwrap(), "-0.25");
        assert_eq!(default_value(Type::Double, &OptionValue::Ident("inf".into()), None).unwrap(), "inf");
        assert_eq!(
            default_value(Type::Double, &OptionValue::Float(f64::NEG_INFINITY), None).unwrap(),
            "-inf"
        );
    }

    #[test]
    fn string_bytes_bool_and_enum_defaults() {
        assert_eq!(
            default_value(Type::String, &OptionValue::Str(b"a\"b".to_vec()), None).unwrap(),
            "a\"b"
        );
        assert_eq!(
            default_value(Type::Bytes, &OptionValue::Str(vec![b'a', 0, b'\n', 0xff]), None).unwrap(),
            "a\\000\\n\\377"
        );
        assert_eq!(default_value(Type::Bool, &OptionValue::Ident("true".into()), None).unwrap(), "true");
        assert!(default_value(Type::Bool, &int(false, 1), None).is_err());
        let values = vec!["RED".to_string(), "BLUE".to_string()];
        assert_eq!(
            default_value(Type::Enum, &OptionValue::Ident("BLUE".into()), Some(&values)).unwrap(),
            "BLUE"
        );
        assert!(default_value(Type::Enum, &OptionValue::Ident("GREEN".into()), Some(&values)).is_err());
        assert!(default_value(Type::Message, &int(false, 1), None).is_err());
    }
}
