use crate::memory::Value;
use crate::registry::{TypeIndex, TypeKind, TypeRegistry};

/// Parses a register default written in assembly, e.g. `3`, `2.5`,
/// `"left"`, `Walk` or `[1, 2, 3]`.
pub fn parse_value(text: &str, type_index: TypeIndex, registry: &TypeRegistry) -> Result<Value, String> {
    let (value, rest) = parse_at(text.trim(), type_index, registry)?;
    if !rest.trim().is_empty() {
        return Err(format!("unexpected '{}' after value", rest.trim()));
    }
    Ok(value)
}

fn parse_at<'s>(text: &'s str, type_index: TypeIndex, registry: &TypeRegistry) -> Result<(Value, &'s str), String> {
    let record = registry
        .get_type(type_index)
        .ok_or_else(|| format!("unknown type {type_index}"))?;
    let text = text.trim_start();

    if let TypeKind::Array(_) = record.kind() {
        let element = record.base_type_index();
        let mut rest = text
            .strip_prefix('[')
            .ok_or_else(|| format!("expected '[' for {}", record.name()))?
            .trim_start();
        let mut values = Vec::new();
        if let Some(after) = rest.strip_prefix(']') {
            return Ok((Value::Array(values), after));
        }
        loop {
            let (value, after) = parse_at(rest, element, registry)?;
            values.push(value);
            let after = after.trim_start();
            if let Some(after) = after.strip_prefix(',') {
                rest = after;
            } else if let Some(after) = after.strip_prefix(']') {
                return Ok((Value::Array(values), after));
            } else {
                return Err("expected ',' or ']' in array literal".to_string());
            }
        }
    }

    let (token, rest) = if text.starts_with('"') {
        let end = closing_quote(text).ok_or("unterminated string literal")?;
        (&text[..=end], &text[end + 1..])
    } else {
        let end = text.find([',', ']']).unwrap_or(text.len());
        (text[..end].trim_end(), &text[end..])
    };
    let invalid = || format!("'{token}' is not a valid {}", record.name());
    let value = match record.kind() {
        TypeKind::Bool => match token {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(invalid()),
        },
        TypeKind::Int32 => Value::Int32(token.parse().map_err(|_| invalid())?),
        TypeKind::Int64 => Value::Int64(token.parse().map_err(|_| invalid())?),
        TypeKind::UInt8 => Value::UInt8(token.parse().map_err(|_| invalid())?),
        TypeKind::Float => Value::Float(token.parse().map_err(|_| invalid())?),
        TypeKind::Double => Value::Double(token.parse().map_err(|_| invalid())?),
        TypeKind::Name => Value::Name(unquote(token)?),
        TypeKind::String => Value::String(unquote(token)?),
        TypeKind::Enum { variants } => {
            let ordinal = match token.parse::<usize>() {
                Ok(ordinal) => ordinal,
                Err(_) => variants
                    .iter()
                    .position(|variant| variant == token)
                    .ok_or_else(invalid)?,
            };
            if ordinal >= variants.len() {
                return Err(invalid());
            }
            Value::Enum(ordinal as u8)
        }
        _ => return Err(format!("values of type {} cannot be written as literals", record.name())),
    };
    Ok((value, rest))
}

fn closing_quote(text: &str) -> Option<usize> {
    let mut escaped = false;
    for (index, ch) in text.char_indices().skip(1) {
        match ch {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return Some(index),
            _ => escaped = false,
        }
    }
    None
}

/// Decodes a double-quoted literal.
pub fn unquote(token: &str) -> Result<String, String> {
    let inner = token
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .ok_or_else(|| format!("expected a quoted string, found {token}"))?;
    let mut result = String::new();
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => result.push('\\'),
            Some('"') => result.push('"'),
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some(other) => return Err(format!("unsupported escape \\{other}")),
            None => return Err("unterminated escape sequence".to_string()),
        }
    }
    Ok(result)
}

pub fn quote(value: &str) -> String {
    let mut result = String::with_capacity(value.len() + 2);
    result.push('"');
    for ch in value.chars() {
        match ch {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            other => result.push(other),
        }
    }
    result.push('"');
    result
}

/// Inverse of [`parse_value`]; `None` for values with no literal form.
pub fn format_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::Bool(value) => value.to_string(),
        Value::Int32(value) => value.to_string(),
        Value::Int64(value) => value.to_string(),
        Value::UInt8(value) => value.to_string(),
        Value::Float(value) => format!("{value:?}"),
        Value::Double(value) => format!("{value:?}"),
        Value::Name(value) | Value::String(value) => quote(value),
        Value::Enum(ordinal) => ordinal.to_string(),
        Value::Array(values) => {
            let items = values.iter().map(format_value).collect::<Option<Vec<_>>>()?;
            format!("[{}]", items.join(", "))
        }
        Value::Execute | Value::Struct(_) | Value::Object(_) => return None,
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeDescriptor;

    #[test]
    fn nested_arrays_parse() {
        let registry = TypeRegistry::new();
        let matrix = registry.get_array_type_of(TypeIndex::INT32_ARRAY);
        let value = parse_value("[[1, 2], [], [3]]", matrix, &registry).unwrap();
        assert_eq!(
            value,
            Value::Array(vec![
                Value::Array(vec![Value::Int32(1), Value::Int32(2)]),
                Value::Array(vec![]),
                Value::Array(vec![Value::Int32(3)]),
            ])
        );
    }

    #[test]
    fn strings_keep_commas_and_escapes() {
        let registry = TypeRegistry::new();
        let value = parse_value(r#"["a, b", "say \"hi\""]"#, TypeIndex::NAME_ARRAY, &registry).unwrap();
        assert_eq!(
            value,
            Value::Array(vec![Value::Name("a, b".into()), Value::Name("say \"hi\"".into())])
        );
        assert_eq!(format_value(&value).unwrap(), r#"["a, b", "say \"hi\""]"#);
    }

    #[test]
    fn enums_accept_names_and_ordinals() {
        let registry = TypeRegistry::new();
        let gait = registry.find_or_add_type(&TypeDescriptor::enumeration("Gait", ["Walk", "Run"]));
        assert_eq!(parse_value("Run", gait, &registry), Ok(Value::Enum(1)));
        assert_eq!(parse_value("0", gait, &registry), Ok(Value::Enum(0)));
        assert!(parse_value("2", gait, &registry).is_err());
    }

    #[test]
    fn floats_format_back_to_the_same_value() {
        let registry = TypeRegistry::new();
        for value in [Value::Float(0.1), Value::Double(2.0), Value::Float(-3.25)] {
            let kind = if matches!(value, Value::Float(_)) { TypeIndex::FLOAT } else { TypeIndex::DOUBLE };
            let text = format_value(&value).unwrap();
            assert_eq!(parse_value(&text, kind, &registry), Ok(value));
        }
    }
}
