use std::fmt;

use serde::{Deserialize, Serialize};

/// Dynamically typed content of one register slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Execute,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    Float(f32),
    Double(f64),
    Name(String),
    String(String),
    Enum(u8),
    Struct(Vec<Value>),
    Object(Option<u64>),
    Array(Vec<Value>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Execute => "execute",
            Value::Bool(_) => "bool",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::UInt8(_) => "uint8",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Name(_) => "name",
            Value::String(_) => "string",
            Value::Enum(_) => "enum",
            Value::Struct(_) => "struct",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(value) => Some(*value),
            Value::UInt8(value) => Some(i32::from(*value)),
            _ => None,
        }
    }

    /// Any integer, widened.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(value) => Some(*value),
            Value::Int32(value) => Some(i64::from(*value)),
            Value::UInt8(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Any numeric value, widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(value) => Some(*value),
            Value::Float(value) => Some(f64::from(*value)),
            Value::Int32(value) => Some(f64::from(*value)),
            Value::Int64(value) => Some(*value as f64),
            Value::UInt8(value) => Some(f64::from(*value)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Name(value) | Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<u8> {
        match self {
            Value::Enum(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int32(_) | Value::Int64(_) | Value::UInt8(_) | Value::Float(_) | Value::Double(_)
        )
    }

    /// Byte form used for structural hashing. Tags keep `Int32(1)` and
    /// `Int64(1)` apart.
    pub fn encode_canonical(&self, out: &mut Vec<u8>) {
        match self {
            Value::Execute => out.push(0),
            Value::Bool(value) => {
                out.push(1);
                out.push(u8::from(*value));
            }
            Value::Int32(value) => {
                out.push(2);
                out.extend_from_slice(&value.to_le_bytes());
            }
            Value::Int64(value) => {
                out.push(3);
                out.extend_from_slice(&value.to_le_bytes());
            }
            Value::UInt8(value) => {
                out.push(4);
                out.push(*value);
            }
            Value::Float(value) => {
                out.push(5);
                out.extend_from_slice(&value.to_bits().to_le_bytes());
            }
            Value::Double(value) => {
                out.push(6);
                out.extend_from_slice(&value.to_bits().to_le_bytes());
            }
            Value::Name(value) | Value::String(value) => {
                out.push(if matches!(self, Value::Name(_)) { 7 } else { 8 });
                out.extend_from_slice(&(value.len() as u32).to_le_bytes());
                out.extend_from_slice(value.as_bytes());
            }
            Value::Enum(value) => {
                out.push(9);
                out.push(*value);
            }
            Value::Struct(fields) | Value::Array(fields) => {
                out.push(if matches!(self, Value::Struct(_)) { 10 } else { 11 });
                out.extend_from_slice(&(fields.len() as u32).to_le_bytes());
                for field in fields {
                    field.encode_canonical(out);
                }
            }
            Value::Object(handle) => {
                out.push(12);
                out.extend_from_slice(&handle.unwrap_or(0).to_le_bytes());
                out.push(u8::from(handle.is_some()));
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Execute => f.write_str("()"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int32(value) => write!(f, "{value}"),
            Value::Int64(value) => write!(f, "{value}"),
            Value::UInt8(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value:?}"),
            Value::Double(value) => write!(f, "{value:?}"),
            Value::Name(value) | Value::String(value) => write!(f, "{value:?}"),
            Value::Enum(value) => write!(f, "{value}"),
            Value::Struct(fields) => {
                f.write_str("{")?;
                for (index, field) in fields.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str("}")
            }
            Value::Object(None) => f.write_str("null"),
            Value::Object(Some(handle)) => write!(f, "object:{handle}"),
            Value::Array(values) => {
                f.write_str("[")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_accessors_widen() {
        assert_eq!(Value::UInt8(7).as_i64(), Some(7));
        assert_eq!(Value::Int32(-2).as_f64(), Some(-2.0));
        assert_eq!(Value::Bool(true).as_i64(), None);
    }

    #[test]
    fn canonical_encoding_tags_kinds() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        Value::Name("x".into()).encode_canonical(&mut a);
        Value::String("x".into()).encode_canonical(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn display_is_readable() {
        let value = Value::Array(vec![Value::Float(1.5), Value::Float(2.0)]);
        assert_eq!(value.to_string(), "[1.5, 2.0]");
        assert_eq!(Value::String("a b".into()).to_string(), "\"a b\"");
    }
}
