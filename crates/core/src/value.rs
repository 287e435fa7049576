//! Value types for redmap
//!
//! This module defines:
//! - Value: the typed value of one record column
//! - ScalarType: the scalar types the codec understands
//!
//! ## Type Rules
//!
//! - Integer widths are distinct variants: `I32(1) != I64(1)`
//! - `Bytes` are not `String`
//! - Float uses IEEE-754 equality: `NaN != NaN`, `-0.0 == 0.0`
//! - `Set` and `Map` compare order-insensitively; the store does not
//!   preserve their insertion order

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar types a column or collection element may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    /// Boolean
    Bool,
    /// 8-bit signed integer
    I8,
    /// 16-bit signed integer
    I16,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// UTF-8 string
    String,
}

impl ScalarType {
    /// Type name used in errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::I8 => "i8",
            ScalarType::I16 => "i16",
            ScalarType::I32 => "i32",
            ScalarType::I64 => "i64",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
            ScalarType::String => "string",
        }
    }

    /// Whether values of this type can be cast to a rank score
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ScalarType::Bool | ScalarType::String)
    }

    /// Value an absent non-nullable column decodes to
    pub fn zero_value(&self) -> Value {
        match self {
            ScalarType::Bool => Value::Bool(false),
            ScalarType::I8 => Value::I8(0),
            ScalarType::I16 => Value::I16(0),
            ScalarType::I32 => Value::I32(0),
            ScalarType::I64 => Value::I64(0),
            ScalarType::F32 => Value::F32(0.0),
            ScalarType::F64 => Value::F64(0.0),
            ScalarType::String => Value::String(String::new()),
        }
    }

    /// Whether `value` is an instance of this type
    pub fn admits(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ScalarType::Bool, Value::Bool(_))
                | (ScalarType::I8, Value::I8(_))
                | (ScalarType::I16, Value::I16(_))
                | (ScalarType::I32, Value::I32(_))
                | (ScalarType::I64, Value::I64(_))
                | (ScalarType::F32, Value::F32(_))
                | (ScalarType::F64, Value::F64(_))
                | (ScalarType::String, Value::String(_))
        )
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value of one record column
///
/// Scalars map one-to-one onto [`ScalarType`]. `Bytes` is the blob kind and
/// is stored raw. Collections may contain `Null` elements; the codec keeps
/// them distinguishable from absent data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Null / absent value
    Null,
    /// Boolean value
    Bool(bool),
    /// 8-bit signed integer
    I8(i8),
    /// 16-bit signed integer
    I16(i16),
    /// 32-bit signed integer
    I32(i32),
    /// 64-bit signed integer
    I64(i64),
    /// 32-bit floating point
    F32(f32),
    /// 64-bit floating point
    F64(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes (blob)
    Bytes(Vec<u8>),
    /// Ordered list of values
    List(Vec<Value>),
    /// Set of values (order not significant)
    Set(Vec<Value>),
    /// Key/value pairs (order not significant)
    Map(Vec<(Value, Value)>),
}

// Custom PartialEq: IEEE-754 floats, order-insensitive sets and maps
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I8(a), Value::I8(b)) => a == b,
            (Value::I16(a), Value::I16(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => {
                a.iter().all(|x| b.contains(x)) && b.iter().all(|x| a.contains(x))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.iter().any(|(bk, bv)| bk == k && bv == v))
            }
            _ => false,
        }
    }
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::I8(_) => "I8",
            Value::I16(_) => "I16",
            Value::I32(_) => "I32",
            Value::I64(_) => "I64",
            Value::F32(_) => "F32",
            Value::F64(_) => "F64",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::List(_) => "List",
            Value::Set(_) => "Set",
            Value::Map(_) => "Map",
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as bool if this is a Bool value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Widen any integer variant to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I8(v) => Some(*v as i64),
            Value::I16(v) => Some(*v as i64),
            Value::I32(v) => Some(*v as i64),
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Widen any numeric variant to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            other => other.as_i64().map(|i| i as f64),
        }
    }

    /// Get as &str if this is a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as &[u8] if this is a Bytes value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Elements of a List or Set value
    pub fn as_elements(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) | Value::Set(v) => Some(v),
            _ => None,
        }
    }

    /// Entries of a Map value
    pub fn as_entries(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

// ============================================================================
// From implementations for ergonomic API usage
// ============================================================================

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i8> for Value {
    fn from(i: i8) -> Self {
        Value::I8(i)
    }
}

impl From<i16> for Value {
    fn from(i: i16) -> Self {
        Value::I16(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::I32(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::I64(i)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::F32(f)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::F64(f)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_widths_are_distinct() {
        assert_ne!(Value::I32(1), Value::I64(1));
        assert_eq!(Value::I32(1), Value::I32(1));
    }

    #[test]
    fn test_float_ieee_semantics() {
        assert_ne!(Value::F64(f64::NAN), Value::F64(f64::NAN));
        assert_eq!(Value::F64(-0.0), Value::F64(0.0));
    }

    #[test]
    fn test_set_equality_ignores_order() {
        let a = Value::Set(vec![Value::from(1), Value::from(2), Value::Null]);
        let b = Value::Set(vec![Value::Null, Value::from(2), Value::from(1)]);
        assert_eq!(a, b);
        assert_ne!(a, Value::List(vec![Value::from(1), Value::from(2), Value::Null]));
    }

    #[test]
    fn test_map_equality_ignores_order() {
        let a = Value::Map(vec![
            (Value::from("a"), Value::from(1)),
            (Value::from("b"), Value::Null),
        ]);
        let b = Value::Map(vec![
            (Value::from("b"), Value::Null),
            (Value::from("a"), Value::from(1)),
        ]);
        assert_eq!(a, b);

        let c = Value::Map(vec![(Value::from("a"), Value::from(2))]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_list_equality_is_ordered() {
        let a = Value::List(vec![Value::from("x"), Value::from("y")]);
        let b = Value::List(vec![Value::from("y"), Value::from("x")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_numeric_widening() {
        assert_eq!(Value::I8(-3).as_i64(), Some(-3));
        assert_eq!(Value::I16(7).as_f64(), Some(7.0));
        assert_eq!(Value::F32(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::from("1").as_f64(), None);
    }

    #[test]
    fn test_scalar_type_admits() {
        assert!(ScalarType::I32.admits(&Value::I32(5)));
        assert!(!ScalarType::I32.admits(&Value::I64(5)));
        assert!(ScalarType::String.admits(&Value::from("x")));
        assert!(!ScalarType::Bool.admits(&Value::Null));
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(ScalarType::I64.zero_value(), Value::I64(0));
        assert_eq!(ScalarType::String.zero_value(), Value::from(""));
        assert_eq!(ScalarType::Bool.zero_value(), Value::Bool(false));
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::from("a"));
    }
}
