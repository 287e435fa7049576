//! Value codec
//!
//! Converts typed values to and from the store's byte-string representation.
//!
//! ## Format
//!
//! - Scalars are stored as their canonical string form: decimal integers,
//!   shortest round-trip floats (`NaN`, `inf`, `-inf` included), `true`/`false`
//! - Blobs are stored raw
//! - Inside lists, sets and maps a `Null` element, key or value is written as
//!   [`NULL_SENTINEL`], so a collection can hold nulls without being confused
//!   with absent data
//!
//! ## Absent data
//!
//! A column with no stored data decodes to its zero value, or to `Null` when
//! the field is nullable. An empty string decodes to zero for numeric types.

use crate::error::{Error, Result};
use crate::value::{ScalarType, Value};

/// Reserved encoding of a `Null` collection element, key or value
pub const NULL_SENTINEL: &str = "\u{0}nil\u{0}";

/// Canonical encoding of a scalar or blob value, without a type check
///
/// Fails with `UnsupportedType` for `Null` and for collections, which have no
/// single-string form.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let text = match value {
        Value::Bool(b) => b.to_string(),
        Value::I8(v) => v.to_string(),
        Value::I16(v) => v.to_string(),
        Value::I32(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::F32(v) => v.to_string(),
        Value::F64(v) => v.to_string(),
        Value::String(s) => s.clone(),
        Value::Bytes(b) => return Ok(b.clone()),
        other => {
            return Err(Error::UnsupportedType(format!(
                "{} has no scalar encoding",
                other.type_name()
            )))
        }
    };
    Ok(text.into_bytes())
}

/// Encode a scalar column value, checking it against the declared type
pub fn encode_scalar(ty: ScalarType, value: &Value) -> Result<Vec<u8>> {
    check_type(ty, value)?;
    encode(value)
}

/// Encode a blob column value
pub fn encode_blob(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(b) => Ok(b.clone()),
        other => Err(Error::TypeMismatch {
            expected: "blob",
            actual: other.type_name(),
        }),
    }
}

/// Encode one collection element, map key or map value
pub fn encode_element(ty: ScalarType, value: &Value) -> Result<Vec<u8>> {
    if value.is_null() {
        return Ok(NULL_SENTINEL.as_bytes().to_vec());
    }
    if value.as_str() == Some(NULL_SENTINEL) {
        return Err(Error::InvalidValue(
            "string collides with the reserved null sentinel".to_string(),
        ));
    }
    encode_scalar(ty, value)
}

/// Decode a scalar column
///
/// `raw` is `None` when the store holds nothing for the column.
pub fn decode_scalar(ty: ScalarType, raw: Option<&[u8]>, nullable: bool) -> Result<Value> {
    match raw {
        None if nullable => Ok(Value::Null),
        None => Ok(ty.zero_value()),
        Some(bytes) => decode(ty, bytes),
    }
}

/// Decode a blob column
pub fn decode_blob(raw: Option<&[u8]>, nullable: bool) -> Value {
    match raw {
        None if nullable => Value::Null,
        None => Value::Bytes(Vec::new()),
        Some(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

/// Decode one collection element, map key or map value
pub fn decode_element(ty: ScalarType, raw: &[u8]) -> Result<Value> {
    if raw == NULL_SENTINEL.as_bytes() {
        return Ok(Value::Null);
    }
    decode(ty, raw)
}

/// Decode present raw data as `ty`
pub fn decode(ty: ScalarType, raw: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| Error::decode(format!("{} is not valid UTF-8: {}", ty, e)))?;
    let parsed = match ty {
        ScalarType::String => return Ok(Value::String(text.to_string())),
        _ if text.is_empty() => return Ok(ty.zero_value()),
        ScalarType::Bool => text.parse().map(Value::Bool).map_err(|e| e.to_string()),
        ScalarType::I8 => text.parse().map(Value::I8).map_err(|e| e.to_string()),
        ScalarType::I16 => text.parse().map(Value::I16).map_err(|e| e.to_string()),
        ScalarType::I32 => text.parse().map(Value::I32).map_err(|e| e.to_string()),
        ScalarType::I64 => text.parse().map(Value::I64).map_err(|e| e.to_string()),
        ScalarType::F32 => text.parse().map(Value::F32).map_err(|e| e.to_string()),
        ScalarType::F64 => text.parse().map(Value::F64).map_err(|e| e.to_string()),
    };
    parsed.map_err(|e| Error::decode(format!("'{}' as {}: {}", text, ty, e)))
}

/// Rank-set score of a numeric value
pub fn to_score(value: &Value) -> Result<f64> {
    match value {
        Value::Bool(_) | Value::String(_) => Err(Error::UnsupportedType(format!(
            "{} cannot be ranked",
            value.type_name()
        ))),
        other => other.as_f64().ok_or_else(|| {
            Error::UnsupportedType(format!("{} cannot be ranked", other.type_name()))
        }),
    }
}

/// Canonical string of a value, as embedded in unique and index keys
pub fn token(ty: ScalarType, value: &Value) -> Result<String> {
    let bytes = encode_scalar(ty, value)?;
    String::from_utf8(bytes).map_err(|e| Error::decode(e.to_string()))
}

fn check_type(ty: ScalarType, value: &Value) -> Result<()> {
    if ty.admits(value) {
        Ok(())
    } else {
        Err(Error::TypeMismatch {
            expected: ty.name(),
            actual: value.type_name(),
        })
    }
}
