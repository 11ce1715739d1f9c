//! Lookups and typed reads over decoded JSON values, shared by the JSON
//! body and JSON-RPC sources.

use serde_json::Value;

use super::{MapVisitor, SliceVisitor};
use crate::error::{Expected, ParameterError};

/// Boolean spellings accepted from text: `1 t T true TRUE True` and the
/// matching false forms.
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Follow `path` then `key` from `root`.
///
/// With `index_arrays`, numeric path segments also index into arrays.
pub(crate) fn lookup<'v>(
    root: &'v Value,
    path: &[String],
    key: &str,
    index_arrays: bool,
) -> Option<&'v Value> {
    let mut current = root;
    for segment in path.iter().map(String::as_str).chain(std::iter::once(key)) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) if index_arrays => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub(crate) fn as_bool(value: Option<&Value>, key: &str) -> Result<bool, ParameterError> {
    value
        .and_then(Value::as_bool)
        .ok_or_else(|| ParameterError::wrong(key, Expected::Bool))
}

pub(crate) fn as_int(value: Option<&Value>, key: &str) -> Result<i64, ParameterError> {
    value
        .and_then(Value::as_i64)
        .ok_or_else(|| ParameterError::wrong(key, Expected::Int))
}

pub(crate) fn as_uint(value: Option<&Value>, key: &str) -> Result<u64, ParameterError> {
    value
        .and_then(Value::as_u64)
        .ok_or_else(|| ParameterError::wrong(key, Expected::Uint))
}

pub(crate) fn as_float(value: Option<&Value>, key: &str) -> Result<f64, ParameterError> {
    value
        .and_then(Value::as_f64)
        .ok_or_else(|| ParameterError::wrong(key, Expected::Float))
}

pub(crate) fn as_string(value: Option<&Value>, key: &str) -> Result<String, ParameterError> {
    value
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ParameterError::wrong(key, Expected::String))
}

pub(crate) fn traverse_slice(
    value: Option<&Value>,
    visit: &mut SliceVisitor<'_>,
) -> Result<bool, ParameterError> {
    let Some(Value::Array(items)) = value else {
        return Ok(false);
    };
    for (index, item) in items.iter().enumerate() {
        visit(index, item)?;
    }
    Ok(true)
}

pub(crate) fn traverse_map(
    value: Option<&Value>,
    visit: &mut MapVisitor<'_>,
) -> Result<bool, ParameterError> {
    let Some(Value::Object(entries)) = value else {
        return Ok(false);
    };
    for (key, item) in entries {
        visit(key, item)?;
    }
    Ok(true)
}
