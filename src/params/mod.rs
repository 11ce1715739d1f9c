//! Parameters module - reading requests from parameter sources.
//!
//! A [`ParameterSource`] is a uniform accessor over one transport encoding:
//! - [`FormSource`] - URL query / form values, flat scalars and sequences
//! - [`JsonSource`] - a JSON object request body
//! - [`RpcSource`] - an already-decoded JSON-RPC `params` value
//!
//! [`unmarshal`] walks a [`RequestSchema`] against a source and collects the
//! values into a JSON object keyed by wire key, ready to deserialize
//! into the request type.
//!
//! # Example
//!
//! ```ignore
//! use versioned_rpc::params::{unmarshal, FormSource};
//!
//! let mut source = FormSource::from_query("req_int=123");
//! let params = unmarshal(version.request(), &mut source)?;
//! assert_eq!(params["req_int"], 123);
//! ```

mod form;
mod json;
mod rpc;
mod value;

use serde_json::{Map, Number, Value};

use crate::error::{Expected, ParameterError};
use crate::schema::{Element, Parameter, RequestSchema, ScalarKind, Shape};

pub use form::FormSource;
pub use json::{JsonSource, MAX_BODY_SIZE};
pub use rpc::RpcSource;

/// Visitor over sequence elements, in order.
pub type SliceVisitor<'a> = dyn FnMut(usize, &Value) -> Result<(), ParameterError> + 'a;

/// Visitor over map entries.
pub type MapVisitor<'a> = dyn FnMut(&str, &Value) -> Result<(), ParameterError> + 'a;

/// Uniform accessor over an encoded request.
///
/// `path` is the list of enclosing struct keys, `key` the field's own key.
/// Sources that cannot represent nesting ignore `path`.
pub trait ParameterSource: Send {
    /// Prepare the source. Called once before any accessor.
    fn parse(&mut self) -> Result<(), ParameterError>;

    fn exists(&self, path: &[String], key: &str) -> bool;

    fn get_bool(&self, path: &[String], key: &str) -> Result<bool, ParameterError>;
    fn get_int(&self, path: &[String], key: &str) -> Result<i64, ParameterError>;
    fn get_uint(&self, path: &[String], key: &str) -> Result<u64, ParameterError>;
    fn get_float(&self, path: &[String], key: &str) -> Result<f64, ParameterError>;
    fn get_string(&self, path: &[String], key: &str) -> Result<String, ParameterError>;

    /// Visit each element of the sequence at `path`/`key`.
    ///
    /// Returns `Ok(false)` when the value is not a sequence.
    fn traverse_slice(
        &self,
        path: &[String],
        key: &str,
        visit: &mut SliceVisitor<'_>,
    ) -> Result<bool, ParameterError>;

    /// Visit each entry of the map at `path`/`key`.
    ///
    /// Returns `Ok(false)` when the value is not a map.
    fn traverse_map(
        &self,
        path: &[String],
        key: &str,
        visit: &mut MapVisitor<'_>,
    ) -> Result<bool, ParameterError>;

    /// A source of the same variant scoped to one collection element.
    fn fork(&self, element: &Value) -> Result<Box<dyn ParameterSource>, ParameterError>;
}

/// Read the parameters described by `schema` from `source`.
///
/// Absent optional fields are left out of the result; an absent required
/// field fails with [`ParameterError::MissingRequired`].
pub fn unmarshal(
    schema: &RequestSchema,
    source: &mut dyn ParameterSource,
) -> Result<Value, ParameterError> {
    source.parse()?;
    let engine = Engine { schema };
    engine.fields(&schema.fields, &*source, &base_path(&schema.fields))
}

fn base_path(fields: &[Parameter]) -> Vec<String> {
    fields.first().map(|p| p.path.clone()).unwrap_or_default()
}

struct Engine<'s> {
    schema: &'s RequestSchema,
}

impl Engine<'_> {
    fn fields(
        &self,
        params: &[Parameter],
        source: &dyn ParameterSource,
        path: &[String],
    ) -> Result<Value, ParameterError> {
        let mut object = Map::with_capacity(params.len());
        for param in params {
            if !source.exists(path, param.key) {
                if param.required {
                    return Err(ParameterError::MissingRequired(param.key.to_string()));
                }
                continue;
            }
            let value = self.field(param, source, path)?;
            object.insert(param.key.to_string(), value);
        }
        Ok(Value::Object(object))
    }

    fn field(
        &self,
        param: &Parameter,
        source: &dyn ParameterSource,
        path: &[String],
    ) -> Result<Value, ParameterError> {
        let key = param.key;
        match &param.shape {
            Shape::Scalar(kind) => read_scalar(*kind, source, path, key),
            Shape::Struct(fields) => {
                let mut child = path.to_vec();
                child.push(key.to_string());
                self.fields(self.schema.resolve(fields), source, &child)
            }
            Shape::Sequence { element, .. } => {
                let mut items = Vec::new();
                let found = source.traverse_slice(path, key, &mut |_, raw| {
                    items.push(self.element(element, source, key, raw, true)?);
                    Ok(())
                })?;
                if !found {
                    return Err(ParameterError::wrong(key, Expected::Slice));
                }
                Ok(Value::Array(items))
            }
            Shape::Map { key: key_kind, value } => {
                let mut entries = Map::new();
                let found = source.traverse_map(path, key, &mut |entry_key, raw| {
                    check_map_key(*key_kind, entry_key, key)?;
                    let item = self.element(value, source, key, raw, false)?;
                    entries.insert(entry_key.to_string(), item);
                    Ok(())
                })?;
                if !found {
                    return Err(ParameterError::wrong(key, Expected::Map));
                }
                Ok(Value::Object(entries))
            }
        }
    }

    /// `lenient` lets numeric and boolean sequence elements arrive as strings.
    fn element(
        &self,
        element: &Element,
        source: &dyn ParameterSource,
        key: &str,
        raw: &Value,
        lenient: bool,
    ) -> Result<Value, ParameterError> {
        if raw.is_null() {
            if element.optional {
                return Ok(Value::Null);
            }
            return Err(ParameterError::wrong(key, expected_of(&element.shape)));
        }

        match &element.shape {
            Shape::Scalar(kind) => scalar_from_raw(*kind, raw, key, lenient),
            Shape::Struct(fields) => {
                if !raw.is_object() {
                    return Err(ParameterError::wrong(key, Expected::Object));
                }
                let scoped = source.fork(raw)?;
                self.fields(self.schema.resolve(fields), scoped.as_ref(), &[])
            }
            Shape::Sequence { element: inner, .. } => {
                let Value::Array(raw_items) = raw else {
                    return Err(ParameterError::wrong(key, Expected::Slice));
                };
                raw_items
                    .iter()
                    .map(|item| self.element(inner, source, key, item, true))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            Shape::Map { key: key_kind, value } => {
                let Value::Object(raw_entries) = raw else {
                    return Err(ParameterError::wrong(key, Expected::Map));
                };
                let mut entries = Map::new();
                for (entry_key, item) in raw_entries {
                    check_map_key(*key_kind, entry_key, key)?;
                    entries.insert(
                        entry_key.clone(),
                        self.element(value, source, key, item, false)?,
                    );
                }
                Ok(Value::Object(entries))
            }
        }
    }
}

fn expected_of(shape: &Shape) -> Expected {
    match shape {
        Shape::Scalar(kind) => expected_scalar(*kind),
        Shape::Struct(_) => Expected::Object,
        Shape::Sequence { .. } => Expected::Slice,
        Shape::Map { .. } => Expected::Map,
    }
}

fn expected_scalar(kind: ScalarKind) -> Expected {
    match kind {
        ScalarKind::Bool => Expected::Bool,
        ScalarKind::Int(_) => Expected::Int,
        ScalarKind::Uint(_) => Expected::Uint,
        ScalarKind::Float(_) => Expected::Float,
        ScalarKind::String => Expected::String,
    }
}

/// Read a scalar field through the accessor matching its kind.
fn read_scalar(
    kind: ScalarKind,
    source: &dyn ParameterSource,
    path: &[String],
    key: &str,
) -> Result<Value, ParameterError> {
    match kind {
        ScalarKind::Bool => source.get_bool(path, key).map(Value::Bool),
        ScalarKind::String => source.get_string(path, key).map(Value::String),
        ScalarKind::Int(bits) => {
            let value = source.get_int(path, key)?;
            checked_int(bits, value, key)
        }
        ScalarKind::Uint(bits) => {
            let value = source.get_uint(path, key)?;
            checked_uint(bits, value, key)
        }
        ScalarKind::Float(_) => {
            let value = source.get_float(path, key)?;
            float_value(value, key)
        }
    }
}

fn scalar_from_raw(
    kind: ScalarKind,
    raw: &Value,
    key: &str,
    lenient: bool,
) -> Result<Value, ParameterError> {
    let wrong = || ParameterError::wrong(key, expected_scalar(kind));
    let text = match raw {
        Value::String(text) if lenient && kind != ScalarKind::String => Some(text.trim()),
        _ => None,
    };

    match kind {
        ScalarKind::Bool => {
            let value = match text {
                Some(text) => value::parse_bool(text),
                None => raw.as_bool(),
            };
            value.map(Value::Bool).ok_or_else(wrong)
        }
        ScalarKind::String => raw
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(wrong),
        ScalarKind::Int(bits) => {
            let value = match text {
                Some(text) => text.parse::<i64>().ok(),
                None => raw.as_i64(),
            };
            checked_int(bits, value.ok_or_else(wrong)?, key)
        }
        ScalarKind::Uint(bits) => {
            let value = match text {
                Some(text) => text.parse::<u64>().ok(),
                None => raw.as_u64(),
            };
            checked_uint(bits, value.ok_or_else(wrong)?, key)
        }
        ScalarKind::Float(_) => {
            let value = match text {
                Some(text) => text.parse::<f64>().ok(),
                None => raw.as_f64(),
            };
            float_value(value.ok_or_else(wrong)?, key)
        }
    }
}

fn checked_int(bits: u8, value: i64, key: &str) -> Result<Value, ParameterError> {
    if !ScalarKind::fits_int(bits, value) {
        return Err(ParameterError::wrong(key, Expected::Int));
    }
    Ok(Value::from(value))
}

fn checked_uint(bits: u8, value: u64, key: &str) -> Result<Value, ParameterError> {
    if !ScalarKind::fits_uint(bits, value) {
        return Err(ParameterError::wrong(key, Expected::Uint));
    }
    Ok(Value::from(value))
}

fn float_value(value: f64, key: &str) -> Result<Value, ParameterError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| ParameterError::wrong(key, Expected::Float))
}

fn check_map_key(kind: ScalarKind, entry_key: &str, key: &str) -> Result<(), ParameterError> {
    let valid = match kind {
        ScalarKind::String => true,
        ScalarKind::Bool => matches!(entry_key, "true" | "false"),
        ScalarKind::Int(bits) => entry_key
            .parse::<i64>()
            .is_ok_and(|v| ScalarKind::fits_int(bits, v)),
        ScalarKind::Uint(bits) => entry_key
            .parse::<u64>()
            .is_ok_and(|v| ScalarKind::fits_uint(bits, v)),
        ScalarKind::Float(_) => entry_key.parse::<f64>().is_ok(),
    };
    if valid {
        Ok(())
    } else {
        Err(ParameterError::wrong(key, Expected::Map))
    }
}
