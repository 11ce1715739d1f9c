//! URL query / form values source.

use std::collections::HashMap;

use serde_json::Value;

use super::value::parse_bool;
use super::{MapVisitor, ParameterSource, SliceVisitor};
use crate::error::{Expected, ParameterError};

/// Reads parameters from form-encoded key/value pairs.
///
/// Keys are matched case-insensitively. Forms cannot express nesting, so
/// paths are ignored and maps or struct elements are not supported; a key
/// repeated several times forms a sequence.
#[derive(Debug, Clone, Default)]
pub struct FormSource {
    values: HashMap<String, Vec<String>>,
}

impl FormSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut source = Self::new();
        for (key, value) in pairs {
            source.insert(key.as_ref(), value);
        }
        source
    }

    /// Parse an `application/x-www-form-urlencoded` string.
    pub fn from_query(query: &str) -> Self {
        Self::from_pairs(url::form_urlencoded::parse(query.as_bytes()).into_owned())
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values
            .entry(key.to_lowercase())
            .or_default()
            .push(value.into());
    }

    fn first(&self, key: &str) -> Option<&str> {
        self.values
            .get(&key.to_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    fn parse_first<T: std::str::FromStr>(&self, key: &str, expected: Expected) -> Result<T, ParameterError> {
        self.first(key)
            .and_then(|value| value.trim().parse().ok())
            .ok_or_else(|| ParameterError::wrong(key, expected))
    }
}

impl ParameterSource for FormSource {
    fn parse(&mut self) -> Result<(), ParameterError> {
        Ok(())
    }

    fn exists(&self, _path: &[String], key: &str) -> bool {
        self.values
            .get(&key.to_lowercase())
            .is_some_and(|values| !values.is_empty())
    }

    fn get_bool(&self, _path: &[String], key: &str) -> Result<bool, ParameterError> {
        self.first(key)
            .and_then(parse_bool)
            .ok_or_else(|| ParameterError::wrong(key, Expected::Bool))
    }

    fn get_int(&self, _path: &[String], key: &str) -> Result<i64, ParameterError> {
        self.parse_first(key, Expected::Int)
    }

    fn get_uint(&self, _path: &[String], key: &str) -> Result<u64, ParameterError> {
        self.parse_first(key, Expected::Uint)
    }

    fn get_float(&self, _path: &[String], key: &str) -> Result<f64, ParameterError> {
        self.parse_first(key, Expected::Float)
    }

    fn get_string(&self, _path: &[String], key: &str) -> Result<String, ParameterError> {
        self.first(key)
            .map(str::to_string)
            .ok_or_else(|| ParameterError::wrong(key, Expected::String))
    }

    fn traverse_slice(
        &self,
        _path: &[String],
        key: &str,
        visit: &mut SliceVisitor<'_>,
    ) -> Result<bool, ParameterError> {
        let Some(values) = self.values.get(&key.to_lowercase()) else {
            return Ok(false);
        };
        for (index, value) in values.iter().enumerate() {
            visit(index, &Value::String(value.clone()))?;
        }
        Ok(true)
    }

    fn traverse_map(
        &self,
        _path: &[String],
        _key: &str,
        _visit: &mut MapVisitor<'_>,
    ) -> Result<bool, ParameterError> {
        Err(ParameterError::NotSupported("maps"))
    }

    fn fork(&self, _element: &Value) -> Result<Box<dyn ParameterSource>, ParameterError> {
        Err(ParameterError::NotSupported("nested structures"))
    }
}
