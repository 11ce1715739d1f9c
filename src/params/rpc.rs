//! JSON-RPC `params` source.

use serde_json::Value;

use super::value::{self, lookup};
use super::{MapVisitor, ParameterSource, SliceVisitor};
use crate::error::ParameterError;

/// Reads parameters from an already-decoded JSON-RPC `params` value.
///
/// `params` may be an object, or an array holding a single object (the
/// by-position form with one argument). Numeric path segments index into
/// arrays, and explicit `null` counts as absent.
#[derive(Debug, Clone)]
pub struct RpcSource {
    params: Value,
}

impl RpcSource {
    pub fn new(params: Value) -> Self {
        Self { params }
    }

    fn get(&self, path: &[String], key: &str) -> Option<&Value> {
        lookup(&self.params, path, key, true)
    }
}

impl ParameterSource for RpcSource {
    fn parse(&mut self) -> Result<(), ParameterError> {
        self.params = match std::mem::take(&mut self.params) {
            Value::Null => Value::Object(Default::default()),
            Value::Array(items) if items.is_empty() => Value::Object(Default::default()),
            Value::Array(mut items) if items.len() == 1 && items[0].is_object() => {
                items.swap_remove(0)
            }
            Value::Array(_) => {
                return Err(ParameterError::Malformed(
                    "params array must hold a single object".to_string(),
                ))
            }
            object @ Value::Object(_) => object,
            _ => {
                return Err(ParameterError::Malformed(
                    "params must be a JSON object or array".to_string(),
                ))
            }
        };
        Ok(())
    }

    fn exists(&self, path: &[String], key: &str) -> bool {
        self.get(path, key).is_some_and(|value| !value.is_null())
    }

    fn get_bool(&self, path: &[String], key: &str) -> Result<bool, ParameterError> {
        value::as_bool(self.get(path, key), key)
    }

    fn get_int(&self, path: &[String], key: &str) -> Result<i64, ParameterError> {
        value::as_int(self.get(path, key), key)
    }

    fn get_uint(&self, path: &[String], key: &str) -> Result<u64, ParameterError> {
        value::as_uint(self.get(path, key), key)
    }

    fn get_float(&self, path: &[String], key: &str) -> Result<f64, ParameterError> {
        value::as_float(self.get(path, key), key)
    }

    fn get_string(&self, path: &[String], key: &str) -> Result<String, ParameterError> {
        value::as_string(self.get(path, key), key)
    }

    fn traverse_slice(
        &self,
        path: &[String],
        key: &str,
        visit: &mut SliceVisitor<'_>,
    ) -> Result<bool, ParameterError> {
        value::traverse_slice(self.get(path, key), visit)
    }

    fn traverse_map(
        &self,
        path: &[String],
        key: &str,
        visit: &mut MapVisitor<'_>,
    ) -> Result<bool, ParameterError> {
        value::traverse_map(self.get(path, key), visit)
    }

    fn fork(&self, element: &Value) -> Result<Box<dyn ParameterSource>, ParameterError> {
        Ok(Box::new(RpcSource::new(element.clone())))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_array_paths() {
        let source = RpcSource::new(json!({"list": [{"id": 1}, {"id": 2}]}));
        let path = vec!["list".to_string(), "1".to_string()];
        assert!(source.exists(&path, "id"));
        assert_eq!(source.get_uint(&path, "id"), Ok(2));
    }

    #[test]
    fn test_null_is_absent() {
        let mut source = RpcSource::new(json!({"a": null}));
        source.parse().unwrap();
        assert!(!source.exists(&[], "a"));
    }

    #[test]
    fn test_null_params_are_empty() {
        let mut source = RpcSource::new(Value::Null);
        source.parse().unwrap();
        assert!(!source.exists(&[], "a"));

        let mut source = RpcSource::new(json!("text"));
        assert!(source.parse().is_err());
    }

    #[test]
    fn test_positional_params() {
        let mut source = RpcSource::new(json!([{"req_int": 5, "list": [7, 8]}]));
        source.parse().unwrap();
        assert_eq!(source.get_int(&[], "req_int"), Ok(5));
        let path = vec!["list".to_string(), "1".to_string()];
        assert!(source.exists(&[], "list"));
        assert!(!source.exists(&path, "id"));

        let mut source = RpcSource::new(json!([]));
        source.parse().unwrap();
        assert!(!source.exists(&[], "req_int"));

        for params in [json!([1]), json!([{"a": 1}, {"b": 2}])] {
            let mut source = RpcSource::new(params);
            assert!(matches!(source.parse(), Err(ParameterError::Malformed(_))));
        }
    }
}
