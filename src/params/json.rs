//! JSON request body source.

use bytes::Bytes;
use serde_json::Value;

use super::value::{self, lookup};
use super::{MapVisitor, ParameterSource, SliceVisitor};
use crate::error::ParameterError;

/// Largest accepted request body (10 MiB).
pub const MAX_BODY_SIZE: usize = 10 << 20;

/// Reads parameters from a JSON object body.
///
/// Paths descend through nested objects.
#[derive(Debug, Clone)]
pub struct JsonSource {
    body: Bytes,
    values: Option<Value>,
}

impl JsonSource {
    /// Source over raw body bytes, decoded by [`parse`](ParameterSource::parse).
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            values: None,
        }
    }

    /// Source over an already-decoded object.
    pub fn from_value(values: Value) -> Self {
        Self {
            body: Bytes::new(),
            values: Some(values),
        }
    }

    fn get(&self, path: &[String], key: &str) -> Option<&Value> {
        self.values
            .as_ref()
            .and_then(|root| lookup(root, path, key, false))
    }
}

impl ParameterSource for JsonSource {
    fn parse(&mut self) -> Result<(), ParameterError> {
        if self.values.is_some() {
            return Ok(());
        }
        if self.body.len() > MAX_BODY_SIZE {
            return Err(ParameterError::Malformed(format!(
                "request body exceeds {MAX_BODY_SIZE} bytes"
            )));
        }
        let values: Value = if self.body.iter().all(u8::is_ascii_whitespace) {
            Value::Object(Default::default())
        } else {
            serde_json::from_slice(&self.body).map_err(|e| ParameterError::Malformed(e.to_string()))?
        };
        if !values.is_object() {
            return Err(ParameterError::Malformed(
                "request body must be a JSON object".to_string(),
            ));
        }
        self.values = Some(values);
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
        Ok(Box::new(JsonSource::from_value(element.clone())))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_body() {
        let mut source = JsonSource::new(r#"{"user": {"id": 7}, "none": null}"#);
        source.parse().unwrap();
        let path = vec!["user".to_string()];
        assert!(source.exists(&path, "id"));
        assert_eq!(source.get_int(&path, "id"), Ok(7));
        assert!(!source.exists(&[], "none"));
        assert!(!source.exists(&[], "missing"));
    }

    #[test]
    fn test_empty_body_is_empty_object() {
        let mut source = JsonSource::new("  ");
        source.parse().unwrap();
        assert!(!source.exists(&[], "anything"));
    }

    #[test]
    fn test_rejects_non_objects_and_garbage() {
        let mut source = JsonSource::new("[1, 2]");
        assert!(matches!(source.parse(), Err(ParameterError::Malformed(_))));

        let mut source = JsonSource::new("{not json");
        assert!(matches!(source.parse(), Err(ParameterError::Malformed(_))));
    }

    #[test]
    fn test_rejects_oversized_body() {
        let mut body = vec![b' '; MAX_BODY_SIZE];
        body.extend_from_slice(b"{}");
        let mut source = JsonSource::new(body);
        assert!(matches!(source.parse(), Err(ParameterError::Malformed(_))));
    }

    #[test]
    fn test_fork_scopes_to_element() {
        let source = JsonSource::from_value(json!({}));
        let forked = source.fork(&json!({"f1": 1})).unwrap();
        assert_eq!(forked.get_int(&[], "f1"), Ok(1));
    }
}
