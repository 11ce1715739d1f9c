//! Introspected request schemas.

use std::any::TypeId;
use std::collections::HashMap;

use serde::Serialize;

use super::reflect::{ScalarKind, TypeDesc};

/// Schema of one version's request type.
#[derive(Debug, Clone)]
pub struct RequestSchema {
    pub ty: TypeDesc,
    /// No struct fields, maps or sequences of non-scalars anywhere.
    pub flat: bool,
    pub fields: Vec<Parameter>,
    /// Field lists of every struct reached during introspection, used to
    /// resolve [`Fields::Recursive`] back-references.
    pub definitions: HashMap<TypeId, Vec<Parameter>>,
}

impl RequestSchema {
    /// Child parameters of a struct node, following back-references.
    pub fn resolve<'a>(&'a self, fields: &'a Fields) -> &'a [Parameter] {
        match fields {
            Fields::Expanded(params) => params,
            Fields::Recursive { id, .. } => self
                .definitions
                .get(id)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        }
    }

    /// Documentation tree of the request, suitable for serialization.
    pub fn docs(&self) -> Vec<ParameterDoc> {
        self.fields.iter().map(ParameterDoc::from_parameter).collect()
    }
}

/// One request field.
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Rust field name.
    pub name: &'static str,
    /// Wire key.
    pub key: &'static str,
    pub description: &'static str,
    pub type_name: String,
    pub required: bool,
    pub shape: Shape,
    /// Keys of the enclosing struct fields, from the request root (or from
    /// the nearest collection element) down to this field's parent.
    pub path: Vec<String>,
}

impl Parameter {
    pub fn is_nested(&self) -> bool {
        !matches!(self.shape, Shape::Scalar(_))
    }
}

/// How a value is read from a source.
#[derive(Debug, Clone)]
pub enum Shape {
    Scalar(ScalarKind),
    Struct(Fields),
    Sequence {
        element: Box<Element>,
        len: Option<usize>,
    },
    Map {
        key: ScalarKind,
        value: Box<Element>,
    },
}

/// Element of a sequence or value of a map.
#[derive(Debug, Clone)]
pub struct Element {
    pub type_name: String,
    pub optional: bool,
    pub shape: Shape,
}

/// Children of a struct node.
#[derive(Debug, Clone)]
pub enum Fields {
    Expanded(Vec<Parameter>),
    /// The struct is one of its own ancestors; its fields live in
    /// [`RequestSchema::definitions`].
    Recursive { id: TypeId, name: &'static str },
}

/// Serializable documentation for one request field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterDoc {
    pub key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub description: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ParameterDoc>,
    /// Set when the field refers back to an enclosing struct.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recursive: Option<String>,
}

impl ParameterDoc {
    fn from_parameter(param: &Parameter) -> Self {
        let mut doc = Self {
            key: param.key.to_string(),
            name: param.name.to_string(),
            type_name: param.type_name.clone(),
            description: param.description.to_string(),
            required: param.required,
            path: param.path.clone(),
            children: Vec::new(),
            recursive: None,
        };
        doc.describe_shape(&param.shape);
        doc
    }

    fn describe_shape(&mut self, shape: &Shape) {
        match shape {
            Shape::Scalar(_) => {}
            Shape::Struct(Fields::Expanded(params)) => {
                self.children = params.iter().map(Self::from_parameter).collect();
            }
            Shape::Struct(Fields::Recursive { name, .. }) => {
                self.recursive = Some((*name).to_string());
            }
            Shape::Sequence { element, .. } => self.describe_shape(&element.shape),
            Shape::Map { value, .. } => self.describe_shape(&value.shape),
        }
    }
}
