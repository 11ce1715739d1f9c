//! Request schema derivation and structure ownership checks.

use std::any::TypeId;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{FieldRule, Location, RegistrationError, SharedStructure};

use super::model::{Element, Fields, Parameter, RequestSchema, Shape};
use super::reflect::{FieldDesc, Kind, TypeDesc};

/// Derive the parameter schema of a request type.
///
/// `base_path` prefixes the paths of the top-level fields. With `flat_only`
/// set, any struct field, map, or sequence of non-scalars is a registration
/// error instead of merely clearing [`RequestSchema::flat`].
pub fn derive_request_schema(
    ty: &TypeDesc,
    base_path: &[String],
    handler: &str,
    version: u32,
    flat_only: bool,
) -> Result<RequestSchema, RegistrationError> {
    let Kind::Struct(fields) = &ty.kind else {
        return Err(RegistrationError::RequestNotStruct {
            handler: handler.to_string(),
            version,
            type_name: ty.type_name(),
        });
    };

    let mut introspector = Introspector {
        handler,
        version,
        flat_only,
        flat: true,
        ancestors: Vec::new(),
        memo: HashMap::new(),
    };
    let fields = match introspector.expand(ty, fields, base_path)? {
        Fields::Expanded(params) => params,
        // The root has no ancestors.
        Fields::Recursive { .. } => Vec::new(),
    };

    Ok(RequestSchema {
        ty: ty.clone(),
        flat: introspector.flat,
        fields,
        definitions: introspector.memo,
    })
}

struct Introspector<'a> {
    handler: &'a str,
    version: u32,
    flat_only: bool,
    flat: bool,
    ancestors: Vec<TypeId>,
    memo: HashMap<TypeId, Vec<Parameter>>,
}

impl Introspector<'_> {
    fn expand(
        &mut self,
        ty: &TypeDesc,
        fields: &[FieldDesc],
        path: &[String],
    ) -> Result<Fields, RegistrationError> {
        if self.ancestors.contains(&ty.id) {
            return Ok(Fields::Recursive {
                id: ty.id,
                name: ty.name,
            });
        }
        if let Some(known) = self.memo.get(&ty.id) {
            let mut params = known.clone();
            rebase(&mut params, path);
            return Ok(Fields::Expanded(params));
        }

        self.ancestors.push(ty.id);
        let result = self.parameters(fields, path);
        self.ancestors.pop();

        let params = result?;
        self.memo.insert(ty.id, params.clone());
        Ok(Fields::Expanded(params))
    }

    fn parameters(
        &mut self,
        fields: &[FieldDesc],
        path: &[String],
    ) -> Result<Vec<Parameter>, RegistrationError> {
        let mut keys = HashSet::new();
        let mut params = Vec::with_capacity(fields.len());
        for field in fields {
            if field.key.is_empty() || field.key == "-" {
                return Err(self.field_error(field, FieldRule::MissingKey));
            }
            if !field.public {
                return Err(self.field_error(field, FieldRule::Private));
            }
            if field.description.is_empty() {
                return Err(self.field_error(field, FieldRule::MissingDescription));
            }
            if !keys.insert(field.key) {
                return Err(self.field_error(
                    field,
                    FieldRule::DuplicateKey(field.key.to_string()),
                ));
            }
            params.push(self.parameter(field, path)?);
        }
        Ok(params)
    }

    fn parameter(
        &mut self,
        field: &FieldDesc,
        path: &[String],
    ) -> Result<Parameter, RegistrationError> {
        let ty = (field.ty)();
        let (required, inner) = match ty.kind {
            Kind::Optional(inner) => (false, inner()),
            _ => (true, ty.clone()),
        };

        let mut struct_path = path.to_vec();
        struct_path.push(field.key.to_string());
        let shape = self.shape(&inner, field, &struct_path)?;

        Ok(Parameter {
            name: field.name,
            key: field.key,
            description: field.description,
            type_name: ty.type_name(),
            required,
            shape,
            path: path.to_vec(),
        })
    }

    /// `struct_path` is where a struct-shaped value's fields would live.
    fn shape(
        &mut self,
        ty: &TypeDesc,
        field: &FieldDesc,
        struct_path: &[String],
    ) -> Result<Shape, RegistrationError> {
        match &ty.kind {
            Kind::Scalar(kind) => Ok(Shape::Scalar(*kind)),
            Kind::Struct(fields) => {
                self.nest(field)?;
                Ok(Shape::Struct(self.expand(ty, fields, struct_path)?))
            }
            Kind::Sequence { element, len } => {
                let element = self.element(&element(), field)?;
                if !matches!(element.shape, Shape::Scalar(_)) {
                    self.nest(field)?;
                }
                Ok(Shape::Sequence {
                    element: Box::new(element),
                    len: *len,
                })
            }
            Kind::Map { key, value } => {
                self.nest(field)?;
                let key_ty = key();
                let Kind::Scalar(key) = key_ty.kind else {
                    return Err(self.unsupported(field, &key_ty));
                };
                let value = self.element(&value(), field)?;
                Ok(Shape::Map {
                    key,
                    value: Box::new(value),
                })
            }
            Kind::Optional(_) | Kind::Opaque => Err(self.unsupported(field, ty)),
        }
    }

    /// Collection elements start a fresh path: their fields are read from
    /// the element itself.
    fn element(&mut self, ty: &TypeDesc, field: &FieldDesc) -> Result<Element, RegistrationError> {
        let (optional, inner) = match ty.kind {
            Kind::Optional(inner) => (true, inner()),
            _ => (false, ty.clone()),
        };
        Ok(Element {
            type_name: ty.type_name(),
            optional,
            shape: self.shape(&inner, field, &[])?,
        })
    }

    fn nest(&mut self, field: &FieldDesc) -> Result<(), RegistrationError> {
        if self.flat_only {
            return Err(self.field_error(field, FieldRule::DeepNesting));
        }
        self.flat = false;
        Ok(())
    }

    fn unsupported(&self, field: &FieldDesc, ty: &TypeDesc) -> RegistrationError {
        self.field_error(field, FieldRule::Unsupported(ty.type_name()))
    }

    fn field_error(&self, field: &FieldDesc, rule: FieldRule) -> RegistrationError {
        RegistrationError::Parameter {
            handler: self.handler.to_string(),
            version: self.version,
            field: field.name.to_string(),
            rule,
        }
    }
}

fn rebase(params: &mut [Parameter], path: &[String]) {
    for param in params {
        param.path = path.to_vec();
        if let Shape::Struct(Fields::Expanded(children)) = &mut param.shape {
            let mut child_path = path.to_vec();
            child_path.push(param.key.to_string());
            rebase(children, &child_path);
        }
    }
}

/// Struct types seen across registered versions.
#[derive(Debug, Default)]
pub(crate) struct StructureUsage {
    types: HashMap<TypeId, (String, BTreeSet<(String, u32)>)>,
}

impl StructureUsage {
    pub(crate) fn record(&mut self, ty: &TypeDesc, handler: &str, version: u32) {
        self.types
            .entry(ty.id)
            .or_insert_with(|| (ty.name.to_string(), BTreeSet::new()))
            .1
            .insert((handler.to_string(), version));
    }

    pub(crate) fn merge(&mut self, other: StructureUsage) {
        for (id, (name, users)) in other.types {
            self.types
                .entry(id)
                .or_insert_with(|| (name, BTreeSet::new()))
                .1
                .extend(users);
        }
    }

    /// Structures referenced by two or more distinct versions.
    pub(crate) fn shared(&self) -> Vec<SharedStructure> {
        let mut shared: Vec<_> = self
            .types
            .values()
            .filter(|(_, users)| users.len() > 1)
            .map(|(name, users)| SharedStructure {
                type_name: name.clone(),
                users: users.iter().cloned().collect(),
            })
            .collect();
        shared.sort_by(|a, b| a.type_name.cmp(&b.type_name));
        shared
    }
}

/// Check that every struct reachable from `ty` is defined in `module`, and
/// record each one against `(handler, version)`.
pub(crate) fn check_ownership(
    ty: &TypeDesc,
    module: &str,
    handler: &str,
    version: u32,
    location: Location,
    usage: &mut StructureUsage,
) -> Result<(), RegistrationError> {
    let mut visited = HashSet::new();
    let mut pending = vec![ty.clone()];
    while let Some(ty) = pending.pop() {
        match &ty.kind {
            Kind::Struct(fields) => {
                if !visited.insert(ty.id) {
                    continue;
                }
                if ty.module != module {
                    return Err(RegistrationError::ForeignStructure {
                        handler: handler.to_string(),
                        version,
                        location,
                        type_name: ty.name.to_string(),
                    });
                }
                usage.record(&ty, handler, version);
                pending.extend(fields.iter().map(|field| (field.ty)()));
            }
            Kind::Sequence { element, .. } => pending.push(element()),
            Kind::Map { key, value } => {
                pending.push(key());
                pending.push(value());
            }
            Kind::Optional(inner) => pending.push(inner()),
            Kind::Scalar(_) | Kind::Opaque => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use serde::Serialize;

    use super::*;
    use crate::schema::{ParameterDoc, Reflect, ScalarKind};

    crate::rpc_struct! {
        #[derive(Serialize)]
        pub struct Flat {
            #[param(key = "req_int", description = "Required integer argument")]
            pub req_int: i64,
            #[param(key = "int", description = "Unrequired integer argument")]
            pub int: Option<i64>,
            #[param(key = "tags", description = "Tags")]
            pub tags: Vec<String>,
        }
    }

    crate::rpc_struct! {
        #[derive(Serialize)]
        pub struct Inner {
            #[param(key = "f1", description = "First")]
            pub f1: i64,
            #[param(key = "f2", description = "Second")]
            pub f2: Option<i64>,
        }
    }

    crate::rpc_struct! {
        #[derive(Serialize)]
        pub struct Outer {
            #[param(key = "a", description = "First copy")]
            pub a: Inner,
            #[param(key = "b", description = "Second copy")]
            pub b: Option<Inner>,
            #[param(key = "list", description = "List of inners")]
            pub list: Vec<Inner>,
            #[param(key = "by_name", description = "Inners by name")]
            pub by_name: HashMap<String, Inner>,
        }
    }

    crate::rpc_struct! {
        #[derive(Serialize)]
        pub struct TreeNode {
            #[param(key = "name", description = "Node name")]
            pub name: String,
            #[param(key = "children", description = "Child nodes")]
            pub children: Vec<TreeNode>,
            #[param(key = "parent", description = "Parent node")]
            pub parent: Option<Box<TreeNode>>,
        }
    }

    crate::rpc_struct! {
        #[derive(Serialize)]
        pub struct NoKey {
            #[param(key = "", description = "Has no key")]
            pub value: i64,
        }
    }

    crate::rpc_struct! {
        #[derive(Serialize)]
        pub struct Dashed {
            #[param(key = "-", description = "Skipped key")]
            pub value: i64,
        }
    }

    crate::rpc_struct! {
        #[derive(Serialize)]
        #[allow(dead_code)]
        pub struct Hidden {
            #[param(key = "value", description = "Private value")]
            value: i64,
        }
    }

    crate::rpc_struct! {
        #[derive(Serialize)]
        pub struct Undocumented {
            #[param(key = "value", description = "")]
            pub value: i64,
        }
    }

    crate::rpc_struct! {
        #[derive(Serialize)]
        pub struct Twice {
            #[param(key = "value", description = "One")]
            pub one: i64,
            #[param(key = "value", description = "Two")]
            pub two: i64,
        }
    }

    crate::rpc_struct! {
        #[derive(Serialize)]
        pub struct Timed {
            #[param(key = "timeout", description = "Timeout")]
            pub timeout: Duration,
        }
    }

    crate::rpc_struct! {
        #[derive(Serialize)]
        pub struct StructKeyed {
            #[param(key = "by_inner", description = "Map keyed by a vector")]
            pub by_inner: HashMap<Vec<u8>, i64>,
        }
    }

    fn derive<T: Reflect>(flat_only: bool) -> Result<RequestSchema, RegistrationError> {
        derive_request_schema(&T::describe(), &[], "/test", 1, flat_only)
    }

    fn rule_of<T: Reflect>() -> FieldRule {
        match derive::<T>(false) {
            Err(RegistrationError::Parameter { rule, .. }) => rule,
            other => panic!("expected a parameter error, got {other:?}"),
        }
    }

    #[test]
    fn test_flat_schema() {
        let schema = derive::<Flat>(true).unwrap();
        assert!(schema.flat);
        assert_eq!(schema.fields.len(), 3);

        let req = &schema.fields[0];
        assert_eq!(req.key, "req_int");
        assert!(req.required);
        assert!(matches!(req.shape, Shape::Scalar(ScalarKind::Int(64))));

        let opt = &schema.fields[1];
        assert!(!opt.required);
        assert_eq!(opt.type_name, "Option<int64>");

        assert!(matches!(
            &schema.fields[2].shape,
            Shape::Sequence { element, len: None } if matches!(element.shape, Shape::Scalar(ScalarKind::String))
        ));
    }

    #[test]
    fn test_nested_paths_are_copied_per_branch() {
        let schema = derive::<Outer>(false).unwrap();
        assert!(!schema.flat);

        let children = |param: &Parameter| match &param.shape {
            Shape::Struct(Fields::Expanded(children)) => children.clone(),
            other => panic!("expected expanded struct, got {other:?}"),
        };
        let a = children(&schema.fields[0]);
        let b = children(&schema.fields[1]);
        assert_eq!(a[0].path, vec!["a".to_string()]);
        assert_eq!(b[0].path, vec!["b".to_string()]);
        assert!(!schema.fields[1].required);

        let Shape::Sequence { element, .. } = &schema.fields[2].shape else {
            panic!("expected sequence");
        };
        let Shape::Struct(Fields::Expanded(items)) = &element.shape else {
            panic!("expected struct elements");
        };
        assert!(items[0].path.is_empty());

        assert!(matches!(
            &schema.fields[3].shape,
            Shape::Map { key: ScalarKind::String, .. }
        ));
    }

    #[test]
    fn test_flat_only_rejects_nesting() {
        let err = derive::<Outer>(true).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::Parameter {
                rule: FieldRule::DeepNesting,
                ..
            }
        ));
    }

    #[test]
    fn test_recursive_struct_terminates() {
        let schema = derive::<TreeNode>(false).unwrap();
        assert_eq!(schema.fields.len(), 3);

        let Shape::Sequence { element, .. } = &schema.fields[1].shape else {
            panic!("expected sequence");
        };
        let Shape::Struct(fields) = &element.shape else {
            panic!("expected struct elements");
        };
        assert!(matches!(fields, Fields::Recursive { name: "TreeNode", .. }));
        assert_eq!(schema.resolve(fields).len(), 3);

        let Shape::Struct(parent) = &schema.fields[2].shape else {
            panic!("expected struct");
        };
        assert!(matches!(parent, Fields::Recursive { .. }));
        assert!(!schema.fields[2].required);

        let docs: Vec<ParameterDoc> = schema.docs();
        assert_eq!(docs[2].recursive.as_deref(), Some("TreeNode"));
    }

    #[test]
    fn test_field_rules() {
        assert_eq!(rule_of::<NoKey>(), FieldRule::MissingKey);
        assert_eq!(rule_of::<Dashed>(), FieldRule::MissingKey);
        assert_eq!(rule_of::<Hidden>(), FieldRule::Private);
        assert_eq!(rule_of::<Undocumented>(), FieldRule::MissingDescription);
        assert_eq!(rule_of::<Twice>(), FieldRule::DuplicateKey("value".into()));
        assert!(matches!(rule_of::<Timed>(), FieldRule::Unsupported(_)));
        assert!(matches!(rule_of::<StructKeyed>(), FieldRule::Unsupported(_)));
    }

    #[test]
    fn test_request_must_be_struct() {
        let err = derive_request_schema(&i64::describe(), &[], "/test", 2, false).unwrap_err();
        assert!(matches!(err, RegistrationError::RequestNotStruct { version: 2, .. }));
    }

    #[test]
    fn test_base_path() {
        let base = vec!["params".to_string()];
        let schema = derive_request_schema(&Outer::describe(), &base, "/test", 1, false).unwrap();
        assert_eq!(schema.fields[0].path, base);
        let Shape::Struct(Fields::Expanded(children)) = &schema.fields[0].shape else {
            panic!("expected struct");
        };
        assert_eq!(children[0].path, vec!["params".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_ownership_and_usage() {
        let mut usage = StructureUsage::default();
        check_ownership(
            &Outer::describe(),
            module_path!(),
            "/a",
            1,
            Location::Parameter,
            &mut usage,
        )
        .unwrap();
        check_ownership(
            &Inner::describe(),
            module_path!(),
            "/b",
            1,
            Location::ReturnValue,
            &mut usage,
        )
        .unwrap();

        let shared = usage.shared();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].type_name, "Inner");
        assert_eq!(
            shared[0].users,
            vec![("/a".to_string(), 1), ("/b".to_string(), 1)]
        );

        let err = check_ownership(
            &TreeNode::describe(),
            "somewhere::else",
            "/c",
            3,
            Location::ReturnValue,
            &mut usage,
        )
        .unwrap_err();
        assert!(err
            .to_string()
            .contains("Handler '/c' version 'V3' return value"));
    }
}
