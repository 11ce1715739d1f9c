//! Compile-time type descriptions.
//!
//! Every type that can appear in a request or response implements
//! [`Reflect`], which returns a [`TypeDesc`]: a runtime description of the
//! type's shape. Struct descriptions are produced by the
//! [`rpc_struct!`](crate::rpc_struct) macro, everything else comes from the
//! blanket implementations in this module.
//!
//! Child types are referenced through [`DescribeFn`] pointers rather than
//! materialized eagerly, so self-referential structs describe themselves
//! without recursing.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Serialize;

/// Lazily produces the description of a child type.
pub type DescribeFn = fn() -> TypeDesc;

/// A type with a runtime shape description.
pub trait Reflect: 'static {
    fn describe() -> TypeDesc;
}

/// Scalar kinds the parameter engine reads directly from a source.
///
/// Integer and float widths are in bits. Values outside the declared width
/// are rejected, never truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScalarKind {
    Bool,
    Int(u8),
    Uint(u8),
    Float(u8),
    String,
}

impl ScalarKind {
    pub fn name(&self) -> String {
        match self {
            ScalarKind::Bool => "bool".to_string(),
            ScalarKind::Int(bits) => format!("int{bits}"),
            ScalarKind::Uint(bits) => format!("uint{bits}"),
            ScalarKind::Float(bits) => format!("float{bits}"),
            ScalarKind::String => "string".to_string(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarKind::Int(_) | ScalarKind::Uint(_) | ScalarKind::Float(_)
        )
    }

    /// Whether `value` fits a signed integer of this width.
    pub fn fits_int(bits: u8, value: i64) -> bool {
        if bits >= 64 {
            return true;
        }
        let max = (1i64 << (bits - 1)) - 1;
        let min = -(1i64 << (bits - 1));
        (min..=max).contains(&value)
    }

    /// Whether `value` fits an unsigned integer of this width.
    pub fn fits_uint(bits: u8, value: u64) -> bool {
        bits >= 64 || value < (1u64 << bits)
    }
}

/// Shape of a described type.
#[derive(Debug, Clone)]
pub enum Kind {
    Scalar(ScalarKind),
    Struct(Vec<FieldDesc>),
    Sequence {
        element: DescribeFn,
        /// Fixed length for arrays, `None` for growable sequences.
        len: Option<usize>,
    },
    Map {
        key: DescribeFn,
        value: DescribeFn,
    },
    Optional(DescribeFn),
    /// Types the engine cannot read from a source (durations, raw JSON).
    Opaque,
}

/// One field of a described struct.
#[derive(Debug, Clone)]
pub struct FieldDesc {
    pub name: &'static str,
    /// Wire key; also the field's serde name.
    pub key: &'static str,
    pub description: &'static str,
    pub public: bool,
    pub ty: DescribeFn,
}

impl FieldDesc {
    pub fn new(
        name: &'static str,
        key: &'static str,
        description: &'static str,
        public: bool,
        ty: DescribeFn,
    ) -> Self {
        Self {
            name,
            key,
            description,
            public,
            ty,
        }
    }
}

/// Runtime description of a type.
#[derive(Debug, Clone)]
pub struct TypeDesc {
    pub id: TypeId,
    pub name: &'static str,
    /// Module the type is defined in. Empty for built-in types.
    pub module: &'static str,
    pub kind: Kind,
}

impl TypeDesc {
    pub fn of<T: Reflect>() -> Self {
        T::describe()
    }

    pub fn scalar<T: 'static>(kind: ScalarKind) -> Self {
        Self::builtin::<T>(Kind::Scalar(kind))
    }

    pub fn structure<T: 'static>(
        name: &'static str,
        module: &'static str,
        fields: Vec<FieldDesc>,
    ) -> Self {
        Self {
            id: TypeId::of::<T>(),
            name,
            module,
            kind: Kind::Struct(fields),
        }
    }

    pub fn sequence<T: 'static, E: Reflect>(len: Option<usize>) -> Self {
        Self::builtin::<T>(Kind::Sequence {
            element: E::describe,
            len,
        })
    }

    pub fn map<T: 'static, K: Reflect, V: Reflect>() -> Self {
        Self::builtin::<T>(Kind::Map {
            key: K::describe,
            value: V::describe,
        })
    }

    pub fn optional<T: 'static, I: Reflect>() -> Self {
        Self::builtin::<T>(Kind::Optional(I::describe))
    }

    pub fn opaque<T: 'static>() -> Self {
        Self::builtin::<T>(Kind::Opaque)
    }

    fn builtin<T: 'static>(kind: Kind) -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            module: "",
            kind,
        }
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.kind, Kind::Struct(_))
    }

    /// Short human-readable name, e.g. `Vec<Option<int64>>`.
    pub fn type_name(&self) -> String {
        match &self.kind {
            Kind::Scalar(kind) => kind.name(),
            Kind::Struct(_) | Kind::Opaque => self.name.to_string(),
            Kind::Sequence { element, len: None } => format!("Vec<{}>", element().type_name()),
            Kind::Sequence {
                element,
                len: Some(len),
            } => format!("[{}; {len}]", element().type_name()),
            Kind::Map { key, value } => {
                format!("Map<{}, {}>", key().type_name(), value().type_name())
            }
            Kind::Optional(inner) => format!("Option<{}>", inner().type_name()),
        }
    }
}

macro_rules! reflect_scalar {
    ($($ty:ty => $kind:expr),* $(,)?) => {
        $(
            impl Reflect for $ty {
                fn describe() -> TypeDesc {
                    TypeDesc::scalar::<$ty>($kind)
                }
            }
        )*
    };
}

reflect_scalar! {
    bool => ScalarKind::Bool,
    String => ScalarKind::String,
    i8 => ScalarKind::Int(8),
    i16 => ScalarKind::Int(16),
    i32 => ScalarKind::Int(32),
    i64 => ScalarKind::Int(64),
    isize => ScalarKind::Int(isize::BITS as u8),
    u8 => ScalarKind::Uint(8),
    u16 => ScalarKind::Uint(16),
    u32 => ScalarKind::Uint(32),
    u64 => ScalarKind::Uint(64),
    usize => ScalarKind::Uint(usize::BITS as u8),
    f32 => ScalarKind::Float(32),
    f64 => ScalarKind::Float(64),
}

impl<T: Reflect> Reflect for Option<T> {
    fn describe() -> TypeDesc {
        TypeDesc::optional::<Self, T>()
    }
}

/// Boxes are transparent: they exist only to make recursive types sized.
impl<T: Reflect> Reflect for Box<T> {
    fn describe() -> TypeDesc {
        T::describe()
    }
}

impl<T: Reflect> Reflect for Vec<T> {
    fn describe() -> TypeDesc {
        TypeDesc::sequence::<Self, T>(None)
    }
}

impl<T: Reflect, const N: usize> Reflect for [T; N] {
    fn describe() -> TypeDesc {
        TypeDesc::sequence::<Self, T>(Some(N))
    }
}

impl<K: Reflect, V: Reflect, S: 'static> Reflect for HashMap<K, V, S> {
    fn describe() -> TypeDesc {
        TypeDesc::map::<Self, K, V>()
    }
}

impl<K: Reflect, V: Reflect> Reflect for BTreeMap<K, V> {
    fn describe() -> TypeDesc {
        TypeDesc::map::<Self, K, V>()
    }
}

impl Reflect for Duration {
    fn describe() -> TypeDesc {
        TypeDesc::opaque::<Self>()
    }
}

impl Reflect for serde_json::Value {
    fn describe() -> TypeDesc {
        TypeDesc::opaque::<Self>()
    }
}

/// Defines a struct together with its [`Reflect`] implementation.
///
/// Every field carries a `#[param(key = "...", description = "...")]`
/// attribute. The key is the field's wire name in both directions: the
/// macro emits `#[serde(rename = key)]` for it, so the struct must derive
/// `Serialize` or `Deserialize`, and a field-level `rename` of its own is
/// rejected by serde as a duplicate. Container attributes such as
/// `rename_all` do not affect fields. Other attributes are forwarded
/// unchanged. The defining module becomes the type's owning module, which
/// registration compares against the handler's.
///
/// ```ignore
/// rpc_struct! {
///     #[derive(Debug, Serialize, Deserialize)]
///     pub struct V1Args {
///         #[param(key = "req_int", description = "Required integer argument")]
///         pub req_int: i64,
///         #[param(key = "int", description = "Unrequired integer argument")]
///         pub int: Option<i64>,
///     }
/// }
/// ```
#[macro_export]
macro_rules! rpc_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                #[param(key = $key:tt, description = $desc:literal)]
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                #[serde(rename = $key)]
                $(#[$fmeta])*
                $fvis $field: $ty,
            )*
        }

        impl $crate::schema::Reflect for $name {
            fn describe() -> $crate::schema::TypeDesc {
                $crate::schema::TypeDesc::structure::<Self>(
                    stringify!($name),
                    module_path!(),
                    vec![
                        $(
                            $crate::schema::FieldDesc::new(
                                stringify!($field),
                                $key,
                                $desc,
                                !stringify!($fvis).is_empty(),
                                <$ty as $crate::schema::Reflect>::describe,
                            ),
                        )*
                    ],
                )
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;

    crate::rpc_struct! {
        #[derive(Serialize)]
        pub struct Sample {
            #[param(key = "id", description = "Identifier")]
            pub id: u32,
            #[param(key = "hidden", description = "Not visible")]
            secret: String,
        }
    }

    #[test]
    fn test_struct_description() {
        let desc = TypeDesc::of::<Sample>();
        assert_eq!(desc.name, "Sample");
        assert_eq!(desc.module, module_path!());
        assert_eq!(desc.id, TypeId::of::<Sample>());

        let Kind::Struct(fields) = desc.kind else {
            panic!("expected struct");
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].key, "id");
        assert!(fields[0].public);
        assert_eq!(fields[1].name, "secret");
        assert!(!fields[1].public);
        assert!(matches!((fields[1].ty)().kind, Kind::Scalar(ScalarKind::String)));

        let sample = Sample {
            id: 1,
            secret: String::new(),
        };
        assert!(sample.secret.is_empty());
        assert_eq!(
            serde_json::to_value(&sample).unwrap(),
            json!({"id": 1, "hidden": ""})
        );
    }

    crate::rpc_struct! {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        #[serde(rename_all = "camelCase")]
        pub struct CamelCased {
            #[param(key = "req_int", description = "Required integer")]
            pub req_int: i64,
            #[param(key = "maxItems", description = "Upper bound")]
            pub max_items: Option<u32>,
        }
    }

    #[test]
    fn test_keys_are_serde_names() {
        let value: CamelCased = serde_json::from_value(json!({"req_int": 5, "maxItems": 2})).unwrap();
        assert_eq!(
            value,
            CamelCased {
                req_int: 5,
                max_items: Some(2),
            }
        );
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            json!({"req_int": 5, "maxItems": 2})
        );
    }

    #[test]
    fn test_builtin_type_names() {
        assert_eq!(TypeDesc::of::<Vec<Option<i64>>>().type_name(), "Vec<Option<int64>>");
        assert_eq!(TypeDesc::of::<[u8; 4]>().type_name(), "[uint8; 4]");
        assert_eq!(
            TypeDesc::of::<HashMap<String, f32>>().type_name(),
            "Map<string, float32>"
        );
        assert!(matches!(TypeDesc::of::<Duration>().kind, Kind::Opaque));
        assert!(matches!(
            TypeDesc::of::<Box<bool>>().kind,
            Kind::Scalar(ScalarKind::Bool)
        ));
    }

    #[test]
    fn test_integer_ranges() {
        assert!(ScalarKind::fits_int(8, 127));
        assert!(!ScalarKind::fits_int(8, 128));
        assert!(ScalarKind::fits_int(8, -128));
        assert!(!ScalarKind::fits_int(8, -129));
        assert!(ScalarKind::fits_int(64, i64::MIN));
        assert!(ScalarKind::fits_uint(16, 65_535));
        assert!(!ScalarKind::fits_uint(16, 65_536));
        assert!(ScalarKind::fits_uint(64, u64::MAX));
    }
}
