//! Error types for versioned-rpc.
//!
//! Three families live here:
//!
//! - [`RegistrationError`] - startup-time validation failures. They always
//!   name the handler path, the version and the rule that was broken.
//! - [`ParameterError`] - a request could not be unmarshaled from its source.
//! - [`CallError`] - the classified outcome of one dispatch, carrying an
//!   [`ErrorType`] discriminant for transports to map onto their own status
//!   codes.
//!
//! Handler methods themselves return [`MethodError`], which is either a
//! declared [`HandlerError`] or an arbitrary failure.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Result type alias defaulting to [`CallError`].
pub type Result<T, E = CallError> = std::result::Result<T, E>;

/// What a parameter source expected to find under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Bool,
    Int,
    Uint,
    Float,
    String,
    Slice,
    Map,
    Object,
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Expected::Bool => "Bool",
            Expected::Int => "Int",
            Expected::Uint => "Uint",
            Expected::Float => "Float",
            Expected::String => "String",
            Expected::Slice => "Slice",
            Expected::Map => "Map",
            Expected::Object => "Object",
        };
        f.write_str(name)
    }
}

/// A request failed to unmarshal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    /// The source could not be parsed at all (bad JSON, oversized body, ...).
    #[error("malformed parameters: {0}")]
    Malformed(String),

    /// A required field is absent from the source.
    #[error("missing required field `{0}`")]
    MissingRequired(String),

    /// A value exists but has the wrong type or is out of range.
    #[error("wrong value of param \"{key}\", expected {expected}")]
    WrongValue { key: String, expected: Expected },

    /// The source variant cannot represent this shape (e.g. maps in a form).
    #[error("{0} are not supported by this parameter source")]
    NotSupported(&'static str),

    /// The collected parameters did not deserialize into the request type.
    #[error("cannot build request: {0}")]
    Decode(String),
}

impl ParameterError {
    pub(crate) fn wrong(key: &str, expected: Expected) -> Self {
        ParameterError::WrongValue {
            key: key.to_string(),
            expected,
        }
    }
}

/// Which side of a method signature a type was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Parameter,
    ReturnValue,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Parameter => f.write_str("parameter"),
            Location::ReturnValue => f.write_str("return value"),
        }
    }
}

/// Rule broken by a single request field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRule {
    /// No wire key was declared.
    MissingKey,
    /// The field is not `pub`.
    Private,
    /// The description is empty.
    MissingDescription,
    /// Another field of the same struct uses this key.
    DuplicateKey(String),
    /// The field's type cannot be read from a parameter source.
    Unsupported(String),
    /// A struct field in a request that must stay flat.
    DeepNesting,
}

impl fmt::Display for FieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRule::MissingKey => f.write_str("tag \"key\" must be specified"),
            FieldRule::Private => f.write_str("field is private"),
            FieldRule::MissingDescription => f.write_str("field does not have description"),
            FieldRule::DuplicateKey(key) => write!(f, "key `{key}` is used by another field"),
            FieldRule::Unsupported(ty) => write!(f, "type `{ty}` is not supported"),
            FieldRule::DeepNesting => f.write_str("deep nesting not supported in a flat request"),
        }
    }
}

/// One struct type referenced by more than one handler version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedStructure {
    pub type_name: String,
    /// `(handler path, version number)` pairs, sorted.
    pub users: Vec<(String, u32)>,
}

impl fmt::Display for SharedStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` is used by", self.type_name)?;
        for (i, (handler, version)) in self.users.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{handler} V{version}")?;
        }
        Ok(())
    }
}

fn list_shared(shared: &[SharedStructure]) -> String {
    shared
        .iter()
        .map(|s| format!("\t{s}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Handler registration failed. Fatal by convention.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    /// The handler module is not under the configured handlers root.
    #[error("handler `{handler}` is in invalid path `{module}` (handlers root is `{root}`)")]
    InvalidPath {
        handler: String,
        module: String,
        root: String,
    },

    /// Another handler already serves the same path.
    #[error("handler with path `{0}` already exists")]
    DuplicatePath(String),

    /// A version was declared under a name other than `V<n>`.
    #[error("handler {handler}: method `{name}` is not a version name (expected V<n>)")]
    InvalidMethodName { handler: String, name: String },

    /// The same version or companion name was declared twice.
    #[error("handler {handler}: method `{name}` is declared twice")]
    DuplicateMethod { handler: String, name: String },

    /// Version numbers do not form a contiguous run starting at 1.
    #[error("you have missed version number {missing} of handler {handler}")]
    MissingVersion { handler: String, missing: u32 },

    /// A companion name matches no known `V<n><Suffix>` form.
    #[error("handler {handler}: unknown companion method `{name}`")]
    UnknownCompanion { handler: String, name: String },

    /// A companion refers to a version the handler does not have.
    #[error("handler {handler}: companion method `{name}` refers to missing version {version}")]
    CompanionWithoutVersion {
        handler: String,
        name: String,
        version: u32,
    },

    /// The version's request type is not a struct.
    #[error("type of opts for version number {version} of handler {handler} must be a struct, got `{type_name}`")]
    RequestNotStruct {
        handler: String,
        version: u32,
        type_name: String,
    },

    /// A request field breaks a [`FieldRule`].
    #[error("{rule} for parameter {field:?} (handler {handler}, version number {version})")]
    Parameter {
        handler: String,
        version: u32,
        field: String,
        rule: FieldRule,
    },

    /// A struct used by a version is defined outside the handler's module.
    #[error("Handler '{handler}' version 'V{version}' {location}: structure `{type_name}` must be fully defined in the same package")]
    ForeignStructure {
        handler: String,
        version: u32,
        location: Location,
        type_name: String,
    },

    /// A declared error has an empty message.
    #[error("V{version}ErrorsVar of handler {handler} is invalid: field `{field}` has not any error text")]
    MissingErrorText {
        handler: String,
        version: u32,
        field: String,
    },

    /// Struct types referenced by more than one handler.
    #[error("shared structures across handlers are forbidden:\n{}", list_shared(.0))]
    SharedStructures(Vec<SharedStructure>),
}

/// A declared application error, returned by handler code by reference to
/// its bound [`ErrorSlot`](crate::handler::ErrorSlot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Application error code (the declaring field's name).
    pub code: String,
    /// User-facing message.
    pub message: String,
}

impl HandlerError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Error returned by a handler method.
#[derive(Debug, Error)]
pub enum MethodError {
    /// One of the version's declared errors.
    #[error(transparent)]
    Declared(#[from] HandlerError),

    /// Anything else. Classified as an unknown error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MethodError {
    /// Wrap an arbitrary error.
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        MethodError::Other(anyhow::Error::new(err))
    }

    /// Build an unstructured error from a message.
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        MethodError::Other(anyhow::Error::msg(message))
    }
}

/// Codec failures (cache keys, cache content, response decoding).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

/// Discriminant of a [`CallError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// The request could not be read from the parameter source.
    Parameters,
    /// The handler returned a declared [`HandlerError`].
    ReturnedFromCall,
    /// The handler method has an unusable signature. Methods registered
    /// through [`MethodSet`](crate::handler::MethodSet) are typed, so only
    /// custom dispatch layers report this.
    InvalidMethod,
    /// The response could not be encoded.
    WriteResponse,
    /// The handler returned an undeclared error.
    Unknown,
    /// The handler panicked.
    Panic,
    /// No handler serves the route.
    NotFound,
}

/// Classified outcome of a failed dispatch.
#[derive(Debug, Error)]
pub enum CallError {
    /// Reading the request failed.
    #[error("invalid parameters: {0}")]
    Parameters(#[from] ParameterError),

    /// Declared error returned by the handler.
    #[error("handler returned error {}: {}", .0.code, .0.message)]
    Returned(HandlerError),

    /// Undeclared error returned by the handler.
    #[error("handler failed: {0:#}")]
    Unknown(anyhow::Error),

    /// The handler panicked; `trace` is the captured backtrace.
    #[error("panic in handler: {message}")]
    Panic { message: String, trace: String },

    /// The handler method has an unusable signature.
    #[error("invalid method: {0}")]
    InvalidMethod(String),

    /// No handler serves the route.
    #[error("handler not found for route `{0}`")]
    NotFound(String),

    /// Encoding the response failed.
    #[error("cannot write response: {0}")]
    WriteResponse(#[source] CodecError),
}

impl CallError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            CallError::Parameters(_) => ErrorType::Parameters,
            CallError::Returned(_) => ErrorType::ReturnedFromCall,
            CallError::Unknown(_) => ErrorType::Unknown,
            CallError::Panic { .. } => ErrorType::Panic,
            CallError::InvalidMethod(_) => ErrorType::InvalidMethod,
            CallError::NotFound(_) => ErrorType::NotFound,
            CallError::WriteResponse(_) => ErrorType::WriteResponse,
        }
    }

    /// Message suitable for the caller. Declared errors expose their own
    /// message, everything else its display text; whether a transport shows
    /// the latter is its own policy.
    pub fn user_message(&self) -> String {
        match self {
            CallError::Returned(err) => err.message.clone(),
            other => other.to_string(),
        }
    }

    /// Application error code, present only for declared errors.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            CallError::Returned(err) => Some(&err.code),
            _ => None,
        }
    }
}
