//! Handler contract and method declarations.
//!
//! A handler declares its versions by filling a [`MethodSet`]. Each
//! version method is erased behind [`ErasedMethod`] so the registry can
//! hold versions with different request and response types side by side.

use std::any::{type_name, Any};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{CallContext, ErrorsVar};
use crate::error::{MethodError, ParameterError};
use crate::schema::{DescribeFn, Reflect, TypeDesc};

/// Boxed future for method results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A versioned RPC handler.
///
/// Implementations live in a module under the registry's handlers root; the
/// module path decides the handler's URL path.
///
/// ```ignore
/// impl Handler for Users {
///     fn caption(&self) -> &str { "Users" }
///     fn description(&self) -> &str { "User lookup" }
///     fn module_path(&self) -> &'static str { module_path!() }
///
///     fn methods(methods: &mut MethodSet<Self>) {
///         methods
///             .version("V1", Users::v1)
///             .marker("V1UseCache");
///     }
/// }
/// ```
pub trait Handler: Send + Sync + Sized + 'static {
    /// Short title.
    fn caption(&self) -> &str;
    fn description(&self) -> &str;
    /// Module the handler is defined in, normally `module_path!()`.
    fn module_path(&self) -> &'static str;
    /// Declare versions and their companions.
    fn methods(methods: &mut MethodSet<Self>);
}

/// Static facts about one declared version, passed to the registration
/// observer.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub handler_path: String,
    /// Declared method name, e.g. `V2`.
    pub name: String,
    pub version: u32,
    pub request: TypeDesc,
    pub response: TypeDesc,
    /// Type name of the extra argument, if the method takes one.
    pub extra: Option<&'static str>,
}

/// What a version method produced.
pub(crate) enum Outcome {
    Success(Value),
    Failed(MethodError),
    Unserializable(serde_json::Error),
}

/// Type-erased version method bound to its handler instance.
pub(crate) trait ErasedMethod: Send + Sync {
    /// Build the typed request from collected parameters.
    fn decode(&self, params: Value) -> Result<Box<dyn Any + Send>, ParameterError>;

    fn invoke(&self, ctx: CallContext, request: Box<dyn Any + Send>) -> BoxFuture<'static, Outcome>;
}

type Invoker<H, Req, Res> =
    Arc<dyn Fn(Arc<H>, CallContext, Req) -> BoxFuture<'static, Result<Res, MethodError>> + Send + Sync>;

struct TypedMethod<H, Req, Res> {
    handler: Arc<H>,
    invoker: Invoker<H, Req, Res>,
}

impl<H, Req, Res> ErasedMethod for TypedMethod<H, Req, Res>
where
    H: Handler,
    Req: DeserializeOwned + Send + 'static,
    Res: Serialize + Send + 'static,
{
    fn decode(&self, params: Value) -> Result<Box<dyn Any + Send>, ParameterError> {
        let request: Req =
            serde_json::from_value(params).map_err(|e| ParameterError::Decode(e.to_string()))?;
        Ok(Box::new(request))
    }

    fn invoke(&self, ctx: CallContext, request: Box<dyn Any + Send>) -> BoxFuture<'static, Outcome> {
        let request = match request.downcast::<Req>() {
            Ok(request) => *request,
            Err(_) => {
                return Box::pin(async {
                    Outcome::Failed(MethodError::msg(format!(
                        "request is not a `{}`",
                        type_name::<Req>()
                    )))
                })
            }
        };

        let fut = (self.invoker)(Arc::clone(&self.handler), ctx, request);
        Box::pin(async move {
            match fut.await {
                Ok(response) => match serde_json::to_value(&response) {
                    Ok(value) => Outcome::Success(value),
                    Err(e) => Outcome::Unserializable(e),
                },
                Err(err) => Outcome::Failed(err),
            }
        })
    }
}

pub(crate) struct VersionEntry<H> {
    pub(crate) name: String,
    pub(crate) request: DescribeFn,
    pub(crate) response: DescribeFn,
    pub(crate) extra: Option<&'static str>,
    pub(crate) bind: Box<dyn Fn(Arc<H>) -> Arc<dyn ErasedMethod>>,
}

pub(crate) struct ErrorsEntry<H> {
    pub(crate) name: String,
    pub(crate) accessor: fn(&H) -> &dyn ErrorsVar,
}

/// Collects a handler's version methods and companion declarations.
pub struct MethodSet<H> {
    pub(crate) versions: Vec<VersionEntry<H>>,
    pub(crate) markers: Vec<String>,
    pub(crate) errors: Vec<ErrorsEntry<H>>,
}

impl<H: Handler> MethodSet<H> {
    pub(crate) fn new() -> Self {
        Self {
            versions: Vec::new(),
            markers: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Declare a version method named `V<n>`.
    pub fn version<F, Fut, Req, Res>(&mut self, name: &str, method: F) -> &mut Self
    where
        F: Fn(Arc<H>, CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, MethodError>> + Send + 'static,
        Req: Reflect + DeserializeOwned + Send + 'static,
        Res: Reflect + Serialize + Send + 'static,
    {
        let invoker: Invoker<H, Req, Res> = Arc::new(
            move |handler: Arc<H>,
                  ctx: CallContext,
                  request: Req|
                  -> BoxFuture<'static, Result<Res, MethodError>> {
                Box::pin(method(handler, ctx, request))
            },
        );
        self.push_version(name, None, invoker);
        self
    }

    /// Declare a version method taking an extra argument.
    ///
    /// The extra value is read from the call context's extensions at call
    /// time; a call without it fails as an unknown error.
    pub fn version_with_extra<F, Fut, Req, Res, X>(&mut self, name: &str, method: F) -> &mut Self
    where
        F: Fn(Arc<H>, CallContext, Req, X) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, MethodError>> + Send + 'static,
        Req: Reflect + DeserializeOwned + Send + 'static,
        Res: Reflect + Serialize + Send + 'static,
        X: Clone + Send + Sync + 'static,
    {
        let invoker: Invoker<H, Req, Res> = Arc::new(
            move |handler: Arc<H>,
                  ctx: CallContext,
                  request: Req|
                  -> BoxFuture<'static, Result<Res, MethodError>> {
                match ctx.extension::<X>() {
                    Some(extra) => Box::pin(method(handler, ctx, request, extra)),
                    None => Box::pin(std::future::ready(Err(MethodError::msg(format!(
                        "extra argument `{}` is missing from the call context",
                        type_name::<X>()
                    ))))),
                }
            },
        );
        self.push_version(name, Some(type_name::<X>()), invoker);
        self
    }

    /// Declare a companion marker: `V<n>UseCache` or `V<n>ConsumeFlatRequest`.
    pub fn marker(&mut self, name: &str) -> &mut Self {
        self.markers.push(name.to_string());
        self
    }

    /// Declare the error set of a version, named `V<n>ErrorsVar`.
    pub fn errors_var(&mut self, name: &str, accessor: fn(&H) -> &dyn ErrorsVar) -> &mut Self {
        self.errors.push(ErrorsEntry {
            name: name.to_string(),
            accessor,
        });
        self
    }

    fn push_version<Req, Res>(
        &mut self,
        name: &str,
        extra: Option<&'static str>,
        invoker: Invoker<H, Req, Res>,
    ) where
        Req: Reflect + DeserializeOwned + Send + 'static,
        Res: Reflect + Serialize + Send + 'static,
    {
        self.versions.push(VersionEntry {
            name: name.to_string(),
            request: Req::describe,
            response: Res::describe,
            extra,
            bind: Box::new(move |handler: Arc<H>| -> Arc<dyn ErasedMethod> {
                Arc::new(TypedMethod {
                    handler,
                    invoker: Arc::clone(&invoker),
                })
            }),
        });
    }
}
