//! Handler module - versioned handlers and their registry.
//!
//! Provides:
//! - [`Handler`] / [`MethodSet`] - how a handler declares its versions
//! - [`RegistryBuilder`] / [`Registry`] - validation and lookup by route
//! - [`CallContext`] - request-scoped state passed to every version method
//! - [`ErrorSlot`] / [`errors_var!`](crate::errors_var) - declared errors
//!
//! # Example
//!
//! ```ignore
//! use versioned_rpc::handler::{CallContext, Handler, MethodSet, RegistryBuilder, RegistryConfig};
//!
//! struct Users;
//!
//! impl Users {
//!     async fn v1(self: Arc<Self>, ctx: CallContext, args: V1Args) -> Result<V1Result, MethodError> {
//!         Ok(V1Result { name: format!("user {}", args.id) })
//!     }
//! }
//!
//! impl Handler for Users {
//!     fn caption(&self) -> &str { "Users" }
//!     fn description(&self) -> &str { "User lookup" }
//!     fn module_path(&self) -> &'static str { module_path!() }
//!     fn methods(methods: &mut MethodSet<Self>) {
//!         methods.version("V1", Users::v1).marker("V1UseCache");
//!     }
//! }
//!
//! let mut builder = RegistryBuilder::new(RegistryConfig::new("app::handlers"));
//! builder.register(Users)?;
//! let registry = builder.finish()?;
//! ```

mod context;
mod errors;
mod methods;
mod registry;

pub use context::{CallContext, DebugInfo};
pub use errors::{ErrorSlot, ErrorsVar};
pub(crate) use methods::Outcome;
pub use methods::{BoxFuture, Handler, MethodDescriptor, MethodSet};
pub use registry::{
    ExtraData, HandlerEntity, Registry, RegistrationObserver, RegistryBuilder, RegistryConfig,
    SharedStructurePolicy, Version,
};
