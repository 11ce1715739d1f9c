//! # versioned-rpc
//!
//! Versioned RPC handler framework.
//!
//! Handlers declare numbered versions (`V1`, `V2`, ...) of one operation.
//! At registration every version's request type is introspected into a
//! parameter schema and validated, so a malformed handler fails at startup
//! rather than on its first call. At call time the dispatcher reads the
//! request from a transport-neutral parameter source, optionally serves it
//! from a response cache, and classifies the outcome.
//!
//! ## Architecture
//!
//! - **schema**: request type reflection and parameter schema derivation
//! - **handler**: handler contract, call context, registry
//! - **params**: parameter sources (form, JSON body, JSON-RPC) and the
//!   unmarshal engine
//! - **cache** / **codec**: per-key locked response cache, cache keys and
//!   cached content encoding
//! - **dispatch**: route lookup, cache flow, error and panic classification
//!
//! ## Example
//!
//! ```ignore
//! use versioned_rpc::{CallContext, Dispatcher, FormSource, RegistryBuilder, RegistryConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut builder = RegistryBuilder::new(RegistryConfig::new("app::handlers"));
//!     builder.register(Users::default())?;
//!     let dispatcher = Dispatcher::builder(Arc::new(builder.finish()?)).build();
//!
//!     let mut source = FormSource::from_query("id=7");
//!     let response = dispatcher
//!         .dispatch(&CallContext::new(), "/users/v1/", &mut source)
//!         .await?;
//!     println!("{}", response.body());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod params;
pub mod schema;

pub use cache::{Cache, CacheEntry, MapCache};
pub use dispatch::{DispatchCallbacks, Dispatcher, Response};
pub use error::{CallError, ErrorType, HandlerError, MethodError, RegistrationError};
pub use handler::{
    CallContext, ErrorSlot, ErrorsVar, Handler, MethodSet, Registry, RegistryBuilder,
    RegistryConfig, Version,
};
pub use params::{FormSource, JsonSource, ParameterSource, RpcSource};
pub use schema::Reflect;
