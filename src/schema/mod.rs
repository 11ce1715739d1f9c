//! Schema module - type descriptions and request introspection.
//!
//! Provides:
//! - [`Reflect`] / [`TypeDesc`] - runtime shape descriptions of Rust types
//! - [`rpc_struct!`](crate::rpc_struct) - defines a request or response struct
//!   together with its description
//! - [`derive_request_schema`] - turns a request type into a [`RequestSchema`]
//!   the parameter engine walks
//!
//! # Example
//!
//! ```ignore
//! use versioned_rpc::rpc_struct;
//! use versioned_rpc::schema::{derive_request_schema, Reflect};
//!
//! rpc_struct! {
//!     #[derive(Debug, serde::Deserialize)]
//!     pub struct V1Args {
//!         #[param(key = "id", description = "User identifier")]
//!         pub id: u64,
//!     }
//! }
//!
//! let schema = derive_request_schema(&V1Args::describe(), &[], "/users", 1, false)?;
//! assert!(schema.flat);
//! ```

mod introspect;
mod model;
mod reflect;

pub(crate) use introspect::{check_ownership, StructureUsage};
pub use introspect::derive_request_schema;
pub use model::{Element, Fields, Parameter, ParameterDoc, RequestSchema, Shape};
pub use reflect::{DescribeFn, FieldDesc, Kind, Reflect, ScalarKind, TypeDesc};
