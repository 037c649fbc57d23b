//! # OpenCollection Core
//!
//! Core types shared by the OpenCollection script runtime and request runner.
//!
//! This crate provides the data shapes the runner consumes:
//! - Collections, folders and request items
//! - Environments and typed variable definitions
//! - The closed [`VariableValue`] variant used by every variable scope
//! - Transport responses
//! - The top-level error type

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod collection;
pub mod environment;
pub mod error;
pub mod request;
pub mod response;
pub mod value;

pub use collection::{
    CollectionConfig, Folder, Item, OpenCollection, RequestDefaults, RequestSettings, ResolvedItem,
};
pub use environment::{
    resolve_variables, Environment, TypedValue, ValueVariant, Variable, VariableValueSpec,
    VariableValueType,
};
pub use error::{Error, Result};
pub use request::{
    Assertion, Auth, HttpHeader, HttpRequest, HttpRequestBody, HttpRequestParam,
    ApiKeyPlacement, FileBodyEntry, FormEntry, HttpRequestSettings, ParamKind, Scripts,
};
pub use response::{canonical_reason, decode_body, Headers, Response};
pub use value::{VariableValue, MAX_SAFE_INTEGER};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::collection::{Folder, Item, OpenCollection};
    pub use crate::environment::{Environment, Variable};
    pub use crate::error::{Error, Result};
    pub use crate::request::{HttpRequest, Scripts};
    pub use crate::response::Response;
    pub use crate::value::VariableValue;
}
