//! # OpenCollection Runner
//!
//! Runs one request of an OpenCollection through its full lifecycle:
//! pre-request scripts, interpolation, transport, post-response scripts,
//! declarative assertions and tests.
//!
//! ## Example
//!
//! ```no_run
//! use oc_runner::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run(collection: oc_core::OpenCollection) {
//! let runner = RequestRunner::new(&Default::default(), Arc::new(HttpTransport::new()));
//! if let Some(item) = collection.find_request("list pets") {
//!     let result = runner.run(RunRequest::new(&collection, item)).await;
//!     println!("passed: {}", result.passed());
//! }
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod assertions;
pub mod interpolator;
pub mod runner;
pub mod transport;

pub use assertions::{AssertionEvaluator, Operator};
pub use runner::{RequestRunner, RunRequest, RunResult, TimelineEntry};
pub use transport::{HttpTransport, MockTransport, PreparedRequest, Transport};

/// Prelude with commonly used types
pub mod prelude {
    pub use crate::runner::{RequestRunner, RunRequest, RunResult};
    pub use crate::transport::{HttpTransport, MockTransport, Transport};
}
