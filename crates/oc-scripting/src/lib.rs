//! # OpenCollection Scripting
//!
//! Sandboxed pre-request, post-response and test scripts.
//!
//! Scripts run in a fresh QuickJS context per invocation with a curated
//! global surface:
//!
//! - `bru` - variables, interpolation, `sleep`, result accessors
//! - `req` - the in-flight request (pre-request, post-response, tests)
//! - `res` - the completed response (post-response, tests)
//! - `test`, `expect`, `assert` - test registration and assertions
//! - `console` - captured and forwarded to `tracing`
//!
//! Nothing else from the host is reachable: no filesystem, network,
//! process environment or real timers.
//!
//! ## Example
//!
//! ```no_run
//! use oc_scripting::prelude::*;
//!
//! # async fn run() {
//! let runtime = ScriptRuntime::new(Default::default());
//! let mut ctx = ScriptInvocationContext::new(
//!     HookKind::Standalone,
//!     VariableStore::new(),
//!     TestResultCollector::new(),
//! );
//! let outcome = runtime
//!     .run_script(&ScriptSource::inline("bru.setVar('ready', true)"), &mut ctx)
//!     .await;
//! assert!(outcome.is_ok());
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

mod bindings;
pub mod context;
pub mod engine;
pub mod error;
pub mod interpolate;
pub mod marshal;
pub mod results;
pub mod runtime;
pub mod sandbox;
pub mod variables;

pub use context::{
    CollectionContext, ConsoleEntry, ConsoleLevel, HookKind, ScriptInvocationContext,
    ScriptRequest, ScriptResponse,
};
pub use engine::{ScriptEngine, ScriptSource};
pub use error::{MarshalError, Result, ScriptError, VariableError};
pub use interpolate::{interpolate_with, path_segments, walk_path};
pub use marshal::{HostFunction, HostValue};
pub use results::{
    summarize, AssertionResult, HasStatus, ResultStatus, ResultSummary, TestResult,
    TestResultCollector,
};
pub use runtime::{ScriptOutcome, ScriptRuntime};
pub use sandbox::SandboxExecutor;
pub use variables::{is_valid_name, VariableScope, VariableStore};

/// Prelude with commonly used types
pub mod prelude {
    pub use crate::context::{HookKind, ScriptInvocationContext, ScriptRequest, ScriptResponse};
    pub use crate::engine::{ScriptEngine, ScriptSource};
    pub use crate::error::{Result, ScriptError};
    pub use crate::results::{TestResult, TestResultCollector};
    pub use crate::runtime::{ScriptOutcome, ScriptRuntime};
    pub use crate::variables::{VariableScope, VariableStore};
}
