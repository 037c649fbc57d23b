//! Script hook orchestration
//!
//! [`ScriptRuntime`] is the boundary the runner talks to: it never returns
//! an error, only a [`ScriptOutcome`] carrying the script's result next to
//! whatever console output it produced.

use crate::context::{ConsoleEntry, HookKind, ScriptInvocationContext};
use crate::engine::{ScriptEngine, ScriptSource};
use crate::error::ScriptError;
use crate::sandbox::SandboxExecutor;
use oc_config::ScriptingConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Result of one hook invocation
#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    /// Hook that ran
    pub hook: HookKind,
    /// Script name
    pub script: String,
    /// `Ok` when the script settled normally
    pub result: Result<(), ScriptError>,
    /// Console output of this invocation
    pub console: Vec<ConsoleEntry>,
    /// Wall-clock duration
    pub duration: Duration,
}

impl ScriptOutcome {
    /// Whether the script completed without error
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// The script error, if any
    pub fn error(&self) -> Option<&ScriptError> {
        self.result.as_ref().err()
    }
}

/// Runs hook scripts on a [`ScriptEngine`]
#[derive(Debug, Clone)]
pub struct ScriptRuntime {
    engine: Arc<dyn ScriptEngine>,
}

impl ScriptRuntime {
    /// Runtime backed by the QuickJS sandbox
    pub fn new(config: ScriptingConfig) -> Self {
        Self::with_engine(Arc::new(SandboxExecutor::new(config)))
    }

    /// Runtime backed by a custom engine
    pub fn with_engine(engine: Arc<dyn ScriptEngine>) -> Self {
        Self { engine }
    }

    /// Run one script against `ctx`.
    ///
    /// Blank scripts complete immediately without creating a sandbox.
    pub async fn run_script(
        &self,
        source: &ScriptSource,
        ctx: &mut ScriptInvocationContext,
    ) -> ScriptOutcome {
        let script = source.name();
        let console_start = ctx.console.len();
        let start = Instant::now();

        let result = match source.get_code().await {
            _ if ctx.cancel.is_cancelled() => Err(ScriptError::Cancelled),
            Ok(code) if code.trim().is_empty() => Ok(()),
            Ok(code) => {
                debug!(script = %script, hook = %ctx.hook, engine = self.engine.name(), "Running script");
                self.engine.execute(&code, ctx).await
            }
            Err(e) => Err(e),
        };

        let duration = start.elapsed();
        match &result {
            Ok(()) => trace!(
                script = %script,
                hook = %ctx.hook,
                elapsed_us = duration.as_micros() as u64,
                "Script completed"
            ),
            Err(e) => warn!(script = %script, hook = %ctx.hook, error = %e, "Script failed"),
        }

        ScriptOutcome {
            hook: ctx.hook,
            script,
            result,
            console: ctx.console[console_start..].to_vec(),
            duration,
        }
    }

    /// Invoke a `req.onFail` callback with `{message}`
    pub async fn run_on_fail(
        &self,
        callback: &str,
        message: &str,
        ctx: &mut ScriptInvocationContext,
    ) -> ScriptOutcome {
        let error = serde_json::json!({ "message": message });
        let code = format!("await ({})({});", callback, error);
        self.run_script(&ScriptSource::inline_named(code, "onFail"), ctx)
            .await
    }
}
