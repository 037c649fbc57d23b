//! QuickJS sandbox executor
//!
//! Every invocation gets a fresh runtime and context, torn down before
//! `execute` returns. The runtime lives on a blocking thread; the async
//! side only waits for it, so a busy script never stalls the executor.
//!
//! Inside the thread the script is wrapped in an async function and
//! launched through the prelude. The loop then alternates between
//! draining the job queue and sleeping until the next `bru.sleep` timer,
//! until the prelude reports back through `host.settle`. An interrupt
//! handler stops runaway code once the deadline passes or the caller
//! cancels.
//!
//! QuickJS cannot free a runtime after a pending job was interrupted, so
//! such a runtime is leaked instead of dropped. The memory limit bounds
//! what one leak can cost.

use crate::bindings::{host_object, info_object, Channel, Settlement};
use crate::context::{ScriptInvocationContext, ScriptRequest, ScriptResponse};
use crate::error::{Result, ScriptError};
use crate::marshal::{to_sandbox, HostValue};
use oc_config::ScriptingConfig;
use rquickjs::{Coerced, Context, Ctx, Exception, FromJs, Function, Runtime};
use serde::de::DeserializeOwned;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

const PRELUDE: &str = include_str!("prelude.js");

/// Longest uninterrupted wait while idle between timers
const POLL_SLICE: Duration = Duration::from_millis(10);

/// Extra time granted to the worker thread past the script deadline
const GRACE: Duration = Duration::from_millis(500);

/// Sandbox lifecycle, for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    ContextCreated,
    BindingsInjected,
    Evaluating,
    Resolved,
    Rejected,
    Disposed,
}

/// Runs scripts in an isolated QuickJS sandbox
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    config: ScriptingConfig,
}

impl SandboxExecutor {
    /// Create an executor with the given limits
    pub fn new(config: ScriptingConfig) -> Self {
        Self { config }
    }

    /// Limits in effect
    pub fn config(&self) -> &ScriptingConfig {
        &self.config
    }

    /// Run `script` against `ctx`.
    ///
    /// `req`/`res` changes are written back into the context even when the
    /// script fails; console output is appended to `ctx.console`.
    pub async fn execute(&self, script: &str, ctx: &mut ScriptInvocationContext) -> Result<()> {
        let channel = Arc::new(Channel::new(ctx.hook, self.config.max_sleep));
        let cancelled = Arc::new(AtomicBool::new(false));
        let timeout = self.config.timeout;

        let job = Job {
            source: script.to_string(),
            host: host_object(ctx, &channel),
            info: info_object(ctx),
            request: facade_value(ctx.request.as_ref())?,
            response: facade_value(ctx.response.as_ref())?,
            channel: Arc::clone(&channel),
            cancelled: Arc::clone(&cancelled),
            deadline: Instant::now() + timeout,
            timeout_ms: timeout.as_millis() as u64,
            memory_limit: self.config.memory_limit,
            max_stack_size: self.config.max_stack_size,
            hook: ctx.hook,
            job_interrupted: Cell::new(false),
        };

        debug!(hook = %ctx.hook, timeout_ms = job.timeout_ms, "Executing script");
        let mut handle = tokio::task::spawn_blocking(move || job.run());

        let joined = tokio::select! {
            joined = &mut handle => Some(joined),
            _ = ctx.cancel.cancelled() => {
                cancelled.store(true, Ordering::SeqCst);
                None
            }
            _ = tokio::time::sleep(timeout + GRACE) => {
                warn!(hook = %ctx.hook, "Script worker did not stop at its deadline");
                cancelled.store(true, Ordering::SeqCst);
                Some(Ok(Err(ScriptError::timeout(timeout.as_millis() as u64))))
            }
        };
        let joined = match joined {
            Some(joined) => joined,
            None => handle.await,
        };

        ctx.console.extend(channel.take_console());

        let settlement = joined
            .map_err(|e| ScriptError::execution(format!("Script worker failed: {}", e)))??;
        write_back(ctx, &settlement.snapshot);

        match settlement.error {
            Some(message) => Err(ScriptError::execution(message)),
            None => Ok(()),
        }
    }
}

fn facade_value<T: serde::Serialize>(facade: Option<&T>) -> Result<HostValue> {
    match facade {
        Some(facade) => serde_json::to_value(facade)
            .map(HostValue::from)
            .map_err(|e| ScriptError::execution(e.to_string())),
        None => Ok(HostValue::Null),
    }
}

fn read_facade<T: DeserializeOwned>(snapshot: &HostValue, key: &str) -> Option<T> {
    let value = snapshot.get(key).filter(|value| !value.is_nullish())?;
    let json = value.clone().into_json().ok()?;
    match serde_json::from_value(json) {
        Ok(facade) => Some(facade),
        Err(e) => {
            warn!(facade = key, error = %e, "Ignoring malformed script changes");
            None
        }
    }
}

fn write_back(ctx: &mut ScriptInvocationContext, snapshot: &HostValue) {
    if ctx.request.is_some() {
        if let Some(request) = read_facade::<ScriptRequest>(snapshot, "request") {
            ctx.request = Some(request);
        }
    }
    if let Some(current) = ctx.response.as_mut() {
        if let Some(mut response) = read_facade::<ScriptResponse>(snapshot, "response") {
            response.raw = std::mem::take(&mut current.raw);
            *current = response;
        }
    }
}

/// Everything the worker thread needs
struct Job {
    source: String,
    host: HostValue,
    info: HostValue,
    request: HostValue,
    response: HostValue,
    channel: Arc<Channel>,
    cancelled: Arc<AtomicBool>,
    deadline: Instant,
    timeout_ms: u64,
    memory_limit: usize,
    max_stack_size: usize,
    hook: crate::context::HookKind,
    /// Set when the interrupt handler stopped a pending job
    job_interrupted: Cell<bool>,
}

impl Job {
    fn phase(&self, phase: Phase) {
        trace!(hook = %self.hook, ?phase, "Sandbox phase");
    }

    /// Why the script must stop, if it must
    fn interruption(&self) -> Option<ScriptError> {
        if self.cancelled.load(Ordering::SeqCst) {
            Some(ScriptError::Cancelled)
        } else if Instant::now() >= self.deadline {
            Some(ScriptError::timeout(self.timeout_ms))
        } else {
            None
        }
    }

    fn run(self) -> Result<Settlement> {
        let runtime = Runtime::new().map_err(|e| ScriptError::init(e.to_string()))?;
        runtime.set_memory_limit(self.memory_limit);
        runtime.set_max_stack_size(self.max_stack_size);

        let cancelled = Arc::clone(&self.cancelled);
        let deadline = self.deadline;
        runtime.set_interrupt_handler(Some(Box::new(move || {
            cancelled.load(Ordering::Relaxed) || Instant::now() >= deadline
        })));

        let context = Context::full(&runtime).map_err(|e| ScriptError::init(e.to_string()))?;
        self.phase(Phase::ContextCreated);

        let outcome = context
            .with(|ctx| self.launch(&ctx))
            .and_then(|()| self.pump(&runtime, &context));

        self.phase(if matches!(&outcome, Ok(s) if s.error.is_none()) {
            Phase::Resolved
        } else {
            Phase::Rejected
        });

        if self.job_interrupted.get() {
            warn!(hook = %self.hook, "Leaking sandbox runtime interrupted inside a job");
            std::mem::forget(context);
            std::mem::forget(runtime);
        } else {
            drop(context);
            drop(runtime);
        }
        self.phase(Phase::Disposed);
        outcome
    }

    /// Install the globals and start the script
    fn launch(&self, ctx: &Ctx<'_>) -> Result<()> {
        let factory: Function<'_> = ctx
            .eval(PRELUDE)
            .map_err(|e| ScriptError::init(exception_message(ctx, e)))?;

        let launch: Function<'_> = factory
            .call((
                to_sandbox(ctx, &self.host)?,
                to_sandbox(ctx, &self.info)?,
                to_sandbox(ctx, &self.request)?,
                to_sandbox(ctx, &self.response)?,
            ))
            .map_err(|e| self.engine_error(ctx, e, ScriptError::init))?;
        self.phase(Phase::BindingsInjected);

        let main: Function<'_> = ctx
            .eval(format!("(async () => {{\n{}\n}})", self.source))
            .map_err(|e| self.engine_error(ctx, e, ScriptError::compilation))?;

        self.phase(Phase::Evaluating);
        launch
            .call::<_, ()>((main,))
            .map_err(|e| self.engine_error(ctx, e, ScriptError::execution))
    }

    /// Drive jobs and timers until the script settles
    fn pump(&self, runtime: &Runtime, context: &Context) -> Result<Settlement> {
        loop {
            // An interrupt surfaces in script code as a rejection, so the
            // flags win over whatever the prelude reported. No job may start
            // once they are set.
            if let Some(err) = self.interruption() {
                return Err(err);
            }

            loop {
                match runtime.execute_pending_job() {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(exception) => {
                        if let Some(err) = self.interruption() {
                            self.job_interrupted.set(true);
                            return Err(err);
                        }
                        return Err(exception.0.with(|ctx| {
                            ScriptError::execution(exception_message(
                                &ctx,
                                rquickjs::Error::Exception,
                            ))
                        }));
                    }
                }
            }

            if let Some(err) = self.interruption() {
                return Err(err);
            }
            if let Some(settlement) = self.channel.take_settlement() {
                return Ok(settlement);
            }

            let wake_at = self
                .channel
                .next_deadline()
                .map_or(self.deadline, |at| at.min(self.deadline));
            self.wait_until(wake_at);
            if let Some(err) = self.interruption() {
                return Err(err);
            }

            let due = self.channel.take_due(Instant::now());
            if due.is_empty() {
                continue;
            }
            context.with(|ctx| -> Result<()> {
                let wake: Function<'_> = ctx
                    .globals()
                    .get("__oc_wake")
                    .map_err(|e| ScriptError::init(e.to_string()))?;
                for id in due {
                    wake.call::<_, ()>((to_sandbox(&ctx, &HostValue::Int(id))?,))
                        .map_err(|e| self.engine_error(&ctx, e, ScriptError::execution))?;
                }
                Ok(())
            })?;
        }
    }

    fn wait_until(&self, at: Instant) {
        loop {
            let remaining = at.saturating_duration_since(Instant::now());
            if remaining.is_zero() || self.cancelled.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(remaining.min(POLL_SLICE));
        }
    }

    fn engine_error(
        &self,
        ctx: &Ctx<'_>,
        err: rquickjs::Error,
        kind: fn(String) -> ScriptError,
    ) -> ScriptError {
        let message = exception_message(ctx, err);
        self.interruption().unwrap_or_else(|| kind(message))
    }
}

/// Text of a pending exception, `Name: message` for error objects
fn exception_message(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if !err.is_exception() {
        return err.to_string();
    }

    let caught = ctx.catch();
    if let Some(object) = caught.as_object() {
        if let Some(exception) = Exception::from_object(object.clone()) {
            let message = exception.message().unwrap_or_default();
            return match object.get::<_, Option<String>>("name").ok().flatten() {
                Some(name) if !name.is_empty() => format!("{}: {}", name, message),
                _ => message,
            };
        }
    }
    Coerced::<String>::from_js(ctx, caught)
        .map(|text| text.0)
        .unwrap_or_else(|_| "Unknown script error".to_string())
}
