//! Request lifecycle
//!
//! [`RequestRunner::run`] drives one request through
//!
//! 1. scope setup (environment, runtime, collection, folder, request)
//! 2. pre-request scripts (collection, folders, request)
//! 3. interpolation and transport
//! 4. post-response scripts
//! 5. declarative assertions
//! 6. test scripts
//!
//! and never fails: every error ends up in [`RunResult::error`] next to
//! whatever response, results and console output were produced before it.

use crate::assertions::AssertionEvaluator;
use crate::interpolator;
use crate::transport::Transport;
use oc_config::{RunnerConfig, TransportConfig};
use oc_core::{
    resolve_variables, Environment, Error, Folder, HttpRequest, OpenCollection, ResolvedItem,
    Response, Result, Scripts, VariableValue,
};
use oc_scripting::{
    summarize, AssertionResult, CollectionContext, ConsoleEntry, HookKind, ResultSummary,
    ScriptInvocationContext, ScriptRequest, ScriptResponse, ScriptRuntime, ScriptSource,
    TestResult, TestResultCollector, VariableScope, VariableStore,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One completed step of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    /// Step name, e.g. `pre-request` or `request`
    pub step: String,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Whether the step succeeded
    pub ok: bool,
}

/// Everything a run produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    /// Response, when the transport produced one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
    /// First failure of the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The run was cancelled
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_cancel: bool,
    /// `test()` results
    #[serde(default)]
    pub test_results: Vec<TestResult>,
    /// Declarative assertion results
    #[serde(default)]
    pub assertion_results: Vec<AssertionResult>,
    /// Console output of every hook, in order
    #[serde(default)]
    pub console: Vec<ConsoleEntry>,
    /// Steps in execution order
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
}

impl RunResult {
    /// Whether the run finished without error
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// No error, and every test and assertion passed
    pub fn passed(&self) -> bool {
        self.is_ok()
            && self.test_summary().all_passed()
            && self.assertion_summary().all_passed()
    }

    /// Summary of `test()` results
    pub fn test_summary(&self) -> ResultSummary {
        summarize(&self.test_results)
    }

    /// Summary of assertion results
    pub fn assertion_summary(&self) -> ResultSummary {
        summarize(&self.assertion_results)
    }
}

/// Input to one [`RequestRunner::run`] call
#[derive(Debug, Clone)]
pub struct RunRequest<'a> {
    /// Collection the request belongs to
    pub collection: &'a OpenCollection,
    /// The request
    pub request: &'a HttpRequest,
    /// Enclosing folders, outermost first
    pub folders: Vec<&'a Folder>,
    /// Selected environment
    pub environment: Option<&'a Environment>,
    /// Caller-supplied runtime variables (win over every other scope)
    pub runtime_variables: Vec<(String, VariableValue)>,
    /// Cancels the run
    pub cancel: CancellationToken,
}

impl<'a> RunRequest<'a> {
    /// Run `item` of `collection`
    pub fn new(collection: &'a OpenCollection, item: ResolvedItem<'a>) -> Self {
        Self {
            collection,
            request: item.request,
            folders: item.folders,
            environment: None,
            runtime_variables: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Select an environment
    pub fn with_environment(mut self, environment: &'a Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Add one runtime variable
    pub fn with_runtime_variable<S: Into<String>>(mut self, name: S, value: VariableValue) -> Self {
        self.runtime_variables.push((name.into(), value));
        self
    }

    /// Use a caller-supplied cancellation token
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Scripts that apply to this request, outermost first, with step prefixes
    fn script_chain(&self) -> Vec<(String, &'a Scripts)> {
        let mut chain = vec![("collection ".to_string(), &self.collection.request.scripts)];
        for folder in &self.folders {
            chain.push((format!("folder '{}' ", folder.name), &folder.request.scripts));
        }
        chain.push((String::new(), &self.request.scripts));
        chain
    }
}

/// Mutable state of one run
#[derive(Debug)]
struct RunState {
    vars: VariableStore,
    results: TestResultCollector,
    collection: CollectionContext,
    cancel: CancellationToken,
    response: Option<Response>,
    console: Vec<ConsoleEntry>,
    timeline: Vec<TimelineEntry>,
}

impl RunState {
    fn context(&self, hook: HookKind) -> ScriptInvocationContext {
        ScriptInvocationContext::new(hook, self.vars.clone(), self.results.clone())
            .with_collection(self.collection.clone())
            .with_cancel(self.cancel.clone())
    }

    fn record(&mut self, step: &str, duration: Duration, ok: bool) {
        self.timeline.push(TimelineEntry {
            step: step.to_string(),
            duration_ms: duration.as_millis() as u64,
            ok,
        });
    }

    fn finish(self, outcome: Result<()>) -> RunResult {
        let (error, is_cancel) = match outcome {
            Ok(()) => (None, false),
            Err(e) => (Some(e.to_string()), e.is_cancel()),
        };
        RunResult {
            response: self.response,
            error,
            is_cancel,
            test_results: self.results.results(),
            assertion_results: self.results.assertion_results(),
            console: self.console,
            timeline: self.timeline,
        }
    }
}

/// Runs requests of a collection over a [`Transport`]
#[derive(Debug, Clone)]
pub struct RequestRunner {
    transport: Arc<dyn Transport>,
    scripts: ScriptRuntime,
    assertions: AssertionEvaluator,
    config: TransportConfig,
    variables: VariableStore,
    cwd: String,
}

impl RequestRunner {
    /// Create a runner with a fresh session
    pub fn new(config: &RunnerConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            scripts: ScriptRuntime::new(config.scripting.clone()),
            assertions: AssertionEvaluator::new(),
            config: config.transport.clone(),
            variables: VariableStore::new(),
            cwd: String::new(),
        }
    }

    /// Use a custom script runtime
    pub fn with_script_runtime(mut self, scripts: ScriptRuntime) -> Self {
        self.scripts = scripts;
        self
    }

    /// Share session scopes (global, environment, runtime) with `variables`
    pub fn with_variables(mut self, variables: VariableStore) -> Self {
        self.variables = variables;
        self
    }

    /// Collection directory reported by `bru.cwd()`
    pub fn with_cwd<S: Into<String>>(mut self, cwd: S) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Session variable store
    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    /// Run one request
    pub async fn run(&self, run: RunRequest<'_>) -> RunResult {
        let start = Instant::now();
        let name = run
            .request
            .name
            .clone()
            .unwrap_or_else(|| run.request.url.clone());

        let mut state = RunState {
            vars: self.variables.fork(),
            results: TestResultCollector::new(),
            collection: CollectionContext {
                collection_name: run.collection.name.clone(),
                environment_name: run.environment.map(|e| e.name.clone()),
                cwd: self.cwd.clone(),
            },
            cancel: run.cancel.clone(),
            response: None,
            console: Vec::new(),
            timeline: Vec::new(),
        };

        let outcome = self.drive(&run, &mut state).await;
        let result = state.finish(outcome);

        match &result.error {
            None => info!(
                request = %name,
                status = result.response.as_ref().map(|r| r.status),
                tests = result.test_results.len(),
                assertions = result.assertion_results.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Request completed"
            ),
            Some(error) => warn!(
                request = %name,
                error = %error,
                cancelled = result.is_cancel,
                "Request failed"
            ),
        }
        result
    }

    async fn drive(&self, run: &RunRequest<'_>, state: &mut RunState) -> Result<()> {
        self.seed_scopes(run, &state.vars)?;

        let chain = run.script_chain();
        let mut request = interpolator::apply_defaults(run.request, run.collection, &run.folders);

        // Pre-request
        let mut facade = ScriptRequest::from_http(&request);
        for (prefix, scripts) in &chain {
            if let Some(code) = scripts.pre_request() {
                let ctx = state.context(HookKind::PreRequest).with_request(facade.clone());
                let (ctx, outcome) = self
                    .run_hook(state, ctx, &format!("{prefix}pre-request"), code)
                    .await;
                if let Some(updated) = ctx.request {
                    facade = updated;
                }
                outcome?;
            }
        }
        facade.apply_to(&mut request);

        // Transport
        let interpolated = interpolator::interpolate_request(&request, &state.vars);
        let prepared =
            interpolator::prepare(&interpolated, &self.config, facade.parse_response_json).await?;
        if state.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        debug!(method = %prepared.method, url = %prepared.url, "Dispatching request");
        let sent_at = Instant::now();
        let sent = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => Err(Error::Cancelled),
            response = self.transport.send(&prepared) => response,
        };
        state.record("request", sent_at.elapsed(), sent.is_ok());

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                if let (false, Some(callback)) = (e.is_cancel(), facade.on_fail.as_deref()) {
                    self.run_on_fail(state, &interpolated, callback, &e).await;
                }
                return Err(e);
            }
        };
        state.response = Some(response);

        // Post-response
        let script_request = ScriptRequest {
            parse_response_json: facade.parse_response_json,
            ..ScriptRequest::from_http(&interpolated)
        };
        for (prefix, scripts) in &chain {
            if let Some(code) = scripts.post_response() {
                let ctx = self.response_context(state, HookKind::PostResponse, &script_request);
                let (ctx, outcome) = self
                    .run_hook(state, ctx, &format!("{prefix}post-response"), code)
                    .await;
                if let (Some(updated), Some(response)) = (ctx.response, state.response.as_mut()) {
                    updated.apply_to(response);
                }
                outcome?;
            }
        }

        // Assertions
        if let Some(response) = &state.response {
            let evaluated_at = Instant::now();
            let results =
                self.assertions
                    .evaluate(&run.request.assertions, response, &state.vars);
            let ok = results.iter().all(|r| r.error.is_none());
            if !results.is_empty() {
                for result in results {
                    state.results.add_assertion_result(result);
                }
                state.record("assertions", evaluated_at.elapsed(), ok);
            }
        }

        // Tests
        for (prefix, scripts) in &chain {
            if let Some(code) = scripts.tests() {
                let ctx = self.response_context(state, HookKind::Tests, &script_request);
                let (_, outcome) = self
                    .run_hook(state, ctx, &format!("{prefix}tests"), code)
                    .await;
                outcome?;
            }
        }

        Ok(())
    }

    /// Populate run scopes; environment and runtime land in the session
    fn seed_scopes(&self, run: &RunRequest<'_>, vars: &VariableStore) -> Result<()> {
        if let Some(environment) = run.environment {
            let values = environment.resolved_variables();
            debug!(
                environment = %environment.name,
                variables = values.len(),
                secrets = environment.secret_names().count(),
                "Environment selected"
            );
            vars.set_scope(VariableScope::Environment, values);
        }

        for (name, value) in &run.runtime_variables {
            vars.set_var(name, value.clone())
                .map_err(|e| Error::InvalidRequest(e.to_string()))?;
        }

        vars.set_scope(
            VariableScope::Collection,
            resolve_variables(&run.collection.request.variables),
        );
        vars.set_scope(
            VariableScope::Folder,
            run.folders
                .iter()
                .flat_map(|folder| resolve_variables(&folder.request.variables)),
        );
        vars.set_scope(
            VariableScope::Request,
            resolve_variables(&run.request.variables),
        );
        Ok(())
    }

    fn response_context(
        &self,
        state: &RunState,
        hook: HookKind,
        request: &ScriptRequest,
    ) -> ScriptInvocationContext {
        let ctx = state.context(hook).with_request(request.clone());
        match &state.response {
            Some(response) => ctx.with_response(ScriptResponse::from_response(response)),
            None => ctx,
        }
    }

    /// Run one hook; the context comes back even on failure so `req`/`res`
    /// changes made before a throw still apply
    async fn run_hook(
        &self,
        state: &mut RunState,
        mut ctx: ScriptInvocationContext,
        step: &str,
        code: &str,
    ) -> (ScriptInvocationContext, Result<()>) {
        let outcome = self
            .scripts
            .run_script(&ScriptSource::inline_named(code, step), &mut ctx)
            .await;
        state.console.extend(outcome.console.iter().cloned());
        state.record(step, outcome.duration, outcome.is_ok());

        let result = match outcome.result {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancel() => Err(Error::Cancelled),
            Err(e) => Err(Error::Script(e.to_string())),
        };
        (ctx, result)
    }

    async fn run_on_fail(
        &self,
        state: &mut RunState,
        request: &HttpRequest,
        callback: &str,
        error: &Error,
    ) {
        let mut ctx = state
            .context(HookKind::OnFail)
            .with_request(ScriptRequest::from_http(request));
        let outcome = self
            .scripts
            .run_on_fail(callback, &error.to_string(), &mut ctx)
            .await;
        state.console.extend(outcome.console.iter().cloned());
        state.record("on-fail", outcome.duration, outcome.is_ok());
        if let Some(e) = outcome.error() {
            warn!(error = %e, "onFail callback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use oc_core::{Assertion, Environment, Item, Variable};
    use oc_scripting::ResultStatus;
    use serde_json::json;

    fn collection(request: HttpRequest) -> OpenCollection {
        OpenCollection::new("pets").with_item(Item::Http(request.named("list")))
    }

    async fn run_with(
        collection: &OpenCollection,
        transport: Arc<MockTransport>,
        environment: Option<&Environment>,
    ) -> RunResult {
        let runner = RequestRunner::new(&RunnerConfig::default(), transport);
        let Some(item) = collection.find_request("list") else {
            panic!("request not found");
        };
        let mut run = RunRequest::new(collection, item);
        if let Some(env) = environment {
            run = run.with_environment(env);
        }
        runner.run(run).await
    }

    #[tokio::test]
    async fn test_plain_request() {
        let transport = Arc::new(MockTransport::responding(
            Response::new(200).with_json(json!({"ok": true})),
        ));
        let collection = collection(HttpRequest::new("GET", "http://api.test/pets"));

        let result = run_with(&collection, transport.clone(), None).await;
        assert!(result.is_ok());
        assert_eq!(result.response.as_ref().map(|r| r.status), Some(200));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(
            result.timeline.iter().map(|t| t.step.as_str()).collect::<Vec<_>>(),
            vec!["request"]
        );
    }

    #[tokio::test]
    async fn test_assertions_run_after_post_response() {
        let transport = Arc::new(MockTransport::responding(
            Response::new(200).with_json(json!({"count": 3})),
        ));
        let request = HttpRequest::new("GET", "http://api.test/pets")
            .with_scripts(Scripts {
                post_response: Some("res.setBody({count: 4})".to_string()),
                ..Default::default()
            })
            .with_assertion(Assertion::new("res.body.count", "eq", "4"))
            .with_assertion(Assertion::new("res.status", "eq", "201"));
        let collection = collection(request);

        let result = run_with(&collection, transport, None).await;
        assert!(result.is_ok());
        assert_eq!(result.assertion_results.len(), 2);
        assert_eq!(result.assertion_results[0].status, ResultStatus::Pass);
        assert_eq!(result.assertion_results[1].status, ResultStatus::Fail);
        assert!(!result.passed());
        assert_eq!(
            result.response.map(|r| r.data),
            Some(json!({"count": 4}))
        );
    }

    #[tokio::test]
    async fn test_scopes_are_layered() {
        let transport = Arc::new(MockTransport::new());
        let mut collection = collection(
            HttpRequest::new("GET", "http://api.test/{{a}}/{{b}}/{{c}}")
                .with_variable(Variable::new("c", "request")),
        );
        collection.request.variables = vec![
            Variable::new("a", "collection"),
            Variable::new("b", "collection"),
            Variable::new("c", "collection"),
        ];
        let environment = Environment::new("dev")
            .with_variable(Variable::new("a", "env"))
            .with_variable(Variable::new("b", "env"));

        run_with(&collection, transport.clone(), Some(&environment)).await;
        assert_eq!(
            transport.last_request().map(|r| r.url),
            Some("http://api.test/collection/collection/request".to_string())
        );
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let transport = Arc::new(MockTransport::new());
        let collection = collection(HttpRequest::new("GET", "http://api.test/pets"));
        let runner = RequestRunner::new(&RunnerConfig::default(), transport.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let Some(item) = collection.find_request("list") else {
            panic!("request not found");
        };
        let result = runner
            .run(RunRequest::new(&collection, item).with_cancel(cancel))
            .await;
        assert!(result.is_cancel);
        assert_eq!(result.error.as_deref(), Some("Request cancelled"));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_request_is_reported() {
        let transport = Arc::new(MockTransport::new());
        let collection = collection(HttpRequest::new("GET", "{{base}}"));

        let result = run_with(&collection, transport.clone(), None).await;
        assert!(result
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("Invalid request")));
        assert!(transport.requests().is_empty());
    }
}
