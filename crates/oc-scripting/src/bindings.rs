//! Host functions behind the script globals
//!
//! The prelude builds `bru`, `req`, `res`, `test` and `console` out of one
//! `host` object of plain functions. Everything here works on
//! [`HostValue`]s, so none of it touches engine handles.

use crate::context::{ConsoleEntry, ConsoleLevel, HookKind, ScriptInvocationContext};
use crate::error::VariableError;
use crate::marshal::HostValue;
use crate::results::{summarize, HasStatus, ResultStatus, TestResult, TestResultCollector};
use crate::variables::{is_valid_name, validate_name, VariableStore};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Pending `bru.sleep` timers
#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    next_id: i64,
    pending: Vec<(Instant, i64)>,
}

impl TimerQueue {
    /// Register a timer and return its id
    pub(crate) fn schedule(&mut self, delay: Duration) -> i64 {
        self.next_id += 1;
        self.pending.push((Instant::now() + delay, self.next_id));
        self.next_id
    }

    /// Earliest pending deadline
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|(at, _)| *at).min()
    }

    /// Remove and return the timers due at `now`, earliest first
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<i64> {
        let (mut due, pending): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|(at, _)| *at <= now);
        self.pending = pending;
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }
}

/// Final report of a script: its failure and the façade snapshot
#[derive(Debug, Clone)]
pub(crate) struct Settlement {
    pub(crate) error: Option<String>,
    pub(crate) snapshot: HostValue,
}

/// State shared between the host functions and the executor loop
#[derive(Debug)]
pub(crate) struct Channel {
    hook: HookKind,
    max_sleep: Duration,
    timers: Mutex<TimerQueue>,
    settlement: Mutex<Option<Settlement>>,
    console: Mutex<Vec<ConsoleEntry>>,
}

impl Channel {
    pub(crate) fn new(hook: HookKind, max_sleep: Duration) -> Self {
        Self {
            hook,
            max_sleep,
            timers: Mutex::new(TimerQueue::default()),
            settlement: Mutex::new(None),
            console: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.timers.lock().next_deadline()
    }

    pub(crate) fn take_due(&self, now: Instant) -> Vec<i64> {
        self.timers.lock().take_due(now)
    }

    pub(crate) fn take_settlement(&self) -> Option<Settlement> {
        self.settlement.lock().take()
    }

    pub(crate) fn take_console(&self) -> Vec<ConsoleEntry> {
        std::mem::take(&mut *self.console.lock())
    }

    fn sleep(&self, ms: f64) -> i64 {
        let delay = sleep_delay(ms, self.max_sleep);
        self.timers.lock().schedule(delay)
    }

    fn log(&self, level: ConsoleLevel, message: String) {
        let hook = self.hook;
        match level {
            ConsoleLevel::Debug => debug!(target: "oc::script", %hook, "{}", message),
            ConsoleLevel::Log | ConsoleLevel::Info => info!(target: "oc::script", %hook, "{}", message),
            ConsoleLevel::Warn => warn!(target: "oc::script", %hook, "{}", message),
            ConsoleLevel::Error => error!(target: "oc::script", %hook, "{}", message),
        }
        self.console.lock().push(ConsoleEntry { level, message });
    }
}

/// `bru.sleep` delay: non-positive and NaN sleep zero, anything past
/// `max` (infinity included) is clamped to it
fn sleep_delay(ms: f64, max: Duration) -> Duration {
    if ms.is_nan() || ms <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(ms / 1000.0)
        .unwrap_or(max)
        .min(max)
}

type HostResult = Result<HostValue, String>;

fn arg(args: &[HostValue], index: usize) -> HostValue {
    args.get(index).cloned().unwrap_or_default()
}

/// Variable name argument; `None` when missing
fn name_arg(args: &[HostValue]) -> Option<String> {
    match args.first() {
        Some(HostValue::String(s)) => Some(s.clone()),
        Some(HostValue::Int(i)) => Some(i.to_string()),
        Some(HostValue::Float(f)) => Some(f.to_string()),
        Some(HostValue::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

fn number_arg(args: &[HostValue], index: usize) -> f64 {
    match args.get(index) {
        Some(HostValue::Int(i)) => *i as f64,
        Some(HostValue::Float(f)) => *f,
        Some(HostValue::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn text_arg(args: &[HostValue], index: usize) -> Option<String> {
    match args.get(index) {
        None | Some(HostValue::Undefined) | Some(HostValue::Null) => None,
        Some(HostValue::String(s)) => Some(s.clone()),
        Some(other) => Some(
            other
                .clone()
                .into_json()
                .map(|json| json.to_string())
                .unwrap_or_default(),
        ),
    }
}

fn to_message<E: ToString>(err: E) -> String {
    err.to_string()
}

fn getter<F>(vars: &VariableStore, f: F) -> HostValue
where
    F: Fn(&VariableStore, &[HostValue]) -> HostResult + Send + Sync + 'static,
{
    let vars = vars.clone();
    HostValue::function(move |args| f(&vars, &args))
}

/// Shared setter: validates the name, deletes on `undefined`
fn set_or_delete(
    args: &[HostValue],
    kind: &'static str,
    set: impl FnOnce(&str, oc_core::VariableValue) -> Result<(), VariableError>,
    delete: impl FnOnce(&str),
) -> HostResult {
    let name = name_arg(args).unwrap_or_default();
    match arg(args, 1).into_variable_value().map_err(to_message)? {
        Some(value) => set(&name, value).map_err(to_message)?,
        None => {
            validate_name(&name, kind).map_err(to_message)?;
            delete(&name);
        }
    }
    Ok(HostValue::Undefined)
}

fn variable_functions(vars: &VariableStore) -> Vec<(String, HostValue)> {
    let read = |f: fn(&VariableStore, &str) -> Option<oc_core::VariableValue>| {
        getter(vars, move |vars, args| {
            Ok(name_arg(args).map_or(HostValue::Undefined, |name| HostValue::from(f(vars, &name))))
        })
    };
    let check = |f: fn(&VariableStore, &str) -> bool| {
        getter(vars, move |vars, args| {
            Ok(HostValue::Bool(name_arg(args).is_some_and(|name| f(vars, &name))))
        })
    };
    let delete = |f: fn(&VariableStore, &str)| {
        getter(vars, move |vars, args| {
            if let Some(name) = name_arg(args) {
                f(vars, &name);
            }
            Ok(HostValue::Undefined)
        })
    };

    vec![
        ("getEnvVar".into(), read(VariableStore::get_env_var)),
        ("hasEnvVar".into(), check(VariableStore::has_env_var)),
        ("deleteEnvVar".into(), delete(VariableStore::delete_env_var)),
        (
            "setEnvVar".into(),
            getter(vars, |vars, args| {
                let persist = arg(args, 2).is_truthy();
                let name = name_arg(args).unwrap_or_default();
                if persist && matches!(arg(args, 1), HostValue::Undefined) {
                    validate_name(&name, "env ").map_err(to_message)?;
                    return Err(VariableError::PersistedType {
                        name,
                        type_name: "undefined",
                    }
                    .to_string());
                }
                set_or_delete(
                    args,
                    "env ",
                    |name, value| vars.set_env_var(name, value, persist),
                    |name| vars.delete_env_var(name),
                )
            }),
        ),
        ("getGlobalEnvVar".into(), read(VariableStore::get_global_env_var)),
        (
            "setGlobalEnvVar".into(),
            getter(vars, |vars, args| {
                set_or_delete(
                    args,
                    "",
                    |name, value| vars.set_global_env_var(name, value),
                    |name| vars.delete_global_env_var(name),
                )
            }),
        ),
        ("hasVar".into(), check(VariableStore::has_var)),
        (
            "getVar".into(),
            getter(vars, |vars, args| match name_arg(args) {
                Some(name) if !is_valid_name(&name) => {
                    Err(VariableError::InvalidName { name }.to_string())
                }
                Some(name) => Ok(HostValue::from(vars.get_var(&name))),
                None => Ok(HostValue::Undefined),
            }),
        ),
        (
            "setVar".into(),
            getter(vars, |vars, args| {
                set_or_delete(
                    args,
                    "",
                    |name, value| vars.set_var(name, value),
                    |name| vars.delete_var(name),
                )
            }),
        ),
        ("deleteVar".into(), delete(VariableStore::delete_var)),
        (
            "deleteAllVars".into(),
            getter(vars, |vars, _| {
                vars.delete_all_vars();
                Ok(HostValue::Undefined)
            }),
        ),
        ("getCollectionVar".into(), read(VariableStore::get_collection_var)),
        ("getFolderVar".into(), read(VariableStore::get_folder_var)),
        ("getRequestVar".into(), read(VariableStore::get_request_var)),
        (
            "interpolate".into(),
            getter(vars, |vars, args| {
                Ok(match arg(args, 0) {
                    HostValue::String(s) => HostValue::String(vars.interpolate_str(&s)),
                    value @ (HostValue::Array(_) | HostValue::Object(_)) => {
                        let json = value.into_json().map_err(to_message)?;
                        HostValue::from(vars.interpolate_json(&json))
                    }
                    other => other,
                })
            }),
        ),
    ]
}

/// `{summary, results}` as returned by `bru.getTestResults()`
fn report<T: HasStatus + Serialize>(results: &[T]) -> HostResult {
    let results_json = serde_json::to_value(results).map_err(to_message)?;
    let summary = serde_json::to_value(summarize(results)).map_err(to_message)?;
    Ok(HostValue::from(serde_json::json!({
        "summary": summary,
        "results": results_json,
    })))
}

fn result_functions(results: &TestResultCollector) -> Vec<(String, HostValue)> {
    let record = results.clone();
    let tests = results.clone();
    let assertions = results.clone();

    vec![
        (
            "recordTest".into(),
            HostValue::function(move |args| {
                let report = arg(&args, 0);
                let status = match report.get("status").and_then(HostValue::as_str) {
                    Some("pass") => ResultStatus::Pass,
                    Some("skip") => ResultStatus::Skip,
                    _ => ResultStatus::Fail,
                };
                let json_field = |key: &str| {
                    report
                        .get(key)
                        .filter(|value| !matches!(value, HostValue::Undefined))
                        .and_then(|value| value.clone().into_json().ok())
                };
                record.add_result(TestResult {
                    id: String::new(),
                    status,
                    description: report
                        .get("description")
                        .and_then(HostValue::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    expected: json_field("expected"),
                    actual: json_field("actual"),
                    error: report.get("error").and_then(HostValue::as_str).map(str::to_string),
                });
                Ok(HostValue::Undefined)
            }),
        ),
        (
            "testResults".into(),
            HostValue::function(move |_| report(&tests.results())),
        ),
        (
            "assertionResults".into(),
            HostValue::function(move |_| report(&assertions.assertion_results())),
        ),
    ]
}

fn channel_functions(channel: &Arc<Channel>, raw: Option<Vec<u8>>) -> Vec<(String, HostValue)> {
    let sleep = Arc::clone(channel);
    let log = Arc::clone(channel);
    let settle = Arc::clone(channel);

    vec![
        (
            "sleep".into(),
            HostValue::function(move |args| Ok(HostValue::Int(sleep.sleep(number_arg(&args, 0))))),
        ),
        (
            "log".into(),
            HostValue::function(move |args| {
                let level = text_arg(&args, 0)
                    .and_then(|level| level.parse().ok())
                    .unwrap_or(ConsoleLevel::Log);
                log.log(level, text_arg(&args, 1).unwrap_or_default());
                Ok(HostValue::Undefined)
            }),
        ),
        (
            "settle".into(),
            HostValue::function(move |args| {
                *settle.settlement.lock() = Some(Settlement {
                    error: text_arg(&args, 0),
                    snapshot: arg(&args, 1),
                });
                Ok(HostValue::Undefined)
            }),
        ),
        (
            "responseBuffer".into(),
            HostValue::function(move |_| {
                Ok(raw.as_ref().map_or(HostValue::Undefined, |bytes| {
                    HostValue::Array(bytes.iter().map(|b| HostValue::Int(i64::from(*b))).collect())
                }))
            }),
        ),
    ]
}

/// The `host` object handed to the prelude
pub(crate) fn host_object(ctx: &ScriptInvocationContext, channel: &Arc<Channel>) -> HostValue {
    let raw = ctx.response.as_ref().map(|response| response.raw.clone());

    let mut entries = variable_functions(&ctx.variables);
    entries.extend(result_functions(&ctx.results));
    entries.extend(channel_functions(channel, raw));
    HostValue::Object(entries)
}

/// Collection identity handed to the prelude
pub(crate) fn info_object(ctx: &ScriptInvocationContext) -> HostValue {
    let collection = &ctx.collection;
    HostValue::Object(vec![
        ("cwd".into(), HostValue::from(collection.cwd.as_str())),
        (
            "collectionName".into(),
            HostValue::from(collection.collection_name.as_str()),
        ),
        (
            "envName".into(),
            collection
                .environment_name
                .clone()
                .map_or(HostValue::Undefined, HostValue::from),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ScriptResponse;
    use oc_core::VariableValue;

    fn context() -> ScriptInvocationContext {
        ScriptInvocationContext::new(
            HookKind::PostResponse,
            VariableStore::new(),
            TestResultCollector::new(),
        )
    }

    fn call(host: &HostValue, name: &str, args: Vec<HostValue>) -> HostResult {
        match host.get(name) {
            Some(HostValue::Function(f)) => f.call(args),
            _ => panic!("missing host function {name}"),
        }
    }

    fn setup() -> (ScriptInvocationContext, Arc<Channel>, HostValue) {
        let ctx = context();
        let channel = Arc::new(Channel::new(ctx.hook, Duration::from_secs(1)));
        let host = host_object(&ctx, &channel);
        (ctx, channel, host)
    }

    #[test]
    fn test_sleep_delay_is_clamped() {
        let max = Duration::from_secs(10);
        assert_eq!(sleep_delay(250.0, max), Duration::from_millis(250));
        assert_eq!(sleep_delay(1e300, max), max);
        assert_eq!(sleep_delay(f64::INFINITY, max), max);
        assert_eq!(sleep_delay(-5.0, max), Duration::ZERO);
        assert_eq!(sleep_delay(f64::NAN, max), Duration::ZERO);
    }

    #[test]
    fn test_set_and_get_runtime_var() {
        let (ctx, _, host) = setup();
        call(&host, "setVar", vec!["token".into(), "abc".into()]).unwrap();
        assert_eq!(ctx.variables.get_var("token"), Some(VariableValue::from("abc")));
        assert_eq!(call(&host, "getVar", vec!["token".into()]).unwrap(), HostValue::from("abc"));
        assert_eq!(call(&host, "hasVar", vec!["token".into()]).unwrap(), HostValue::Bool(true));
        assert_eq!(call(&host, "getVar", vec!["nope".into()]).unwrap(), HostValue::Undefined);
    }

    #[test]
    fn test_get_var_rejects_invalid_names() {
        let (_, _, host) = setup();
        let err = call(&host, "getVar", vec!["bad name!".into()]).unwrap_err();
        assert!(err.starts_with("Variable name: \"bad name!\" contains invalid characters!"));
        assert_eq!(call(&host, "getVar", vec!["".into()]).unwrap(), HostValue::Undefined);
    }

    #[test]
    fn test_setting_undefined_deletes() {
        let (ctx, _, host) = setup();
        call(&host, "setVar", vec!["k".into(), HostValue::Int(1)]).unwrap();
        call(&host, "setVar", vec!["k".into(), HostValue::Undefined]).unwrap();
        assert!(!ctx.variables.has_var("k"));

        let err = call(&host, "setVar", vec!["bad name".into(), HostValue::Undefined]).unwrap_err();
        assert!(err.contains("contains invalid characters"));
    }

    #[test]
    fn test_env_var_persist_rules() {
        let (ctx, _, host) = setup();
        let err = call(
            &host,
            "setEnvVar",
            vec!["n".into(), HostValue::Int(5), HostValue::Bool(true)],
        )
        .unwrap_err();
        assert_eq!(
            err,
            "Persistent environment variables must be strings. Received number for key \"n\"."
        );

        let err = call(
            &host,
            "setEnvVar",
            vec!["n".into(), HostValue::Undefined, HostValue::Bool(true)],
        )
        .unwrap_err();
        assert!(err.contains("Received undefined"));

        call(&host, "setEnvVar", vec!["n".into(), "5".into(), HostValue::Bool(true)]).unwrap();
        assert_eq!(ctx.variables.persisted_env_vars().len(), 1);
    }

    #[test]
    fn test_missing_name_messages() {
        let (_, _, host) = setup();
        assert_eq!(
            call(&host, "setEnvVar", vec![]).unwrap_err(),
            "Creating a env variable without specifying a name is not allowed."
        );
        assert_eq!(
            call(&host, "setVar", vec![HostValue::Undefined, "x".into()]).unwrap_err(),
            "Creating a variable without specifying a name is not allowed."
        );
    }

    #[test]
    fn test_record_test_and_read_back() {
        let (ctx, _, host) = setup();
        call(
            &host,
            "recordTest",
            vec![HostValue::Object(vec![
                ("status".into(), "fail".into()),
                ("description".into(), "status is 200".into()),
                ("error".into(), "expected 404 to equal 200".into()),
                ("expected".into(), HostValue::Int(200)),
                ("actual".into(), HostValue::Int(404)),
            ])],
        )
        .unwrap();

        let results = ctx.results.results();
        assert_eq!(results[0].status, ResultStatus::Fail);
        assert_eq!(results[0].expected, Some(200.into()));

        let report = call(&host, "testResults", vec![]).unwrap().into_json().unwrap();
        assert_eq!(report["summary"]["failed"], 1);
        assert_eq!(report["results"][0]["description"], "status is 200");
    }

    #[test]
    fn test_console_is_captured() {
        let (_, channel, host) = setup();
        call(&host, "log", vec!["warn".into(), "careful".into()]).unwrap();
        call(&host, "log", vec!["bogus".into(), HostValue::Int(1)]).unwrap();

        let console = channel.take_console();
        assert_eq!(console[0].level, ConsoleLevel::Warn);
        assert_eq!(console[1].level, ConsoleLevel::Log);
        assert_eq!(console[1].message, "1");
        assert!(channel.take_console().is_empty());
    }

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let (_, channel, host) = setup();
        let slow = call(&host, "sleep", vec![HostValue::Int(50)]).unwrap();
        let fast = call(&host, "sleep", vec![HostValue::Int(0)]).unwrap();
        assert_ne!(slow, fast);

        let due = channel.take_due(Instant::now());
        assert_eq!(due, vec![2]);
        let due = channel.take_due(Instant::now() + Duration::from_millis(60));
        assert_eq!(due, vec![1]);
        assert!(channel.next_deadline().is_none());
    }

    #[test]
    fn test_sleep_is_clamped() {
        let (_, channel, host) = setup();
        call(&host, "sleep", vec![HostValue::Int(60_000)]).unwrap();
        let deadline = channel.next_deadline().unwrap();
        assert!(deadline <= Instant::now() + Duration::from_secs(1));
    }

    #[test]
    fn test_settle_and_response_buffer() {
        let ctx = context().with_response(ScriptResponse {
            raw: b"hi".to_vec(),
            ..Default::default()
        });
        let channel = Arc::new(Channel::new(ctx.hook, Duration::from_secs(1)));
        let host = host_object(&ctx, &channel);

        assert_eq!(
            call(&host, "responseBuffer", vec![]).unwrap(),
            HostValue::Array(vec![HostValue::Int(104), HostValue::Int(105)])
        );

        call(&host, "settle", vec!["boom".into(), HostValue::Null]).unwrap();
        let settled = channel.take_settlement().unwrap();
        assert_eq!(settled.error.as_deref(), Some("boom"));
        assert!(channel.take_settlement().is_none());
    }

    #[test]
    fn test_interpolate_binding() {
        let (ctx, _, host) = setup();
        ctx.variables.set_var("id", VariableValue::from(7i64)).unwrap();
        assert_eq!(
            call(&host, "interpolate", vec!["/users/{{id}}".into()]).unwrap(),
            HostValue::from("/users/7")
        );
        assert_eq!(
            call(
                &host,
                "interpolate",
                vec![HostValue::Object(vec![("u".into(), "{{id}}".into())])]
            )
            .unwrap(),
            HostValue::Object(vec![("u".into(), "7".into())])
        );
    }
}
