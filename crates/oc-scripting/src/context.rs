//! Per-invocation script context and the request/response façades

use crate::results::TestResultCollector;
use crate::variables::VariableStore;
use oc_core::{FormEntry, HttpHeader, HttpRequest, HttpRequestBody, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

/// Lifecycle point a script runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookKind {
    /// Before the request is interpolated and sent
    PreRequest,
    /// After a response was received
    PostResponse,
    /// After post-response and declarative assertions
    Tests,
    /// `req.onFail` callback after a transport failure
    OnFail,
    /// Standalone script with no request
    Standalone,
}

impl HookKind {
    /// Whether `req` is bound for this hook
    pub fn exposes_request(self) -> bool {
        !matches!(self, HookKind::Standalone)
    }

    /// Whether `res` is bound for this hook
    pub fn exposes_response(self) -> bool {
        matches!(self, HookKind::PostResponse | HookKind::Tests)
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PreRequest => "pre-request",
            Self::PostResponse => "post-response",
            Self::Tests => "tests",
            Self::OnFail => "on-fail",
            Self::Standalone => "standalone",
        };
        f.write_str(name)
    }
}

/// `console` method a message was written with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    /// `console.log`
    Log,
    /// `console.debug`
    Debug,
    /// `console.info`
    Info,
    /// `console.warn`
    Warn,
    /// `console.error`
    Error,
}

impl FromStr for ConsoleLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(Self::Log),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Log => "log",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// One captured `console.*` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    /// Method used
    pub level: ConsoleLevel,
    /// Space-joined, stringified arguments
    pub message: String,
}

/// Mutable view of the in-flight request exposed to scripts as `req`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRequest {
    /// Request name
    #[serde(default)]
    pub name: String,
    /// URL (may still contain placeholders before interpolation)
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Headers by name
    #[serde(default)]
    pub headers: Map<String, Value>,
    /// Body: parsed JSON, text, form fields, or `null`
    #[serde(default)]
    pub body: Value,
    /// Timeout in milliseconds
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Redirect limit
    #[serde(default)]
    pub max_redirects: Option<u32>,
    /// Auth mode name
    #[serde(default)]
    pub auth_mode: String,
    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Parse the response body as JSON
    #[serde(default = "default_true")]
    pub parse_response_json: bool,
    /// Source of the `req.onFail` callback
    #[serde(default)]
    pub on_fail: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ScriptRequest {
    /// Build the façade from a prepared request
    pub fn from_http(request: &HttpRequest) -> Self {
        let mut headers = Map::new();
        for header in request.enabled_headers() {
            headers.insert(header.name.clone(), Value::String(header.value.clone()));
        }

        Self {
            name: request.name.clone().unwrap_or_default(),
            url: request.url.clone(),
            method: request.method.to_ascii_uppercase(),
            headers,
            body: body_to_value(request.body.as_ref()),
            timeout: request.settings.timeout,
            max_redirects: request.settings.max_redirects,
            auth_mode: request.auth_mode().to_string(),
            tags: request.tags.clone(),
            parse_response_json: true,
            on_fail: None,
        }
    }

    /// Write script changes back into the request
    pub fn apply_to(&self, request: &mut HttpRequest) {
        request.url = self.url.clone();
        request.method = self.method.clone();
        request.headers = self
            .headers
            .iter()
            .map(|(name, value)| HttpHeader::new(name.clone(), value_to_text(value)))
            .collect();

        if self.body != body_to_value(request.body.as_ref()) {
            request.body = value_to_body(&self.body, request.body.as_ref());
        }

        request.settings.timeout = self.timeout;
        request.settings.max_redirects = self.max_redirects;
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| value_to_text(v))
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn body_to_value(body: Option<&HttpRequestBody>) -> Value {
    match body {
        None | Some(HttpRequestBody::File { .. }) => Value::Null,
        Some(HttpRequestBody::Json { data }) => {
            serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.clone()))
        }
        Some(HttpRequestBody::Text { data })
        | Some(HttpRequestBody::Xml { data })
        | Some(HttpRequestBody::Sparql { data }) => Value::String(data.clone()),
        Some(HttpRequestBody::FormUrlEncoded { data })
        | Some(HttpRequestBody::MultipartForm { data }) => Value::Object(
            data.iter()
                .filter(|entry| !entry.disabled)
                .map(|entry| (entry.name.clone(), Value::String(entry.value.clone())))
                .collect(),
        ),
    }
}

fn value_to_body(value: &Value, original: Option<&HttpRequestBody>) -> Option<HttpRequestBody> {
    let form = |map: &Map<String, Value>| -> Vec<FormEntry> {
        map.iter()
            .map(|(name, value)| FormEntry {
                name: name.clone(),
                value: value_to_text(value),
                disabled: false,
            })
            .collect()
    };

    match (value, original) {
        (Value::Null, _) => None,
        (Value::Object(map), Some(HttpRequestBody::FormUrlEncoded { .. })) => {
            Some(HttpRequestBody::FormUrlEncoded { data: form(map) })
        }
        (Value::Object(map), Some(HttpRequestBody::MultipartForm { .. })) => {
            Some(HttpRequestBody::MultipartForm { data: form(map) })
        }
        (Value::String(s), Some(HttpRequestBody::Text { .. })) => {
            Some(HttpRequestBody::Text { data: s.clone() })
        }
        (Value::String(s), Some(HttpRequestBody::Xml { .. })) => {
            Some(HttpRequestBody::Xml { data: s.clone() })
        }
        (Value::String(s), Some(HttpRequestBody::Sparql { .. })) => {
            Some(HttpRequestBody::Sparql { data: s.clone() })
        }
        (Value::String(s), Some(HttpRequestBody::Json { .. })) => {
            Some(HttpRequestBody::Json { data: s.clone() })
        }
        (Value::String(s), _) => Some(HttpRequestBody::Text { data: s.clone() }),
        (other, _) => Some(HttpRequestBody::Json {
            data: other.to_string(),
        }),
    }
}

/// Read-only view of a completed response exposed to scripts as `res`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptResponse {
    /// Status code
    pub status: u16,
    /// Reason phrase
    #[serde(default)]
    pub status_text: String,
    /// Headers by lowercase name
    #[serde(default)]
    pub headers: Map<String, Value>,
    /// Body (replaceable through `res.setBody`)
    #[serde(default)]
    pub body: Value,
    /// Round trip in milliseconds
    #[serde(default)]
    pub response_time: u64,
    /// Final URL
    #[serde(default)]
    pub url: String,
    /// Body size in bytes
    #[serde(default)]
    pub size: u64,
    /// Header block size in bytes
    #[serde(default)]
    pub header_size: u64,
    /// Raw body bytes
    #[serde(skip)]
    pub raw: Vec<u8>,
}

impl ScriptResponse {
    /// Build the façade from a transport response
    pub fn from_response(response: &Response) -> Self {
        Self {
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
            body: response.data.clone(),
            response_time: response.duration,
            url: response.url.clone(),
            size: response.size,
            header_size: response.header_size(),
            raw: response.raw.clone(),
        }
    }

    /// Write script changes (the body) back into the response
    pub fn apply_to(&self, response: &mut Response) {
        response.data = self.body.clone();
    }
}

/// Collection identity visible through `bru`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionContext {
    /// Collection name
    pub collection_name: String,
    /// Selected environment name
    pub environment_name: Option<String>,
    /// Collection working directory
    pub cwd: String,
}

/// Everything one script invocation sees.
///
/// Built fresh for every hook. The variable store and result collector are
/// shared handles, so their mutations outlive the invocation; the request
/// and response façades are copied in and written back after the script
/// settles.
#[derive(Debug, Clone)]
pub struct ScriptInvocationContext {
    /// Hook being run
    pub hook: HookKind,
    /// Variable scopes
    pub variables: VariableStore,
    /// Result sink for `test()` and source for result accessors
    pub results: TestResultCollector,
    /// `req` façade
    pub request: Option<ScriptRequest>,
    /// `res` façade
    pub response: Option<ScriptResponse>,
    /// Collection identity
    pub collection: CollectionContext,
    /// Cancels the invocation
    pub cancel: CancellationToken,
    /// Console output captured so far
    pub console: Vec<ConsoleEntry>,
}

impl ScriptInvocationContext {
    /// Create a context with no façades bound
    pub fn new(hook: HookKind, variables: VariableStore, results: TestResultCollector) -> Self {
        Self {
            hook,
            variables,
            results,
            request: None,
            response: None,
            collection: CollectionContext::default(),
            cancel: CancellationToken::new(),
            console: Vec::new(),
        }
    }

    /// Bind `req` if the hook exposes it
    pub fn with_request(mut self, request: ScriptRequest) -> Self {
        if self.hook.exposes_request() {
            self.request = Some(request);
        }
        self
    }

    /// Bind `res` if the hook exposes it
    pub fn with_response(mut self, response: ScriptResponse) -> Self {
        if self.hook.exposes_response() {
            self.response = Some(response);
        }
        self
    }

    /// Set the collection identity
    pub fn with_collection(mut self, collection: CollectionContext) -> Self {
        self.collection = collection;
        self
    }

    /// Use a caller-supplied cancellation token
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
