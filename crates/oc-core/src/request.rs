//! HTTP request items

use crate::environment::Variable;
use serde::{Deserialize, Deserializer, Serialize};

/// An HTTP request item of a collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    /// Request name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Ordering within the parent folder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,

    /// Target URL (may contain `{{placeholders}}` and `:path` params)
    #[serde(default)]
    pub url: String,

    /// HTTP method
    #[serde(default = "default_method")]
    pub method: String,

    /// Query and path parameters
    #[serde(default)]
    pub params: Vec<HttpRequestParam>,

    /// Request headers
    #[serde(default)]
    pub headers: Vec<HttpHeader>,

    /// Request body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<HttpRequestBody>,

    /// Authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,

    /// Lifecycle scripts
    #[serde(default)]
    pub scripts: Scripts,

    /// Request-scoped variables
    #[serde(default)]
    pub variables: Vec<Variable>,

    /// Declarative assertions
    #[serde(default)]
    pub assertions: Vec<Assertion>,

    /// Transport settings
    #[serde(default)]
    pub settings: HttpRequestSettings,

    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Markdown documentation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl HttpRequest {
    /// Create a request with a method and URL
    pub fn new<M: Into<String>, U: Into<String>>(method: M, url: U) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the request name (builder style)
    pub fn named<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a header (builder style)
    pub fn with_header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.push(HttpHeader::new(name, value));
        self
    }

    /// Set the scripts (builder style)
    pub fn with_scripts(mut self, scripts: Scripts) -> Self {
        self.scripts = scripts;
        self
    }

    /// Add an assertion (builder style)
    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    /// Add a request variable (builder style)
    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    /// Set the body (builder style)
    pub fn with_body(mut self, body: HttpRequestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Enabled headers, in declaration order
    pub fn enabled_headers(&self) -> impl Iterator<Item = &HttpHeader> {
        self.headers.iter().filter(|h| !h.disabled && !h.name.is_empty())
    }

    /// Case-insensitive header lookup among enabled headers
    pub fn header(&self, name: &str) -> Option<&str> {
        self.enabled_headers()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Name of the auth mode (`none` when absent)
    pub fn auth_mode(&self) -> &'static str {
        self.auth.as_ref().map_or("none", Auth::mode)
    }
}

/// A request header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpHeader {
    /// Header name
    pub name: String,
    /// Header value
    #[serde(default)]
    pub value: String,
    /// Disabled headers are not sent
    #[serde(default)]
    pub disabled: bool,
}

impl HttpHeader {
    /// Create an enabled header
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            disabled: false,
        }
    }
}

/// Where a parameter is placed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// Appended to the query string
    #[default]
    Query,
    /// Substituted into a `:name` path segment
    Path,
}

/// A query or path parameter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpRequestParam {
    /// Parameter name
    pub name: String,
    /// Parameter value
    #[serde(default)]
    pub value: String,
    /// Placement
    #[serde(default, rename = "type")]
    pub kind: ParamKind,
    /// Disabled params are not sent
    #[serde(default)]
    pub disabled: bool,
}

/// A form entry (urlencoded or multipart)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormEntry {
    /// Field name
    pub name: String,
    /// Field value
    #[serde(default)]
    pub value: String,
    /// Disabled entries are not sent
    #[serde(default)]
    pub disabled: bool,
}

/// A file body entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileBodyEntry {
    /// Path of the file to send
    pub file_path: String,
    /// Content type
    #[serde(default)]
    pub content_type: String,
    /// Whether this entry is the one sent
    #[serde(default)]
    pub selected: bool,
}

/// Request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HttpRequestBody {
    /// JSON text
    #[serde(rename = "json")]
    Json {
        /// Body text
        data: String,
    },
    /// Plain text
    #[serde(rename = "text")]
    Text {
        /// Body text
        data: String,
    },
    /// XML text
    #[serde(rename = "xml")]
    Xml {
        /// Body text
        data: String,
    },
    /// SPARQL query text
    #[serde(rename = "sparql")]
    Sparql {
        /// Body text
        data: String,
    },
    /// `application/x-www-form-urlencoded`
    #[serde(rename = "form-urlencoded")]
    FormUrlEncoded {
        /// Form entries
        data: Vec<FormEntry>,
    },
    /// `multipart/form-data`
    #[serde(rename = "multipart-form")]
    MultipartForm {
        /// Form entries
        data: Vec<FormEntry>,
    },
    /// Raw file upload
    #[serde(rename = "file")]
    File {
        /// File entries
        data: Vec<FileBodyEntry>,
    },
}

impl HttpRequestBody {
    /// Default content type for this body kind
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json { .. } => "application/json",
            Self::Text { .. } => "text/plain",
            Self::Xml { .. } => "application/xml",
            Self::Sparql { .. } => "application/sparql-query",
            Self::FormUrlEncoded { .. } => "application/x-www-form-urlencoded",
            Self::MultipartForm { .. } => "multipart/form-data",
            Self::File { .. } => "application/octet-stream",
        }
    }

    /// Raw text for text-like bodies
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            Self::Json { data } | Self::Text { data } | Self::Xml { data } | Self::Sparql { data } => {
                Some(data)
            }
            _ => None,
        }
    }
}

/// Where an API key is placed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyPlacement {
    /// Sent as a header
    #[default]
    Header,
    /// Sent as a query parameter
    Query,
}

/// Authentication configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Auth {
    /// No authentication
    None,
    /// Inherit from the enclosing folder or collection
    Inherit,
    /// HTTP basic
    Basic {
        /// User name
        #[serde(default)]
        username: String,
        /// Password
        #[serde(default)]
        password: String,
    },
    /// Bearer token
    Bearer {
        /// Token
        #[serde(default)]
        token: String,
    },
    /// API key
    Apikey {
        /// Key name
        #[serde(default)]
        key: String,
        /// Key value
        #[serde(default)]
        value: String,
        /// Placement
        #[serde(default)]
        placement: ApiKeyPlacement,
    },
    /// HTTP digest (credentials carried for the transport)
    Digest {
        /// User name
        #[serde(default)]
        username: String,
        /// Password
        #[serde(default)]
        password: String,
    },
    /// Any other mode, passed through to the transport untouched
    #[serde(other)]
    Other,
}

impl Auth {
    /// Mode name as exposed by `req.getAuthMode()`
    pub fn mode(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Inherit => "inherit",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::Apikey { .. } => "apikey",
            Self::Digest { .. } => "digest",
            Self::Other => "other",
        }
    }
}

/// Scripts attached to a request, folder or collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scripts {
    /// Runs before the request is interpolated and sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_request: Option<String>,
    /// Runs after the response is received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_response: Option<String>,
    /// Runs last, with `test()` results collected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<String>,
}

impl Scripts {
    /// Pre-request script, if non-blank
    pub fn pre_request(&self) -> Option<&str> {
        non_blank(&self.pre_request)
    }

    /// Post-response script, if non-blank
    pub fn post_response(&self) -> Option<&str> {
        non_blank(&self.post_response)
    }

    /// Tests script, if non-blank
    pub fn tests(&self) -> Option<&str> {
        non_blank(&self.tests)
    }
}

fn non_blank(script: &Option<String>) -> Option<&str> {
    script.as_deref().filter(|s| !s.trim().is_empty())
}

/// A declarative assertion on the response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    /// Left-hand expression, e.g. `res.status`
    pub expression: String,
    /// Operator name, e.g. `eq`
    #[serde(default)]
    pub operator: String,
    /// Right-hand operand text
    #[serde(default)]
    pub value: String,
    /// Disabled assertions are skipped
    #[serde(default)]
    pub disabled: bool,
}

impl Assertion {
    /// Create an enabled assertion
    pub fn new<E: Into<String>, O: Into<String>, V: Into<String>>(
        expression: E,
        operator: O,
        value: V,
    ) -> Self {
        Self {
            expression: expression.into(),
            operator: operator.into(),
            value: value.into(),
            disabled: false,
        }
    }
}

/// Transport settings; `"inherit"` is read as unset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestSettings {
    /// Percent-encode the URL before sending
    #[serde(default, deserialize_with = "inheritable")]
    pub encode_url: Option<bool>,
    /// Timeout in milliseconds
    #[serde(default, deserialize_with = "inheritable")]
    pub timeout: Option<u64>,
    /// Follow redirects
    #[serde(default, deserialize_with = "inheritable")]
    pub follow_redirects: Option<bool>,
    /// Maximum redirects to follow
    #[serde(default, deserialize_with = "inheritable")]
    pub max_redirects: Option<u32>,
}

fn inheritable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Inheritable<T> {
        Value(T),
        Keyword(String),
    }

    Ok(match Option::<Inheritable<T>>::deserialize(deserializer)? {
        Some(Inheritable::Value(v)) => Some(v),
        Some(Inheritable::Keyword(_)) | None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_full_request() {
        let req: HttpRequest = serde_json::from_value(json!({
            "name": "Get users",
            "url": "{{host}}/users/:id",
            "method": "GET",
            "params": [
                { "name": "id", "value": "7", "type": "path" },
                { "name": "page", "value": "1", "type": "query", "disabled": true }
            ],
            "headers": [{ "name": "Accept", "value": "application/json" }],
            "body": { "type": "json", "data": "{\"a\":1}" },
            "auth": { "type": "bearer", "token": "{{token}}" },
            "scripts": { "preRequest": "bru.setVar('a', 1)", "tests": "  " },
            "assertions": [{ "expression": "res.status", "operator": "eq", "value": "200" }],
            "settings": { "timeout": "inherit", "maxRedirects": 3 }
        }))
        .unwrap();

        assert_eq!(req.params[0].kind, ParamKind::Path);
        assert_eq!(req.header("accept"), Some("application/json"));
        assert_eq!(req.auth_mode(), "bearer");
        assert_eq!(req.scripts.pre_request(), Some("bru.setVar('a', 1)"));
        assert_eq!(req.scripts.tests(), None);
        assert_eq!(req.settings.timeout, None);
        assert_eq!(req.settings.max_redirects, Some(3));
        assert_eq!(req.body.as_ref().and_then(|b| b.raw_text()), Some("{\"a\":1}"));
    }

    #[test]
    fn test_unknown_auth_mode_is_other() {
        let auth: Auth = serde_json::from_value(json!({ "type": "awsv4", "region": "x" })).unwrap();
        assert_eq!(auth, Auth::Other);
    }

    #[test]
    fn test_method_defaults_to_get() {
        let req: HttpRequest = serde_json::from_value(json!({ "url": "http://x" })).unwrap();
        assert_eq!(req.method, "GET");
    }
}
