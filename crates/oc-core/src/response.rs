//! Transport responses

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Response headers keyed by lowercase name
pub type Headers = BTreeMap<String, String>;

/// A completed transport response.
///
/// Any status (including 4xx/5xx) is a completed response; only
/// connection-level failures are reported as errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase
    #[serde(default)]
    pub status_text: String,
    /// Response headers
    #[serde(default)]
    pub headers: Headers,
    /// Body, parsed as JSON when possible, otherwise a string
    #[serde(default)]
    pub data: serde_json::Value,
    /// Body size in bytes
    #[serde(default)]
    pub size: u64,
    /// Round-trip duration in milliseconds
    #[serde(default)]
    pub duration: u64,
    /// Final URL
    #[serde(default)]
    pub url: String,
    /// Raw body bytes
    #[serde(skip)]
    pub raw: Vec<u8>,
}

impl Response {
    /// Create a response with a status code and empty body
    pub fn new(status: u16) -> Self {
        Self {
            status,
            status_text: canonical_reason(status).to_string(),
            data: serde_json::Value::Null,
            ..Default::default()
        }
    }

    /// Set a header (builder style)
    pub fn with_header<N: AsRef<str>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Set the body from raw bytes, parsing JSON when `parse_json` is set
    pub fn with_body_bytes(mut self, raw: Vec<u8>, parse_json: bool) -> Self {
        self.data = decode_body(&raw, parse_json);
        self.size = raw.len() as u64;
        self.raw = raw;
        self
    }

    /// Set the body from a JSON value
    pub fn with_json(self, data: serde_json::Value) -> Self {
        let raw = data.to_string().into_bytes();
        let mut res = self.with_body_bytes(raw, false);
        res.data = data;
        res
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Approximate size of the serialized header block in bytes
    pub fn header_size(&self) -> u64 {
        self.headers
            .iter()
            .map(|(k, v)| (k.len() + v.len() + 4) as u64)
            .sum()
    }
}

/// Decode a body into a JSON value, falling back to a (lossy) string
pub fn decode_body(raw: &[u8], parse_json: bool) -> serde_json::Value {
    if parse_json {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(raw) {
            return value;
        }
    }
    serde_json::Value::String(String::from_utf8_lossy(raw).into_owned())
}

/// Canonical reason phrase for a status code (empty when unknown)
pub fn canonical_reason(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}
