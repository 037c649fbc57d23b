//! Transport seam and the built-in HTTP client

use async_trait::async_trait;
use bytes::Bytes;
use http::header::LOCATION;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use oc_core::{Error, Headers, Response, Result};
use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Body type alias
pub type Body = Full<Bytes>;

/// A fully interpolated request, ready for the wire
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    /// Upper-case method
    pub method: String,
    /// Absolute URL including query string
    pub url: String,
    /// Headers in send order
    pub headers: Vec<(String, String)>,
    /// Encoded body
    pub body: Option<Vec<u8>>,
    /// Deadline for the whole exchange, redirects included
    pub timeout: Duration,
    /// Follow 3xx responses
    pub follow_redirects: bool,
    /// Redirects followed before giving up
    pub max_redirects: u32,
    /// Parse the response body as JSON
    pub parse_response_json: bool,
}

impl PreparedRequest {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as UTF-8 text, if any
    pub fn body_text(&self) -> Option<String> {
        self.body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

/// Sends prepared requests.
///
/// Any received response, whatever its status, is `Ok`. Only
/// connection-level failures are errors.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Perform one exchange
    async fn send(&self, request: &PreparedRequest) -> Result<Response>;
}

/// HTTP/1.1 client over hyper
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client<HttpConnector, Body>,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new() -> Self {
        let connector = HttpConnector::new();
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }

    async fn exchange(&self, request: &PreparedRequest) -> Result<Response> {
        let start = Instant::now();
        let mut url = request.url.clone();
        let mut method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| Error::InvalidRequest(format!("Invalid method: {}", request.method)))?;
        let mut body = request.body.clone();
        let mut redirects = 0;

        loop {
            let uri: http::Uri = url
                .parse()
                .map_err(|e| Error::InvalidRequest(format!("Invalid URL {url}: {e}")))?;
            if uri.scheme_str() != Some("http") {
                return Err(Error::Transport(format!(
                    "Unsupported scheme in {url}: the built-in transport speaks plain HTTP only"
                )));
            }

            let mut builder = Request::builder().method(method.clone()).uri(uri);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            let req = builder
                .body(Full::new(Bytes::from(body.clone().unwrap_or_default())))
                .map_err(|e| Error::InvalidRequest(e.to_string()))?;

            trace!(method = %method, url = %url, "Sending request");
            let response = self
                .client
                .request(req)
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            let status = response.status();

            if request.follow_redirects && status.is_redirection() {
                if let Some(location) = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                {
                    if redirects >= request.max_redirects {
                        return Err(Error::Transport(format!(
                            "Maximum redirects ({}) exceeded",
                            request.max_redirects
                        )));
                    }
                    redirects += 1;
                    url = resolve_location(&url, location)?;
                    if status == StatusCode::SEE_OTHER
                        || (method == Method::POST
                            && matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND))
                    {
                        method = Method::GET;
                        body = None;
                    }
                    debug!(status = status.as_u16(), location = %url, "Following redirect");
                    continue;
                }
            }

            let mut headers = Headers::new();
            for (name, value) in response.headers() {
                let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
                headers
                    .entry(name.as_str().to_string())
                    .and_modify(|existing| {
                        existing.push_str(", ");
                        existing.push_str(&value);
                    })
                    .or_insert(value);
            }

            let raw = response
                .into_body()
                .collect()
                .await
                .map_err(|e| Error::Transport(e.to_string()))?
                .to_bytes()
                .to_vec();

            let mut res = Response::new(status.as_u16()).with_body_bytes(raw, request.parse_response_json);
            res.headers = headers;
            res.url = url;
            res.duration = start.elapsed().as_millis() as u64;
            return Ok(res);
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &PreparedRequest) -> Result<Response> {
        match tokio::time::timeout(request.timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(request.timeout.as_millis() as u64)),
        }
    }
}

fn resolve_location(current: &str, location: &str) -> Result<String> {
    let base = url::Url::parse(current)
        .map_err(|e| Error::InvalidRequest(format!("Invalid URL {current}: {e}")))?;
    base.join(location)
        .map(String::from)
        .map_err(|e| Error::Transport(format!("Invalid redirect location {location}: {e}")))
}

#[derive(Debug, Clone)]
enum MockReply {
    Respond(Response),
    Fail(String),
}

/// In-memory transport recording every request it is given
#[derive(Debug)]
pub struct MockTransport {
    requests: Mutex<Vec<PreparedRequest>>,
    reply: Mutex<MockReply>,
}

impl MockTransport {
    /// Answer every request with `200 OK` and an empty body
    pub fn new() -> Self {
        Self::responding(Response::new(200))
    }

    /// Answer every request with `response`
    pub fn responding(response: Response) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            reply: Mutex::new(MockReply::Respond(response)),
        }
    }

    /// Fail every request with a connection error
    pub fn failing<S: Into<String>>(message: S) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            reply: Mutex::new(MockReply::Fail(message.into())),
        }
    }

    /// Replace the canned response
    pub fn respond_with(&self, response: Response) {
        *self.reply.lock() = MockReply::Respond(response);
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<PreparedRequest> {
        self.requests.lock().clone()
    }

    /// Most recent request
    pub fn last_request(&self) -> Option<PreparedRequest> {
        self.requests.lock().last().cloned()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &PreparedRequest) -> Result<Response> {
        self.requests.lock().push(request.clone());
        match self.reply.lock().clone() {
            MockReply::Respond(mut response) => {
                if response.url.is_empty() {
                    response.url = request.url.clone();
                }
                Ok(response)
            }
            MockReply::Fail(message) => Err(Error::Transport(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(url: &str) -> PreparedRequest {
        PreparedRequest {
            method: "GET".to_string(),
            url: url.to_string(),
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            body: None,
            timeout: Duration::from_secs(5),
            follow_redirects: true,
            max_redirects: 5,
            parse_response_json: true,
        }
    }

    #[test]
    fn test_header_lookup() {
        let req = get("http://localhost/");
        assert_eq!(req.header("accept"), Some("application/json"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn test_resolve_location() {
        assert_eq!(
            resolve_location("http://a.test/users/1", "/login").unwrap(),
            "http://a.test/login"
        );
        assert_eq!(
            resolve_location("http://a.test/users/1", "http://b.test/x").unwrap(),
            "http://b.test/x"
        );
    }

    #[tokio::test]
    async fn test_mock_records_and_responds() {
        let mock = MockTransport::responding(Response::new(201));
        let res = mock.send(&get("http://localhost/a")).await.unwrap();
        assert_eq!(res.status, 201);
        assert_eq!(res.url, "http://localhost/a");
        assert_eq!(mock.requests().len(), 1);

        let mock = MockTransport::failing("connection refused");
        let err = mock.send(&get("http://localhost/a")).await.unwrap_err();
        assert!(matches!(err, Error::Transport(ref m) if m == "connection refused"));
        assert!(mock.last_request().is_some());
    }

    #[tokio::test]
    async fn test_https_is_rejected() {
        let err = HttpTransport::new()
            .send(&get("https://localhost/"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
