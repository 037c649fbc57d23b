//! Request defaults, interpolation and wire preparation
//!
//! A request goes through three steps before it reaches a [`Transport`]:
//!
//! 1. [`apply_defaults`] layers collection and folder defaults under it
//! 2. [`interpolate_request`] substitutes `{{placeholders}}`
//! 3. [`prepare`] encodes params, body and auth into a [`PreparedRequest`]
//!
//! [`Transport`]: crate::transport::Transport

use crate::transport::PreparedRequest;
use base64::Engine as _;
use oc_config::TransportConfig;
use oc_core::{
    ApiKeyPlacement, Auth, Error, Folder, FormEntry, HttpHeader, HttpRequest, HttpRequestBody,
    HttpRequestParam, OpenCollection, ParamKind, RequestDefaults, Result,
};
use oc_scripting::VariableStore;
use std::time::Duration;

/// Layer collection and folder defaults under `request`.
///
/// Headers are merged outermost first and the request's own headers win
/// (names compared case-insensitively). Auth that is absent or `inherit`
/// comes from the innermost folder, then the collection. Unset settings
/// fall back the same way.
pub fn apply_defaults(
    request: &HttpRequest,
    collection: &OpenCollection,
    folders: &[&Folder],
) -> HttpRequest {
    let layers: Vec<&RequestDefaults> = std::iter::once(&collection.request)
        .chain(folders.iter().map(|f| &f.request))
        .collect();

    let mut merged = request.clone();

    let mut headers: Vec<HttpHeader> = Vec::new();
    let inherited = layers.iter().flat_map(|layer| layer.headers.iter());
    for header in inherited.chain(request.headers.iter()) {
        if header.disabled {
            continue;
        }
        headers.retain(|h| !h.name.eq_ignore_ascii_case(&header.name));
        headers.push(header.clone());
    }
    merged.headers = headers;

    if matches!(request.auth, None | Some(Auth::Inherit)) {
        merged.auth = layers
            .iter()
            .rev()
            .filter_map(|layer| layer.auth.as_ref())
            .find(|auth| !matches!(auth, Auth::Inherit))
            .cloned();
    }

    let settings = &mut merged.settings;
    for layer in layers.iter().rev() {
        let defaults = &layer.settings.http;
        settings.timeout = settings.timeout.or(defaults.timeout);
        settings.follow_redirects = settings.follow_redirects.or(defaults.follow_redirects);
        settings.max_redirects = settings.max_redirects.or(defaults.max_redirects);
        settings.encode_url = settings.encode_url.or(defaults.encode_url);
    }

    merged
}

/// Substitute placeholders in url, headers, params, body and auth
pub fn interpolate_request(request: &HttpRequest, vars: &VariableStore) -> HttpRequest {
    let text = |s: &str| vars.interpolate_str(s);
    let form = |entries: &[FormEntry]| -> Vec<FormEntry> {
        entries
            .iter()
            .map(|entry| FormEntry {
                name: text(&entry.name),
                value: text(&entry.value),
                disabled: entry.disabled,
            })
            .collect()
    };

    let mut out = request.clone();
    out.url = text(&request.url);
    out.headers = request
        .headers
        .iter()
        .map(|h| HttpHeader {
            name: text(&h.name),
            value: text(&h.value),
            disabled: h.disabled,
        })
        .collect();
    out.params = request
        .params
        .iter()
        .map(|p| HttpRequestParam {
            name: text(&p.name),
            value: text(&p.value),
            kind: p.kind,
            disabled: p.disabled,
        })
        .collect();

    out.body = request.body.as_ref().map(|body| match body {
        HttpRequestBody::Json { data } => HttpRequestBody::Json { data: text(data) },
        HttpRequestBody::Text { data } => HttpRequestBody::Text { data: text(data) },
        HttpRequestBody::Xml { data } => HttpRequestBody::Xml { data: text(data) },
        HttpRequestBody::Sparql { data } => HttpRequestBody::Sparql { data: text(data) },
        HttpRequestBody::FormUrlEncoded { data } => {
            HttpRequestBody::FormUrlEncoded { data: form(data) }
        }
        HttpRequestBody::MultipartForm { data } => {
            HttpRequestBody::MultipartForm { data: form(data) }
        }
        HttpRequestBody::File { data } => HttpRequestBody::File {
            data: data
                .iter()
                .map(|entry| {
                    let mut entry = entry.clone();
                    entry.file_path = text(&entry.file_path);
                    entry
                })
                .collect(),
        },
    });

    out.auth = request.auth.as_ref().map(|auth| match auth {
        Auth::Basic { username, password } => Auth::Basic {
            username: text(username),
            password: text(password),
        },
        Auth::Digest { username, password } => Auth::Digest {
            username: text(username),
            password: text(password),
        },
        Auth::Bearer { token } => Auth::Bearer { token: text(token) },
        Auth::Apikey {
            key,
            value,
            placement,
        } => Auth::Apikey {
            key: text(key),
            value: text(value),
            placement: *placement,
        },
        other => other.clone(),
    });

    out
}

/// Encode an interpolated request for the wire
pub async fn prepare(
    request: &HttpRequest,
    config: &TransportConfig,
    parse_response_json: bool,
) -> Result<PreparedRequest> {
    let method = request.method.trim().to_ascii_uppercase();
    if method.is_empty() || http::Method::from_bytes(method.as_bytes()).is_err() {
        return Err(Error::InvalidRequest(format!("Invalid method: {}", request.method)));
    }

    let mut headers: Vec<(String, String)> = request
        .enabled_headers()
        .map(|h| (h.name.clone(), h.value.clone()))
        .collect();

    let mut query: Vec<(String, String)> = request
        .params
        .iter()
        .filter(|p| !p.disabled && p.kind == ParamKind::Query)
        .map(|p| (p.name.clone(), p.value.clone()))
        .collect();

    match &request.auth {
        Some(Auth::Basic { username, password }) => {
            let credentials = base64::engine::general_purpose::STANDARD
                .encode(format!("{username}:{password}"));
            set_header(&mut headers, "Authorization", format!("Basic {credentials}"));
        }
        Some(Auth::Bearer { token }) => {
            set_header(&mut headers, "Authorization", format!("Bearer {token}"));
        }
        Some(Auth::Apikey {
            key,
            value,
            placement,
        }) if !key.is_empty() => match placement {
            ApiKeyPlacement::Header => set_header(&mut headers, key, value.clone()),
            ApiKeyPlacement::Query => query.push((key.clone(), value.clone())),
        },
        _ => {}
    }

    let url = build_url(request, &query)?;

    let body = match &request.body {
        None => None,
        Some(body) => {
            let (bytes, content_type) = encode_body(body).await?;
            match body {
                HttpRequestBody::MultipartForm { .. } => {
                    set_header(&mut headers, "Content-Type", content_type)
                }
                _ if header_index(&headers, "Content-Type").is_none() => {
                    headers.push(("Content-Type".to_string(), content_type))
                }
                _ => {}
            }
            Some(bytes)
        }
    };

    let settings = &request.settings;
    Ok(PreparedRequest {
        method,
        url,
        headers,
        body,
        timeout: settings
            .timeout
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(config.timeout),
        follow_redirects: settings.follow_redirects.unwrap_or(config.follow_redirects),
        max_redirects: settings.max_redirects.unwrap_or(config.max_redirects),
        parse_response_json,
    })
}

fn header_index(headers: &[(String, String)], name: &str) -> Option<usize> {
    headers.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    match header_index(headers, name) {
        Some(i) => headers[i].1 = value,
        None => headers.push((name.to_string(), value)),
    }
}

/// Substitute `:name` path segments, append query pairs and normalize
fn build_url(request: &HttpRequest, query: &[(String, String)]) -> Result<String> {
    let raw = request.url.trim();
    if raw.is_empty() {
        return Err(Error::InvalidRequest("URL is empty".to_string()));
    }

    let mut url = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };

    let path_params: Vec<&HttpRequestParam> = request
        .params
        .iter()
        .filter(|p| !p.disabled && p.kind == ParamKind::Path)
        .collect();
    if !path_params.is_empty() {
        let split = url.find(['?', '#']).unwrap_or(url.len());
        let (path, rest) = url.split_at(split);
        let path = path
            .split('/')
            .map(|segment| {
                segment
                    .strip_prefix(':')
                    .and_then(|name| path_params.iter().find(|p| p.name == name))
                    .map(|p| p.value.as_str())
                    .unwrap_or(segment)
            })
            .collect::<Vec<_>>()
            .join("/");
        url = format!("{path}{rest}");
    }

    if !query.is_empty() {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in query {
            serializer.append_pair(name, value);
        }
        let encoded = serializer.finish();
        let (base, fragment) = match url.find('#') {
            Some(i) => url.split_at(i),
            None => (url.as_str(), ""),
        };
        let separator = match base.find('?') {
            Some(i) if i + 1 == base.len() || base.ends_with('&') => "",
            Some(_) => "&",
            None => "?",
        };
        url = format!("{base}{separator}{encoded}{fragment}");
    }

    let parsed = url::Url::parse(&url)
        .map_err(|e| Error::InvalidRequest(format!("Invalid URL {url}: {e}")))?;
    match parsed.host_str() {
        Some(host) if !has_unresolved_placeholder(host) => {}
        _ => return Err(Error::InvalidRequest(format!("Invalid URL host: {url}"))),
    }

    if request.settings.encode_url == Some(false) {
        return Ok(url);
    }
    Ok(parsed.into())
}

/// Braces survive in a host only when `{{name}}` went unresolved, possibly
/// percent-encoded by the parser
fn has_unresolved_placeholder(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host.contains(['{', '}']) || host.contains("%7b") || host.contains("%7d")
}

async fn encode_body(body: &HttpRequestBody) -> Result<(Vec<u8>, String)> {
    let content_type = body.content_type().to_string();
    match body {
        HttpRequestBody::Json { data }
        | HttpRequestBody::Text { data }
        | HttpRequestBody::Xml { data }
        | HttpRequestBody::Sparql { data } => Ok((data.clone().into_bytes(), content_type)),
        HttpRequestBody::FormUrlEncoded { data } => {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for entry in data.iter().filter(|e| !e.disabled) {
                serializer.append_pair(&entry.name, &entry.value);
            }
            Ok((serializer.finish().into_bytes(), content_type))
        }
        HttpRequestBody::MultipartForm { data } => {
            let boundary = format!("----oc-{}", uuid::Uuid::new_v4().simple());
            let mut out = String::new();
            for entry in data.iter().filter(|e| !e.disabled) {
                out.push_str(&format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    entry.name.replace('"', "%22"),
                    entry.value
                ));
            }
            out.push_str(&format!("--{boundary}--\r\n"));
            Ok((
                out.into_bytes(),
                format!("multipart/form-data; boundary={boundary}"),
            ))
        }
        HttpRequestBody::File { data } => {
            let Some(entry) = data.iter().find(|e| e.selected).or_else(|| data.first()) else {
                return Ok((Vec::new(), content_type));
            };
            let bytes = tokio::fs::read(&entry.file_path).await.map_err(|e| {
                Error::InvalidRequest(format!("Cannot read body file {}: {e}", entry.file_path))
            })?;
            let content_type = if entry.content_type.is_empty() {
                content_type
            } else {
                entry.content_type.clone()
            };
            Ok((bytes, content_type))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_core::{HttpRequestSettings, VariableValue};

    fn param(name: &str, value: &str, kind: ParamKind) -> HttpRequestParam {
        HttpRequestParam {
            name: name.to_string(),
            value: value.to_string(),
            kind,
            disabled: false,
        }
    }

    #[test]
    fn test_request_headers_win_over_defaults() {
        let mut collection = OpenCollection::new("c");
        collection.request.headers = vec![
            HttpHeader::new("Accept", "text/plain"),
            HttpHeader::new("X-Team", "core"),
        ];
        collection.request.settings.http = HttpRequestSettings {
            timeout: Some(2500),
            ..Default::default()
        };
        let request = HttpRequest::new("GET", "http://a.test").with_header("accept", "application/json");

        let merged = apply_defaults(&request, &collection, &[]);
        let names: Vec<_> = merged.headers.iter().map(|h| h.value.as_str()).collect();
        assert_eq!(names, vec!["core", "application/json"]);
        assert_eq!(merged.settings.timeout, Some(2500));
    }

    #[test]
    fn test_auth_is_inherited_from_innermost() {
        let mut collection = OpenCollection::new("c");
        collection.request.auth = Some(Auth::Bearer {
            token: "root".to_string(),
        });
        let mut folder = Folder::default();
        folder.request.auth = Some(Auth::Bearer {
            token: "folder".to_string(),
        });

        let request = HttpRequest::new("GET", "http://a.test");
        let merged = apply_defaults(&request, &collection, &[&folder]);
        assert_eq!(
            merged.auth,
            Some(Auth::Bearer {
                token: "folder".to_string()
            })
        );

        let mut own = request.clone();
        own.auth = Some(Auth::None);
        assert_eq!(apply_defaults(&own, &collection, &[&folder]).auth, Some(Auth::None));
    }

    #[test]
    fn test_interpolation_covers_all_parts() {
        let vars = VariableStore::new();
        vars.set_var("host", VariableValue::string("api.test")).unwrap();
        vars.set_var("token", VariableValue::string("t0k")).unwrap();
        vars.set_var("id", VariableValue::Num(7.into())).unwrap();

        let mut request = HttpRequest::new("GET", "http://{{host}}/users/:id")
            .with_header("X-Id", "{{id}}")
            .with_body(HttpRequestBody::Json {
                data: r#"{"id": {{id}}}"#.to_string(),
            });
        request.params.push(param("id", "{{id}}", ParamKind::Path));
        request.auth = Some(Auth::Bearer {
            token: "{{token}}".to_string(),
        });

        let out = interpolate_request(&request, &vars);
        assert_eq!(out.url, "http://api.test/users/:id");
        assert_eq!(out.header("x-id"), Some("7"));
        assert_eq!(out.params[0].value, "7");
        assert_eq!(out.body.as_ref().and_then(|b| b.raw_text()), Some(r#"{"id": 7}"#));
        assert_eq!(
            out.auth,
            Some(Auth::Bearer {
                token: "t0k".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_prepare_params_and_auth() {
        let mut request = HttpRequest::new("get", "api.test/users/:id?active=1");
        request.params = vec![
            param("id", "42", ParamKind::Path),
            param("q", "a b", ParamKind::Query),
            HttpRequestParam {
                disabled: true,
                ..param("skip", "1", ParamKind::Query)
            },
        ];
        request.auth = Some(Auth::Basic {
            username: "user".to_string(),
            password: "pass".to_string(),
        });

        let prepared = prepare(&request, &TransportConfig::default(), true)
            .await
            .unwrap();
        assert_eq!(prepared.method, "GET");
        assert_eq!(prepared.url, "http://api.test/users/42?active=1&q=a+b");
        assert_eq!(prepared.header("authorization"), Some("Basic dXNlcjpwYXNz"));
        assert_eq!(prepared.timeout, TransportConfig::default().timeout);
    }

    #[tokio::test]
    async fn test_prepare_api_key_query() {
        let mut request = HttpRequest::new("GET", "http://api.test/");
        request.auth = Some(Auth::Apikey {
            key: "api_key".to_string(),
            value: "s3cret".to_string(),
            placement: ApiKeyPlacement::Query,
        });
        let prepared = prepare(&request, &TransportConfig::default(), true)
            .await
            .unwrap();
        assert_eq!(prepared.url, "http://api.test/?api_key=s3cret");
        assert!(prepared.header("api_key").is_none());
    }

    #[tokio::test]
    async fn test_prepare_bodies() {
        let form = HttpRequest::new("POST", "http://api.test/").with_body(
            HttpRequestBody::FormUrlEncoded {
                data: vec![
                    FormEntry {
                        name: "a".to_string(),
                        value: "1 2".to_string(),
                        disabled: false,
                    },
                    FormEntry {
                        name: "b".to_string(),
                        value: "x".to_string(),
                        disabled: true,
                    },
                ],
            },
        );
        let prepared = prepare(&form, &TransportConfig::default(), true).await.unwrap();
        assert_eq!(prepared.body_text().as_deref(), Some("a=1+2"));
        assert_eq!(
            prepared.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );

        let multipart = HttpRequest::new("POST", "http://api.test/").with_body(
            HttpRequestBody::MultipartForm {
                data: vec![FormEntry {
                    name: "field".to_string(),
                    value: "value".to_string(),
                    disabled: false,
                }],
            },
        );
        let prepared = prepare(&multipart, &TransportConfig::default(), true)
            .await
            .unwrap();
        let content_type = prepared.header("content-type").unwrap().to_string();
        let boundary = content_type
            .strip_prefix("multipart/form-data; boundary=")
            .unwrap();
        let body = prepared.body_text().unwrap();
        assert!(body.starts_with(&format!("--{boundary}\r\n")));
        assert!(body.contains("name=\"field\"\r\n\r\nvalue\r\n"));
        assert!(body.ends_with(&format!("--{boundary}--\r\n")));

        let json = HttpRequest::new("POST", "http://api.test/")
            .with_header("Content-Type", "application/vnd.api+json")
            .with_body(HttpRequestBody::Json {
                data: "{}".to_string(),
            });
        let prepared = prepare(&json, &TransportConfig::default(), true).await.unwrap();
        assert_eq!(prepared.header("content-type"), Some("application/vnd.api+json"));
    }

    #[tokio::test]
    async fn test_prepare_rejects_bad_input() {
        let bad_method = HttpRequest::new("GE T", "http://api.test/");
        assert!(matches!(
            prepare(&bad_method, &TransportConfig::default(), true).await,
            Err(Error::InvalidRequest(_))
        ));

        let empty_url = HttpRequest::new("GET", "  ");
        assert!(matches!(
            prepare(&empty_url, &TransportConfig::default(), true).await,
            Err(Error::InvalidRequest(_))
        ));

        let mut unresolved = HttpRequest::new("GET", "{{base}}/pets");
        assert!(matches!(
            prepare(&unresolved, &TransportConfig::default(), true).await,
            Err(Error::InvalidRequest(_))
        ));
        unresolved.settings.encode_url = Some(false);
        assert!(matches!(
            prepare(&unresolved, &TransportConfig::default(), true).await,
            Err(Error::InvalidRequest(_))
        ));

        let unresolved_path = HttpRequest::new("GET", "http://api.test/{{id}}");
        assert!(prepare(&unresolved_path, &TransportConfig::default(), true)
            .await
            .is_ok());
    }
}
