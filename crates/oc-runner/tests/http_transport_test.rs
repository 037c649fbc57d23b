//! HttpTransport against a local mock server

use oc_core::Error;
use oc_runner::{HttpTransport, PreparedRequest, Transport};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(method: &str, url: String) -> PreparedRequest {
    PreparedRequest {
        method: method.to_string(),
        url,
        headers: Vec::new(),
        body: None,
        timeout: Duration::from_secs(5),
        follow_redirects: true,
        max_redirects: 5,
        parse_response_json: true,
    }
}

#[tokio::test]
async fn test_json_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pets"))
        .and(query_param("limit", "2"))
        .and(header("accept", "application/json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"id": 1}, {"id": 2}]))
                .insert_header("X-Total", "2"),
        )
        .mount(&server)
        .await;

    let mut req = request("GET", format!("{}/pets?limit=2", server.uri()));
    req.headers.push(("Accept".to_string(), "application/json".to_string()));

    let res = HttpTransport::new().send(&req).await.unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.status_text, "OK");
    assert_eq!(res.data, json!([{"id": 1}, {"id": 2}]));
    assert_eq!(res.header("x-total"), Some("2"));
    assert_eq!(res.size, res.raw.len() as u64);
}

#[tokio::test]
async fn test_error_status_is_a_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pets"))
        .and(body_string("{\"name\":\"Rex\"}"))
        .respond_with(ResponseTemplate::new(422).set_body_string("invalid"))
        .mount(&server)
        .await;

    let mut req = request("POST", format!("{}/pets", server.uri()));
    req.body = Some(br#"{"name":"Rex"}"#.to_vec());

    let res = HttpTransport::new().send(&req).await.unwrap();
    assert_eq!(res.status, 422);
    assert_eq!(res.data, json!("invalid"));
}

#[tokio::test]
async fn test_redirects_are_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .mount(&server)
        .await;

    let res = HttpTransport::new()
        .send(&request("GET", format!("{}/old", server.uri())))
        .await
        .unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.url, format!("{}/new", server.uri()));

    let mut manual = request("GET", format!("{}/old", server.uri()));
    manual.follow_redirects = false;
    let res = HttpTransport::new().send(&manual).await.unwrap();
    assert_eq!(res.status, 302);
    assert_eq!(res.header("location"), Some("/new"));
}

#[tokio::test]
async fn test_redirect_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/loop"))
        .mount(&server)
        .await;

    let mut req = request("GET", format!("{}/loop", server.uri()));
    req.max_redirects = 2;
    let err = HttpTransport::new().send(&req).await.unwrap_err();
    assert!(matches!(err, Error::Transport(ref m) if m.contains("Maximum redirects (2)")));
}

#[tokio::test]
async fn test_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let mut req = request("GET", format!("{}/slow", server.uri()));
    req.timeout = Duration::from_millis(50);
    let err = HttpTransport::new().send(&req).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(50)));
}

#[tokio::test]
async fn test_connection_failure() {
    let err = HttpTransport::new()
        .send(&request("GET", "http://127.0.0.1:1/".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
}
