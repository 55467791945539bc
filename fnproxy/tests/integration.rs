//! Integration tests for the signing proxy
//!
//! A stand-in function URL verifies the SigV4 signature of every request it
//! receives, and the proxy is served on a real socket in front of it.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use fnproxy::{create_router, AppState, ProxyConfig};
use fnproxy_auth::verify_signature;
use tokio::net::TcpListener;

const ACCESS_KEY: &str = "AKIDEXAMPLE";
const SECRET_KEY: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

/// Function URL stand-in that only answers correctly signed requests
async fn function_url(State(secret): State<Arc<String>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();

    match verify_signature(&parts, &body, &secret, &Utc::now()) {
        Ok(auth) => Response::builder()
            .status(StatusCode::CREATED)
            .header("content-type", "text/plain")
            .header("x-amzn-requestid", "upstream-request-id")
            .header("connection", "x-foo")
            .header("x-foo", "hop-scoped")
            .header("x-signed-by", auth.access_key)
            .header("x-signed-scope", format!("{}/{}", auth.service, auth.region))
            .header(
                "x-security-token",
                parts
                    .headers
                    .get("x-amz-security-token")
                    .cloned()
                    .unwrap_or_else(|| "none".parse().unwrap()),
            )
            .body(Body::from(format!("{} {} from lambda", parts.method, parts.uri)))
            .unwrap(),
        Err(e) => (
            StatusCode::FORBIDDEN,
            [("x-amzn-errortype", "InvalidSignatureException")],
            format!(r#"{{"message":"{e}"}}"#),
        )
            .into_response(),
    }
}

/// Start the stand-in upstream and return its URL
async fn start_upstream() -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let router = Router::new()
        .route("/", get(function_url))
        .route(
            "/large",
            get(|| async { "x".repeat(1024 * 1024) }),
        )
        .with_state(Arc::new(SECRET_KEY.to_string()));

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{addr}"), handle)
}

/// Start the proxy and return its URL
async fn start_proxy(config: ProxyConfig) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let router = create_router(AppState::new(config));

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://{addr}"), handle)
}

fn config(function_url: String, secret: &str) -> ProxyConfig {
    ProxyConfig {
        function_url: Some(function_url),
        access_key_id: Some(ACCESS_KEY.to_string()),
        secret_access_key: Some(secret.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_get_root_returns_upstream_response_verbatim() {
    let (upstream, _upstream_handle) = start_upstream().await;
    let (proxy, _proxy_handle) = start_proxy(config(format!("{upstream}/"), SECRET_KEY)).await;

    let response = reqwest::get(format!("{proxy}/")).await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    assert_eq!(response.headers()["content-type"], "text/plain");
    assert_eq!(response.headers()["x-amzn-requestid"], "upstream-request-id");
    assert_eq!(response.headers()["x-signed-by"], ACCESS_KEY);
    assert_eq!(response.headers()["x-signed-scope"], "lambda/us-east-1");
    assert_eq!(response.headers()["x-security-token"], "none");
    assert_eq!(response.text().await.unwrap(), "GET / from lambda");
}

#[tokio::test]
async fn test_head_root_returns_upstream_headers_without_body() {
    let (upstream, _upstream_handle) = start_upstream().await;
    let (proxy, _proxy_handle) = start_proxy(config(format!("{upstream}/"), SECRET_KEY)).await;

    let response = reqwest::Client::new()
        .head(format!("{proxy}/"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    assert_eq!(response.headers()["content-type"], "text/plain");
    assert_eq!(response.headers()["x-amzn-requestid"], "upstream-request-id");
    assert_eq!(response.headers()["x-signed-by"], ACCESS_KEY);
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_connection_scoped_headers_are_not_relayed() {
    let (upstream, _upstream_handle) = start_upstream().await;
    let (proxy, _proxy_handle) = start_proxy(config(format!("{upstream}/"), SECRET_KEY)).await;

    let response = reqwest::get(format!("{proxy}/")).await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    assert!(response.headers().get("x-foo").is_none());
    assert!(response
        .headers()
        .get_all("connection")
        .iter()
        .all(|value| value != "x-foo"));
    assert_eq!(response.headers()["x-amzn-requestid"], "upstream-request-id");
}

#[tokio::test]
async fn test_inbound_request_details_are_not_forwarded() {
    let (upstream, _upstream_handle) = start_upstream().await;
    let (proxy, _proxy_handle) = start_proxy(config(format!("{upstream}/"), SECRET_KEY)).await;

    let response = reqwest::Client::new()
        .get(format!("{proxy}/?ignored=1"))
        .header("x-custom", "dropped")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    assert_eq!(response.text().await.unwrap(), "GET / from lambda");
}

#[tokio::test]
async fn test_session_token_is_sent_and_signed() {
    let (upstream, _upstream_handle) = start_upstream().await;
    let mut config = config(format!("{upstream}/"), SECRET_KEY);
    config.session_token = Some("session-token".to_string());
    config.region = Some("eu-west-1".to_string());
    let (proxy, _proxy_handle) = start_proxy(config).await;

    let response = reqwest::get(format!("{proxy}/")).await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    assert_eq!(response.headers()["x-security-token"], "session-token");
    assert_eq!(response.headers()["x-signed-scope"], "lambda/eu-west-1");
}

#[tokio::test]
async fn test_upstream_rejection_is_passed_through() {
    let (upstream, _upstream_handle) = start_upstream().await;
    let (proxy, _proxy_handle) =
        start_proxy(config(format!("{upstream}/"), "not-the-secret")).await;

    let response = reqwest::get(format!("{proxy}/")).await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    assert_eq!(
        response.headers()["x-amzn-errortype"],
        "InvalidSignatureException"
    );
    assert_eq!(
        response.text().await.unwrap(),
        r#"{"message":"Signature mismatch"}"#
    );
}

#[tokio::test]
async fn test_large_body_is_streamed_intact() {
    let (upstream, _upstream_handle) = start_upstream().await;
    let (proxy, _proxy_handle) =
        start_proxy(config(format!("{upstream}/large"), SECRET_KEY)).await;

    let response = reqwest::get(format!("{proxy}/")).await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.bytes().await.unwrap();
    assert_eq!(body.len(), 1024 * 1024);
    assert!(body.iter().all(|b| *b == b'x'));
}

#[tokio::test]
async fn test_unreachable_upstream_keeps_serving() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let (proxy, _proxy_handle) = start_proxy(config(format!("http://{dead}/"), SECRET_KEY)).await;

    for _ in 0..2 {
        let response = reqwest::get(format!("{proxy}/")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()["content-type"], "application/json");
    }
}

#[tokio::test]
async fn test_missing_configuration_and_unknown_routes() {
    let (proxy, _proxy_handle) = start_proxy(ProxyConfig::default()).await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{proxy}/")).send().await.unwrap();
    assert_eq!(
        response.status(),
        reqwest::StatusCode::INTERNAL_SERVER_ERROR
    );
    assert!(response
        .text()
        .await
        .unwrap()
        .contains("MissingConfiguration"));

    let response = client.get(format!("{proxy}/missing")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let response = client.post(format!("{proxy}/")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
