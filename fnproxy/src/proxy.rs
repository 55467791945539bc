//! Signing forwarder for the Lambda Function URL

use axum::{body::Body, response::Response};
use bytes::Bytes;
use fnproxy_auth::{RequestSigner, SigV4Error};
use fnproxy_core::{ErrorCode, ProxyError};
use http::{header, HeaderMap, Method, Request};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::UpstreamTarget;

/// Headers that only apply to a single connection and are never relayed.
const HOP_BY_HOP_HEADERS: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Failed to build upstream request: {0}")]
    Build(#[from] http::Error),

    #[error("Failed to sign upstream request: {0}")]
    Signing(#[from] SigV4Error),

    #[error("Upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl From<ForwardError> for ProxyError {
    fn from(err: ForwardError) -> Self {
        let code = match &err {
            ForwardError::Build(_) | ForwardError::Signing(_) => ErrorCode::SigningFailed,
            ForwardError::Request(e) if e.is_builder() => ErrorCode::SigningFailed,
            ForwardError::Request(_) => ErrorCode::UpstreamUnreachable,
        };
        ProxyError::new(code, err.to_string())
    }
}

/// Signs and sends requests to the function URL
#[derive(Debug, Clone)]
pub struct LambdaForwarder {
    client: reqwest::Client,
}

impl Default for LambdaForwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl LambdaForwarder {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Issue a signed `GET` to the target and relay its response.
    ///
    /// Nothing from the inbound request is forwarded. Status, headers and
    /// body of the upstream response are passed through, the body streamed.
    pub async fn forward(&self, target: &UpstreamTarget) -> Result<Response, ForwardError> {
        let mut request = Request::builder()
            .method(Method::GET)
            .uri(target.url.as_str())
            .body(Bytes::new())?;

        RequestSigner::new(target.scope.clone()).sign(
            &mut request,
            &[],
            &target.credentials,
        )?;
        debug!(url = %target.url, "Signed upstream request");

        let upstream = self
            .client
            .execute(reqwest::Request::try_from(request)?)
            .await?;
        info!(status = %upstream.status(), "Upstream responded");

        Ok(relay_response(upstream))
    }
}

fn relay_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Remove hop-by-hop headers, including any named by `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    for name in listed.iter().map(String::as_str).chain(HOP_BY_HOP_HEADERS) {
        headers.remove(name);
    }
}
