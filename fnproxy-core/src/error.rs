//! Proxy error types and formatting

use serde::Serialize;
use thiserror::Error;

/// Error codes returned by the proxy itself
///
/// Errors returned by the upstream function are passed through untouched and
/// never mapped onto these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Configuration
    MissingConfiguration,
    InvalidConfiguration,

    // Signing
    SigningFailed,

    // Upstream
    UpstreamUnreachable,

    // Routing
    NotFound,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingConfiguration => "MissingConfiguration",
            Self::InvalidConfiguration => "InvalidConfiguration",
            Self::SigningFailed => "SigningFailed",
            Self::UpstreamUnreachable => "UpstreamUnreachable",
            Self::NotFound => "NotFound",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::MissingConfiguration | Self::InvalidConfiguration | Self::SigningFailed => 500,
            Self::UpstreamUnreachable => 502,
            Self::NotFound => 404,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error produced locally while serving a request
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ProxyError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
}

impl ProxyError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: None,
        }
    }

    pub fn missing_configuration(name: &str) -> Self {
        Self::new(
            ErrorCode::MissingConfiguration,
            format!("required configuration value {name} is not set"),
        )
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Format as a JSON error body
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct JsonError<'a> {
            code: &'a str,
            message: &'a str,
            #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
            request_id: Option<&'a str>,
        }

        let error = JsonError {
            code: self.code.as_str(),
            message: &self.message,
            request_id: self.request_id.as_deref(),
        };

        serde_json::to_string(&error).unwrap_or_else(|_| {
            format!(r#"{{"code":"{}","message":"{}"}}"#, self.code.as_str(), self.message)
        })
    }
}
