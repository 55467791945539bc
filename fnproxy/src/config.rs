//! Configuration management

use clap::Args;
use fnproxy_auth::{Credentials, SigningScope};
use fnproxy_core::{ErrorCode, ProxyError};
use std::fmt;
use url::Url;

pub const FUNCTION_URL_ENV: &str = "AWS_Lambda_Function_URL";
pub const ACCESS_KEY_ID_ENV: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";

/// Upstream and signing settings
///
/// Required values are `Option`s: their absence is reported when `GET /` is
/// served, not at startup.
#[derive(Args, Clone, Default)]
pub struct ProxyConfig {
    /// Lambda Function URL that requests are forwarded to
    #[arg(long, env = "AWS_Lambda_Function_URL")]
    pub function_url: Option<String>,

    /// Access key ID used to sign upstream requests
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    /// Secret access key used to sign upstream requests
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    /// Session token for temporary credentials
    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    pub session_token: Option<String>,

    /// Signing region (inferred from the function URL when unset)
    #[arg(long, env = "FNPROXY_REGION")]
    pub region: Option<String>,

    /// Signing service (inferred from the function URL when unset)
    #[arg(long, env = "FNPROXY_SERVICE")]
    pub service: Option<String>,
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("ProxyConfig")
            .field("function_url", &self.function_url)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &redacted(&self.secret_access_key))
            .field("session_token", &redacted(&self.session_token))
            .field("region", &self.region)
            .field("service", &self.service)
            .finish()
    }
}

/// Everything needed to issue one signed upstream request
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    pub url: Url,
    pub credentials: Credentials,
    pub scope: SigningScope,
}

impl ProxyConfig {
    /// Names of required values that are not set
    pub fn missing(&self) -> Vec<&'static str> {
        [
            (FUNCTION_URL_ENV, &self.function_url),
            (ACCESS_KEY_ID_ENV, &self.access_key_id),
            (SECRET_ACCESS_KEY_ENV, &self.secret_access_key),
        ]
        .into_iter()
        .filter(|(_, value)| non_empty(value.as_deref()).is_none())
        .map(|(name, _)| name)
        .collect()
    }

    /// Resolve the configuration into an upstream target
    pub fn resolve(&self) -> Result<UpstreamTarget, ProxyError> {
        let function_url = required(&self.function_url, FUNCTION_URL_ENV)?;
        let access_key_id = required(&self.access_key_id, ACCESS_KEY_ID_ENV)?;
        let secret_access_key = required(&self.secret_access_key, SECRET_ACCESS_KEY_ENV)?;

        let url = Url::parse(function_url).map_err(|e| {
            ProxyError::new(
                ErrorCode::InvalidConfiguration,
                format!("{FUNCTION_URL_ENV} is not a valid URL: {e}"),
            )
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProxyError::new(
                ErrorCode::InvalidConfiguration,
                format!("{FUNCTION_URL_ENV} must use http or https, got {}", url.scheme()),
            ));
        }
        let host = url.host_str().ok_or_else(|| {
            ProxyError::new(
                ErrorCode::InvalidConfiguration,
                format!("{FUNCTION_URL_ENV} has no host"),
            )
        })?;

        let scope = SigningScope::infer(host).with_overrides(
            non_empty(self.service.as_deref()),
            non_empty(self.region.as_deref()),
        );

        let mut credentials = Credentials::new(access_key_id, secret_access_key);
        if let Some(token) = non_empty(self.session_token.as_deref()) {
            credentials = credentials.with_session_token(token);
        }

        Ok(UpstreamTarget {
            url,
            credentials,
            scope,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ProxyError> {
    non_empty(value.as_deref()).ok_or_else(|| ProxyError::missing_configuration(name))
}
