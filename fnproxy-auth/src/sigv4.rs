//! AWS Signature Version 4
//!
//! Outgoing requests are signed with `aws-sigv4`. The verifier recomputes
//! signatures on the receiving side.
//!
//! - [Signature Version 4 signing process](https://docs.aws.amazon.com/general/latest/gr/signature-version-4.html)

use std::borrow::Cow;
use std::time::SystemTime;

use aws_sigv4::http_request::{
    sign, PayloadChecksumKind, PercentEncodingMode, SignableBody, SignableRequest,
    SigningError, SigningSettings, UriPathNormalizationMode,
};
use aws_sigv4::sign::v4;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use http::header::{self, HeaderMap, HeaderValue, InvalidHeaderValue, ToStrError};
use http::request::Parts;
use http::{Method, Request, Uri};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::{Credentials, SigningScope};

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

pub const X_AMZ_DATE: &str = "x-amz-date";
pub const X_AMZ_SECURITY_TOKEN: &str = "x-amz-security-token";
pub const X_AMZ_CONTENT_SHA_256: &str = "x-amz-content-sha256";

/// Maximum distance between `x-amz-date` and the verifier's clock
const MAX_CLOCK_SKEW_SECS: i64 = 15 * 60;

/// Headers that proxies and clients are free to rewrite.
const UNSIGNABLE_HEADERS: [&str; 8] = [
    "authorization",
    "content-type",
    "content-length",
    "user-agent",
    "expect",
    "x-amzn-trace-id",
    "range",
    "connection",
];

/// URI encode every byte except the unreserved characters and `/`.
static URI_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Same as [`URI_ENCODE_SET`] but `/` is encoded too.
static QUERY_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Errors during signing or signature verification
#[derive(Debug, Error)]
pub enum SigV4Error {
    #[error("Missing authorization header")]
    MissingAuthHeader,

    #[error("Invalid authorization header format")]
    InvalidAuthFormat,

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Missing credential")]
    MissingCredential,

    #[error("Invalid credential format")]
    InvalidCredentialFormat,

    #[error("Missing signed headers")]
    MissingSignedHeaders,

    #[error("Signed header not present in request: {0}")]
    MissingSignedHeader(String),

    #[error("Missing signature")]
    MissingSignature,

    #[error("Missing x-amz-date header")]
    MissingDate,

    #[error("Invalid x-amz-date value: {0}")]
    InvalidDate(String),

    #[error("Request time too skewed")]
    RequestTimeTooSkewed,

    #[error("Signature mismatch")]
    SignatureMismatch,

    #[error("Request URI has no host")]
    MissingHost,

    #[error("Request path is not valid UTF-8 once decoded")]
    InvalidPath,

    #[error("Invalid signing parameters: {0}")]
    InvalidSigningParams(String),

    #[error("Signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] InvalidHeaderValue),

    #[error("Header value is not visible ASCII: {0}")]
    HeaderNotAscii(#[from] ToStrError),
}

/// Signs requests with AWS SigV4 using the `Authorization` header
#[derive(Debug, Clone)]
pub struct RequestSigner {
    scope: SigningScope,
    time: Option<DateTime<Utc>>,
}

impl RequestSigner {
    pub fn new(scope: SigningScope) -> Self {
        Self { scope, time: None }
    }

    /// Pin the signing time.
    ///
    /// Requests should always be signed with the current time, so only tests
    /// call this.
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn scope(&self) -> &SigningScope {
        &self.scope
    }

    /// Sign `req` in place.
    ///
    /// `payload` must be the exact body that will be sent with the request.
    pub fn sign<B>(
        &self,
        req: &mut Request<B>,
        payload: &[u8],
        credentials: &Credentials,
    ) -> Result<(), SigV4Error> {
        let now = self.time.unwrap_or_else(Utc::now);

        if !req.headers().contains_key(header::HOST) {
            let host = authority(req.uri())?;
            req.headers_mut()
                .insert(header::HOST, HeaderValue::from_str(&host)?);
        }

        let identity = aws_credential_types::Credentials::new(
            &credentials.access_key_id,
            &credentials.secret_access_key,
            credentials.session_token.clone(),
            None,
            "fnproxy",
        )
        .into();

        let mut settings = SigningSettings::default();
        settings.excluded_headers = Some(
            UNSIGNABLE_HEADERS
                .iter()
                .map(|name| Cow::Borrowed(*name))
                .collect(),
        );

        // S3 is the only service that accepts an unsigned payload.
        let body = if self.scope.service == "s3" {
            settings.percent_encoding_mode = PercentEncodingMode::Single;
            settings.uri_path_normalization_mode = UriPathNormalizationMode::Disabled;
            settings.payload_checksum_kind = PayloadChecksumKind::XAmzSha256;
            SignableBody::UnsignedPayload
        } else {
            SignableBody::Bytes(payload)
        };

        let params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.scope.region)
            .name(&self.scope.service)
            .time(SystemTime::from(now))
            .settings(settings)
            .build()
            .map_err(|e| SigV4Error::InvalidSigningParams(e.to_string()))?;

        let headers = req
            .headers()
            .iter()
            .map(|(name, value)| value.to_str().map(|value| (name.as_str(), value)))
            .collect::<Result<Vec<_>, _>>()?;
        let signable = SignableRequest::new(
            req.method().as_str(),
            req.uri().to_string(),
            headers.into_iter(),
            body,
        )?;
        let (instructions, _signature) = sign(signable, &params.into())?.into_parts();

        instructions.apply_to_request_http1x(req);
        for name in ["authorization", X_AMZ_SECURITY_TOKEN] {
            if let Some(value) = req.headers_mut().get_mut(name) {
                value.set_sensitive(true);
            }
        }
        debug!(
            "signed {} {} for {}/{}",
            req.method(),
            req.uri(),
            self.scope.service,
            self.scope.region
        );

        Ok(())
    }
}

/// Parsed SigV4 authorization header
#[derive(Debug)]
pub struct AuthorizationHeader {
    pub algorithm: String,
    pub access_key: String,
    pub date: String,
    pub region: String,
    pub service: String,
    pub signed_headers: Vec<String>,
    pub signature: String,
}

/// Parse an AWS SigV4 authorization header
///
/// Format: AWS4-HMAC-SHA256 Credential=AKID/DATE/REGION/SERVICE/aws4_request,
///         SignedHeaders=host;x-amz-date, Signature=HEX
pub fn parse_authorization_header(header: &str) -> Result<AuthorizationHeader, SigV4Error> {
    let Some((algorithm, components)) = header.trim().split_once(' ') else {
        return Err(SigV4Error::InvalidAuthFormat);
    };

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;

    for component in components.split(',') {
        let Some((key, value)) = component.trim().split_once('=') else {
            continue;
        };

        match key {
            "Credential" => credential = Some(value),
            "SignedHeaders" => signed_headers = Some(value),
            "Signature" => signature = Some(value),
            _ => {}
        }
    }

    let credential = credential.ok_or(SigV4Error::MissingCredential)?;
    let credential_parts: Vec<&str> = credential.split('/').collect();
    if credential_parts.len() != 5 || credential_parts[4] != "aws4_request" {
        return Err(SigV4Error::InvalidCredentialFormat);
    }

    let signed_headers = signed_headers.ok_or(SigV4Error::MissingSignedHeaders)?;
    let signature = signature.ok_or(SigV4Error::MissingSignature)?;

    Ok(AuthorizationHeader {
        algorithm: algorithm.to_string(),
        access_key: credential_parts[0].to_string(),
        date: credential_parts[1].to_string(),
        region: credential_parts[2].to_string(),
        service: credential_parts[3].to_string(),
        signed_headers: signed_headers.split(';').map(String::from).collect(),
        signature: signature.to_string(),
    })
}

/// Verify the SigV4 signature of a received request.
///
/// Returns the parsed authorization header so callers can look up or check
/// the access key.
pub fn verify_signature(
    parts: &Parts,
    payload: &[u8],
    secret_key: &str,
    now: &DateTime<Utc>,
) -> Result<AuthorizationHeader, SigV4Error> {
    let header = parts
        .headers
        .get(header::AUTHORIZATION)
        .ok_or(SigV4Error::MissingAuthHeader)?
        .to_str()?;
    let auth = parse_authorization_header(header)?;
    if auth.algorithm != ALGORITHM {
        return Err(SigV4Error::UnsupportedAlgorithm(auth.algorithm));
    }

    let amz_date = parts
        .headers
        .get(X_AMZ_DATE)
        .ok_or(SigV4Error::MissingDate)?
        .to_str()?;
    let timestamp = parse_amz_date(amz_date)?;
    if (*now - timestamp).num_seconds().abs() > MAX_CLOCK_SKEW_SECS {
        return Err(SigV4Error::RequestTimeTooSkewed);
    }
    if !amz_date.starts_with(&auth.date) {
        return Err(SigV4Error::InvalidCredentialFormat);
    }

    let payload_hash = match parts.headers.get(X_AMZ_CONTENT_SHA_256) {
        Some(value) => value.to_str()?.to_string(),
        None => hex_sha256(payload),
    };

    let scope = SigningScope::new(&auth.service, &auth.region);
    let creq = create_canonical_request(
        &parts.method,
        &parts.uri,
        &parts.headers,
        &auth.signed_headers,
        &payload_hash,
        &scope.service,
    )?;
    let string_to_sign =
        create_string_to_sign(amz_date, &credential_scope(&auth.date, &scope), &creq);

    let provided = hex::decode(&auth.signature).map_err(|_| SigV4Error::SignatureMismatch)?;
    let signing_key =
        derive_signing_key(secret_key, &auth.date, &scope.region, &scope.service);
    let mut mac = HmacSha256::new_from_slice(&signing_key).expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    mac.verify_slice(&provided)
        .map_err(|_| SigV4Error::SignatureMismatch)?;

    Ok(auth)
}

/// Parse a `YYYYMMDDTHHMMSSZ` timestamp
pub fn parse_amz_date(value: &str) -> Result<DateTime<Utc>, SigV4Error> {
    NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%SZ")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| SigV4Error::InvalidDate(value.to_string()))
}

/// Host header value for a URI: the port is kept only when it differs from
/// the scheme's default.
fn authority(uri: &Uri) -> Result<String, SigV4Error> {
    let host = uri.host().ok_or(SigV4Error::MissingHost)?;
    let default_port = match uri.scheme_str() {
        Some("https") => Some(443),
        Some("http") => Some(80),
        _ => None,
    };

    Ok(match uri.port_u16() {
        Some(port) if Some(port) != default_port => format!("{host}:{port}"),
        _ => host.to_string(),
    })
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Sign a string using HMAC-SHA256
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the signing key
fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// `20150830/us-east-1/lambda/aws4_request`
fn credential_scope(date: &str, scope: &SigningScope) -> String {
    format!("{}/{}/{}/aws4_request", date, scope.region, scope.service)
}

fn canonical_uri(path: &str, service: &str) -> Result<String, SigV4Error> {
    let path = if path.is_empty() { "/" } else { path };

    // S3 signs the path as sent. Every other service signs it normalized and
    // encoded twice.
    if service == "s3" {
        return encode_path(path);
    }
    let encoded = encode_path(&normalize_path(path))?;
    Ok(utf8_percent_encode(&encoded, &URI_ENCODE_SET).to_string())
}

fn encode_path(path: &str) -> Result<String, SigV4Error> {
    let decoded = percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| SigV4Error::InvalidPath)?;
    Ok(utf8_percent_encode(&decoded, &URI_ENCODE_SET).to_string())
}

/// Remove dot segments and merge repeated slashes (RFC 3986 section 5.2.4)
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }

    let mut normalized = format!("/{}", segments.join("/"));
    let ends_in_directory = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    if ends_in_directory && !segments.is_empty() {
        normalized.push('/');
    }
    normalized
}

fn canonical_query(query: Option<&str>) -> String {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return String::new();
    };

    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| {
            (
                utf8_percent_encode(&k, &QUERY_ENCODE_SET).to_string(),
                utf8_percent_encode(&v, &QUERY_ENCODE_SET).to_string(),
            )
        })
        .collect();
    pairs.sort();

    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn canonical_headers(headers: &HeaderMap, signed_headers: &[String]) -> Result<String, SigV4Error> {
    let mut canonical = String::new();
    for name in signed_headers {
        let values = headers
            .get_all(name.as_str())
            .iter()
            .map(|v| v.to_str().map(normalize_header_value))
            .collect::<Result<Vec<_>, _>>()?;
        if values.is_empty() {
            return Err(SigV4Error::MissingSignedHeader(name.clone()));
        }

        canonical.push_str(name);
        canonical.push(':');
        canonical.push_str(&values.join(","));
        canonical.push('\n');
    }
    Ok(canonical)
}

/// Trim and collapse sequential spaces
fn normalize_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Create the canonical request string
fn create_canonical_request(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    signed_headers: &[String],
    payload_hash: &str,
    service: &str,
) -> Result<String, SigV4Error> {
    Ok(format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.as_str(),
        canonical_uri(uri.path(), service)?,
        canonical_query(uri.query()),
        canonical_headers(headers, signed_headers)?,
        signed_headers.join(";"),
        payload_hash
    ))
}

/// Create the string to sign
fn create_string_to_sign(timestamp: &str, scope: &str, canonical_request: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        timestamp,
        scope,
        hex_sha256(canonical_request.as_bytes())
    )
}
