//! Error taxonomy for the agent gateway
//!
//! Every failure that crosses the gateway boundary is normalized into a
//! [`DomainError`]. Upstream failures are decoded once, at the trust boundary,
//! into [`ProviderError`] and then classified with [`classify`].

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Taxonomy member of a [`DomainError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller input was rejected
    Validation,
    /// Caller (or the gateway towards the provider) is not authenticated
    Authentication,
    /// Caller is authenticated but not allowed to touch the resource
    Authorization,
    /// Too many requests; carries a retry-after hint
    RateLimit,
    /// Upstream agent provider failed
    Provider,
    /// Anything that could not be classified
    Unknown,
}

impl ErrorKind {
    /// HTTP status used when no more specific status is known
    pub fn default_status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Authentication => 401,
            ErrorKind::Authorization => 403,
            ErrorKind::RateLimit => 429,
            ErrorKind::Provider => 502,
            ErrorKind::Unknown => 500,
        }
    }

    /// Stable machine-readable code
    pub fn default_code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => codes::VALIDATION,
            ErrorKind::Authentication => codes::AUTHENTICATION,
            ErrorKind::Authorization => codes::AUTHORIZATION,
            ErrorKind::RateLimit => codes::RATE_LIMIT,
            ErrorKind::Provider => codes::PROVIDER,
            ErrorKind::Unknown => codes::INTERNAL,
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            codes::VALIDATION => Some(ErrorKind::Validation),
            codes::AUTHENTICATION => Some(ErrorKind::Authentication),
            codes::AUTHORIZATION => Some(ErrorKind::Authorization),
            codes::RATE_LIMIT => Some(ErrorKind::RateLimit),
            codes::PROVIDER | codes::PROVIDER_TIMEOUT => Some(ErrorKind::Provider),
            codes::INTERNAL => Some(ErrorKind::Unknown),
            _ => None,
        }
    }
}

/// Stable error codes exposed on the wire
pub mod codes {
    pub const VALIDATION: &str = "VALIDATION_ERROR";
    pub const AUTHENTICATION: &str = "AUTHENTICATION_ERROR";
    pub const AUTHORIZATION: &str = "AUTHORIZATION_ERROR";
    pub const RATE_LIMIT: &str = "RATE_LIMIT_EXCEEDED";
    pub const PROVIDER: &str = "PROVIDER_ERROR";
    pub const PROVIDER_TIMEOUT: &str = "PROVIDER_TIMEOUT";
    pub const INTERNAL: &str = "INTERNAL_ERROR";
}

/// One field-level validation problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
    pub code: String,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: code.into(),
        }
    }
}

/// Normalized error crossing the gateway boundary
///
/// Fields are private so a classified error cannot be relabelled after the fact.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct DomainError {
    kind: ErrorKind,
    message: String,
    status: u16,
    code: String,
    details: Option<Value>,
    retry_after_secs: Option<u64>,
}

impl DomainError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: kind.default_status(),
            code: kind.default_code().to_string(),
            details: None,
            retry_after_secs: None,
        }
    }

    /// Input validation failure with per-field details
    pub fn validation(message: impl Into<String>, issues: Vec<FieldIssue>) -> Self {
        let mut err = Self::new(ErrorKind::Validation, message);
        if !issues.is_empty() {
            err.details = Some(json!(issues));
        }
        err
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        let mut err = Self::new(ErrorKind::RateLimit, message);
        err.retry_after_secs = retry_after_secs;
        err
    }

    /// Upstream failure; `status` must be a 5xx code
    pub fn provider(message: impl Into<String>, status: u16) -> Self {
        let mut err = Self::new(ErrorKind::Provider, message);
        err.status = if (500..600).contains(&status) { status } else { 502 };
        err
    }

    /// Caller deadline elapsed before the provider finished
    pub fn provider_timeout(elapsed_ms: u64) -> Self {
        let mut err = Self::new(
            ErrorKind::Provider,
            format!("Agent did not respond within {}ms", elapsed_ms),
        );
        err.status = 504;
        err.code = codes::PROVIDER_TIMEOUT.to_string();
        err
    }

    pub fn unknown(message: impl Into<String>, details: Option<Value>) -> Self {
        let mut err = Self::new(ErrorKind::Unknown, message);
        err.details = details;
        err
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after_secs
    }
}

/// Failure reported by (or while talking to) the agent provider
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("{message}")]
    InvalidRequest { message: String },

    #[error("{message}")]
    Authentication { message: String },

    #[error("{message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("{message}")]
    Other {
        message: String,
        status: Option<u16>,
        error_type: Option<String>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed provider response: {0}")]
    MalformedBody(String),

    #[error("Provider did not respond within {0}ms")]
    Timeout(u64),
}

impl ProviderError {
    /// Decode a provider-shaped JSON error body.
    ///
    /// Accepts `{type, message}`, `{error: {type, message}}` and the gateway's
    /// own wire shape `{message, code, statusCode}`. Returns `None` when the body
    /// carries no recognizable error.
    pub fn from_body(body: &Value, status: Option<u16>) -> Option<Self> {
        let obj = body.as_object()?;
        let inner = match obj.get("error") {
            Some(Value::Object(inner)) => inner,
            Some(Value::String(message)) => {
                return Some(Self::from_parts(None, message.clone(), status, None));
            }
            _ => obj,
        };

        let message = inner
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        let error_type = inner
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                inner
                    .get("code")
                    .and_then(Value::as_str)
                    .and_then(type_for_code)
                    .map(str::to_string)
            });
        let retry_after = retry_after_of(inner).or_else(|| retry_after_of(obj));

        if message.is_none() && error_type.is_none() {
            return None;
        }

        let message = message.unwrap_or_else(|| "Agent provider reported an error".to_string());
        Some(Self::from_parts(error_type.as_deref(), message, status, retry_after))
    }

    /// Build an error for a non-success HTTP response, parsing its body when possible.
    ///
    /// A body without an error type is classified by the status alone, so a
    /// bare `429 Too Many Requests` still reads as a rate limit.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|value| Self::from_body(&value, Some(status)))
            .unwrap_or_else(|| {
                Self::from_parts(
                    None,
                    format!("Agent service responded with status {}", status),
                    Some(status),
                    None,
                )
            })
    }

    /// Fill in a retry hint taken from the transport (e.g. a `Retry-After` header).
    ///
    /// A hint already present in the body wins.
    pub fn with_retry_after(self, hint: Option<u64>) -> Self {
        match self {
            ProviderError::RateLimited {
                message,
                retry_after_secs,
            } => ProviderError::RateLimited {
                message,
                retry_after_secs: retry_after_secs.or(hint),
            },
            other => other,
        }
    }

    fn from_parts(
        error_type: Option<&str>,
        message: String,
        status: Option<u16>,
        retry_after_secs: Option<u64>,
    ) -> Self {
        match error_type.or_else(|| status.and_then(type_for_status)) {
            Some("invalid_request_error") => ProviderError::InvalidRequest { message },
            Some("authentication_error") => ProviderError::Authentication { message },
            Some("rate_limit_error") => ProviderError::RateLimited {
                message,
                retry_after_secs,
            },
            other => ProviderError::Other {
                message,
                status,
                error_type: other.map(str::to_string),
            },
        }
    }
}

fn type_for_code(code: &str) -> Option<&'static str> {
    match code {
        codes::VALIDATION => Some("invalid_request_error"),
        codes::AUTHENTICATION => Some("authentication_error"),
        codes::RATE_LIMIT => Some("rate_limit_error"),
        _ => None,
    }
}

fn type_for_status(status: u16) -> Option<&'static str> {
    match status {
        400 => Some("invalid_request_error"),
        401 => Some("authentication_error"),
        429 => Some("rate_limit_error"),
        _ => None,
    }
}

/// Parse a `Retry-After` header value: delta-seconds or an HTTP date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let wait_ms = (at.with_timezone(&Utc) - now).num_milliseconds().max(0) as u64;
    Some(wait_ms.div_ceil(1000))
}

fn retry_after_of(obj: &serde_json::Map<String, Value>) -> Option<u64> {
    ["retry_after", "retryAfter", "retryAfterSeconds"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_u64))
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Transport(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            ProviderError::Transport(format!("Connection error: {}", err))
        } else if err.is_decode() {
            ProviderError::MalformedBody(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Any failure that has not yet been classified
#[derive(Debug, Clone)]
pub enum RawError {
    /// Already classified; passes through unchanged
    Domain(DomainError),
    /// Structured input validation failure
    Validation(Vec<FieldIssue>),
    /// Decoded provider failure
    Provider(ProviderError),
    /// Anything else, kept verbatim for diagnostics
    Unrecognized(Value),
}

impl From<DomainError> for RawError {
    fn from(err: DomainError) -> Self {
        RawError::Domain(err)
    }
}

impl From<ProviderError> for RawError {
    fn from(err: ProviderError) -> Self {
        RawError::Provider(err)
    }
}

impl From<Vec<FieldIssue>> for RawError {
    fn from(issues: Vec<FieldIssue>) -> Self {
        RawError::Validation(issues)
    }
}

/// Map any raw failure onto the taxonomy. Never fails.
pub fn classify(raw: impl Into<RawError>) -> DomainError {
    match raw.into() {
        RawError::Domain(err) => err,
        RawError::Validation(issues) => DomainError::validation("Validation failed", issues),
        RawError::Provider(err) => classify_provider(err),
        RawError::Unrecognized(value) => {
            tracing::warn!(details = %value, "Unclassified error reached the gateway boundary");
            DomainError::unknown("An unexpected error occurred", Some(value))
        }
    }
}

fn classify_provider(err: ProviderError) -> DomainError {
    match err {
        ProviderError::InvalidRequest { message } => DomainError::validation(message, Vec::new()),
        ProviderError::Authentication { message } => DomainError::authentication(message),
        ProviderError::RateLimited {
            message,
            retry_after_secs,
        } => DomainError::rate_limited(message, retry_after_secs),
        ProviderError::Other {
            message, status, ..
        } => {
            let status = match status {
                Some(s) if (500..600).contains(&s) => 502,
                _ => 500,
            };
            DomainError::provider(message, status)
        }
        ProviderError::Transport(message) => DomainError::provider(message, 502),
        ProviderError::MalformedBody(message) => {
            DomainError::provider(format!("Malformed provider response: {}", message), 502)
        }
        ProviderError::Timeout(ms) => DomainError::provider_timeout(ms),
    }
}

/// Classify an arbitrary JSON value (e.g. an error body of unknown origin)
pub fn classify_value(value: Value) -> DomainError {
    if let Some(err) = domain_error_from_wire(&value) {
        return err;
    }
    if let Some(issues) = issues_from_value(&value) {
        return classify(RawError::Validation(issues));
    }
    match ProviderError::from_body(&value, None) {
        Some(err) => classify(err),
        None => classify(RawError::Unrecognized(value)),
    }
}

fn domain_error_from_wire(value: &Value) -> Option<DomainError> {
    let body: ErrorBody = serde_json::from_value(value.clone()).ok()?;
    let kind = ErrorKind::from_code(&body.code)?;
    let retry_after_secs = body
        .details
        .as_ref()
        .and_then(|d| d.get("retryAfterSeconds"))
        .and_then(Value::as_u64);
    let details = body
        .details
        .filter(|d| !(kind == ErrorKind::RateLimit && d.get("retryAfterSeconds").is_some()));

    Some(DomainError {
        kind,
        message: body.message,
        status: body.status_code,
        code: body.code,
        details,
        retry_after_secs,
    })
}

fn issues_from_value(value: &Value) -> Option<Vec<FieldIssue>> {
    let issues = value.get("issues")?.as_array()?;
    let parsed: Vec<FieldIssue> = issues
        .iter()
        .filter_map(|issue| {
            let field = match issue.get("path") {
                Some(Value::Array(parts)) => parts
                    .iter()
                    .map(|p| match p {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("."),
                _ => issue.get("field")?.as_str()?.to_string(),
            };
            Some(FieldIssue {
                field,
                message: issue.get("message")?.as_str()?.to_string(),
                code: issue
                    .get("code")
                    .and_then(Value::as_str)
                    .unwrap_or("invalid")
                    .to_string(),
            })
        })
        .collect();
    (!parsed.is_empty()).then_some(parsed)
}

/// Wire representation of a failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// Render a domain error into its fixed wire shape
pub fn format(err: &DomainError) -> ErrorBody {
    let details = match (&err.details, err.retry_after_secs) {
        (Some(details), _) => Some(details.clone()),
        (None, Some(secs)) => Some(json!({ "retryAfterSeconds": secs })),
        (None, None) => None,
    };

    ErrorBody {
        message: err.message.clone(),
        code: err.code.clone(),
        status_code: err.status,
        details,
        timestamp: Utc::now(),
    }
}

impl IntoResponse for DomainError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(format(&self))).into_response();

        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, DomainError>;
