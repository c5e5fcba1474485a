//! Type definitions for the proxy module

use axum::http::{HeaderMap, Method, StatusCode, Uri};
use chrono::{DateTime, Utc};
use derive_more::Display;
use nutype::nutype;
use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ========== Size Types ==========

/// Maximum number of bytes the proxy will buffer from an origin response
#[nutype(
    derive(Clone, Copy, Debug, Display, PartialEq, TryFrom, AsRef),
    validate(predicate = |size: &usize| *size > 0),
)]
pub struct BodySizeLimit(usize);

// ========== Identifier Types ==========

/// Request ID used to correlate logs, responses and error bodies
#[nutype(derive(Clone, Copy, Debug, Display, PartialEq, Serialize, AsRef))]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new RequestId backed by a v7 UUID
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

/// Base URL of an upstream backend
#[nutype(
    sanitize(trim),
    validate(predicate = |s: &str| s.starts_with("http://") || s.starts_with("https://")),
    derive(Clone, Debug, Display, PartialEq, TryFrom, AsRef),
)]
pub struct TargetUrl(String);

/// The backend a request is dispatched to
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize)]
pub enum BackendKind {
    #[display("origin")]
    Origin,
    #[display("gateway")]
    Gateway,
}

// ========== Constants ==========

/// Authorization header prefix for bearer tokens
pub const BEARER_PREFIX: &str = "Bearer ";

/// Default path when none is specified
pub const DEFAULT_PATH: &str = "/";

/// Path prefix routed to the API gateway
pub const API_PATH_PREFIX: &str = "/api";

/// Proxy configuration
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Deadline for a single backend round trip
    pub request_timeout: Duration,
    /// Largest origin body buffered for caching
    pub max_body_size: BodySizeLimit,
    /// Whether identity cookies carry the `Secure` attribute
    pub secure_cookies: bool,
    /// Token that unlocks cache warmup and purge
    pub warmup_token: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_body_size: BodySizeLimit::try_new(10 * 1024 * 1024).expect("10MB is valid"),
            secure_cookies: false,
            warmup_token: None,
        }
    }
}

// ========== Errors ==========

/// Diagnostic details attached to every proxy error.
///
/// Only the request ID is ever echoed to the client; the rest is for logs.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorContext {
    pub url: String,
    pub method: String,
    pub user_agent: Option<String>,
    pub ip: Option<IpAddr>,
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    pub fn new(method: &Method, uri: &Uri, headers: &HeaderMap, ip: Option<IpAddr>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };

        Self {
            url: uri.to_string(),
            method: method.to_string(),
            user_agent: header(axum::http::header::USER_AGENT.as_str()),
            ip,
            request_id: header(crate::proxy::headers::X_REQUEST_ID),
            timestamp: Utc::now(),
        }
    }
}

/// Failure classes with a stable machine code and HTTP status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Cache,
    ProxyRequest,
    RateLimit,
    ServiceUnavailable,
    ServiceTimeout,
    Connection,
    ExternalService,
    Unauthorized,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Cache => "CACHE_ERROR",
            ErrorKind::ProxyRequest => "PROXY_REQUEST_ERROR",
            ErrorKind::RateLimit => "RATE_LIMIT_EXCEEDED",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::ServiceTimeout => "SERVICE_TIMEOUT",
            ErrorKind::Connection => "CONNECTION_ERROR",
            ErrorKind::ExternalService => "EXTERNAL_SERVICE_ERROR",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::ServiceUnavailable | ErrorKind::Connection => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::ServiceTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::ExternalService | ErrorKind::ProxyRequest => StatusCode::BAD_GATEWAY,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Cache | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors that can occur in the proxy
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ProxyError {
    kind: ErrorKind,
    message: String,
    context: Option<ErrorContext>,
}

impl ProxyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    pub fn cache(operation: &str, detail: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::Cache, format!("Cache {operation} failed: {detail}"))
    }

    pub fn proxy_request(target: BackendKind, detail: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::ProxyRequest,
            format!("Could not build request for {target}: {detail}"),
        )
    }

    pub fn rate_limited(service: &str) -> Self {
        Self::new(
            ErrorKind::RateLimit,
            format!("Rate limit exceeded calling {service}"),
        )
    }

    pub fn service_unavailable(
        service: impl std::fmt::Display,
        detail: impl std::fmt::Display,
    ) -> Self {
        Self::new(
            ErrorKind::ServiceUnavailable,
            format!("{service} is unavailable: {detail}"),
        )
    }

    pub fn service_timeout(service: impl std::fmt::Display, timeout: Duration) -> Self {
        Self::new(
            ErrorKind::ServiceTimeout,
            format!("{service} did not respond within {timeout:?}"),
        )
    }

    pub fn connection(
        service: impl std::fmt::Display,
        detail: impl std::fmt::Display,
    ) -> Self {
        Self::new(
            ErrorKind::Connection,
            format!("Could not connect to {service}: {detail}"),
        )
    }

    pub fn external_service(
        service: impl std::fmt::Display,
        detail: impl std::fmt::Display,
    ) -> Self {
        Self::new(
            ErrorKind::ExternalService,
            format!("{service} request failed: {detail}"),
        )
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach request diagnostics unless the error already carries some
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        if self.context.is_none() {
            self.context = Some(context);
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind.status()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        self.context.as_ref()
    }
}

/// Result type for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;
