//! Unified error response handling for the proxy service
//!
//! Every failure that reaches the client goes through [`to_error_response`],
//! so the JSON shape and the `X-Error-*` headers stay identical whether the
//! error came from a dispatcher, the cache admin endpoint or a caught panic.

use crate::proxy::headers::{X_ERROR_CODE, X_ERROR_TIMESTAMP, X_REQUEST_ID};
use crate::proxy::types::{ErrorKind, ProxyError};
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use tracing::{error, warn};

/// Standard error response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Unique error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    pub status_code: u16,
    pub timestamp: String,
    /// Request ID for correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            success: false,
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
                status_code: status.as_u16(),
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                request_id: None,
            },
        }
    }

    /// Add request ID for correlation
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.error.request_id = Some(request_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.error.timestamp = timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
        self
    }

    /// Convert to HTTP response with the `X-Error-*` header pair
    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        let code = HeaderValue::from_str(&self.error.code).ok();
        let timestamp = HeaderValue::from_str(&self.error.timestamp).ok();
        let request_id = self
            .error
            .request_id
            .as_deref()
            .and_then(|id| HeaderValue::from_str(id).ok());

        let mut response = (status, Json(self)).into_response();
        let headers = response.headers_mut();

        if let Some(code) = code {
            headers.insert(X_ERROR_CODE, code);
        }
        if let Some(timestamp) = timestamp {
            headers.insert(X_ERROR_TIMESTAMP, timestamp);
        }
        if let Some(id) = request_id {
            headers.insert(X_REQUEST_ID, id);
        }

        response
    }
}

/// Convert a proxy error into the client-facing envelope.
///
/// Only the code, message and status leave the process; the rest of the
/// error context is for logs.
pub fn to_error_response(err: &ProxyError) -> ErrorResponse {
    let mut response = ErrorResponse::new(err.code(), err.message(), err.status_code());

    if let Some(context) = err.context() {
        response = response.with_timestamp(context.timestamp);
        if let Some(id) = &context.request_id {
            response = response.with_request_id(id.clone());
        }
    }

    response
}

/// Error conversion for Axum responses using standardized format
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let context = self.context();

        if status.is_server_error() {
            error!(
                code = self.code(),
                message = self.message(),
                url = context.map(|c| c.url.as_str()),
                method = context.map(|c| c.method.as_str()),
                user_agent = context.and_then(|c| c.user_agent.as_deref()),
                ip = context.and_then(|c| c.ip).map(|ip| ip.to_string()),
                "Proxy request failed"
            );
        } else {
            warn!(
                code = self.code(),
                message = self.message(),
                url = context.map(|c| c.url.as_str()),
                "Proxy request rejected"
            );
        }

        to_error_response(&self).into_response_with_status(status)
    }
}

/// Turn a panic payload caught by the middleware stack into an
/// `INTERNAL_ERROR` response.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "unknown panic payload".to_string()
    };

    error!(panic = %detail, "Unexpected failure while handling request");

    let kind = ErrorKind::Internal;
    ErrorResponse::new(kind.code(), "Internal server error", kind.status())
        .into_response_with_status(kind.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::types::{BackendKind, ErrorContext};
    use axum::http::{HeaderMap, Method, Uri};
    use rstest::rstest;
    use std::time::Duration;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[rstest]
    #[case(ProxyError::service_unavailable("origin", "reset"), "SERVICE_UNAVAILABLE", 503)]
    #[case(ProxyError::service_timeout("origin", Duration::from_secs(10)), "SERVICE_TIMEOUT", 504)]
    #[case(ProxyError::connection("gateway", "refused"), "CONNECTION_ERROR", 503)]
    #[case(ProxyError::external_service("auth", "bad body"), "EXTERNAL_SERVICE_ERROR", 502)]
    #[case(ProxyError::rate_limited("auth"), "RATE_LIMIT_EXCEEDED", 429)]
    #[case(ProxyError::cache("get", "timeout"), "CACHE_ERROR", 500)]
    #[case(ProxyError::proxy_request(BackendKind::Origin, "bad uri"), "PROXY_REQUEST_ERROR", 502)]
    #[case(ProxyError::unauthorized("missing token"), "UNAUTHORIZED", 401)]
    #[case(ProxyError::internal("boom"), "INTERNAL_ERROR", 500)]
    fn test_error_code_and_status_mapping(
        #[case] error: ProxyError,
        #[case] code: &str,
        #[case] status: u16,
    ) {
        assert_eq!(error.code(), code);
        assert_eq!(error.status_code().as_u16(), status);

        let response = to_error_response(&error);
        assert!(!response.success);
        assert_eq!(response.error.code, code);
        assert_eq!(response.error.status_code, status);
    }

    #[tokio::test]
    async fn test_proxy_error_into_response_shape() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("req-123"));
        let context = ErrorContext::new(
            &Method::GET,
            &Uri::from_static("/categories"),
            &headers,
            None,
        );
        let error = ProxyError::service_timeout("origin", Duration::from_secs(10))
            .with_context(context);

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(response.headers()[X_ERROR_CODE], "SERVICE_TIMEOUT");
        assert!(response.headers().contains_key(X_ERROR_TIMESTAMP));
        assert_eq!(response.headers()[X_REQUEST_ID], "req-123");

        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "SERVICE_TIMEOUT");
        assert_eq!(json["error"]["statusCode"], 504);
        assert_eq!(json["error"]["requestId"], "req-123");
        // Diagnostics stay out of the body
        assert!(json["error"].get("url").is_none());
    }

    #[tokio::test]
    async fn test_panic_response_is_internal_error() {
        let response = panic_response(Box::new("kaboom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[X_ERROR_CODE], "INTERNAL_ERROR");

        let json = body_json(response).await;
        assert_eq!(json["error"]["message"], "Internal server error");
    }
}
