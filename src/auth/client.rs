//! Client for the external auth service

use crate::proxy::headers::{content_types, AUTHORIZATION, CONTENT_TYPE};
use crate::proxy::types::{ProxyError, ProxyResult, TargetUrl};
use async_trait::async_trait;
use axum::body::Body;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http_body_util::BodyExt;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const AUTH_SERVICE: &str = "auth service";

/// Token minted for an anonymous visitor
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GuestToken {
    pub access_token: String,
    pub role: String,
    /// Expiry, seconds since the epoch
    pub exp: i64,
    /// Issued-at, seconds since the epoch
    pub iat: i64,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Option<GuestToken>,
}

/// Source of guest tokens
#[async_trait]
pub trait GuestTokenIssuer: Send + Sync {
    async fn issue_guest_token(&self) -> ProxyResult<GuestToken>;
}

/// Calls `POST <service_url><api_prefix>/guest-token` with the static key
#[derive(Clone)]
pub struct AuthServiceClient {
    endpoint: String,
    authorization: String,
    timeout: Duration,
    client: Client<HttpConnector, Body>,
}

impl AuthServiceClient {
    pub fn new(
        service_url: &TargetUrl,
        api_prefix: &str,
        static_key: &str,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build_http();

        Self {
            endpoint: format!(
                "{}{}/guest-token",
                service_url.as_ref().trim_end_matches('/'),
                api_prefix.trim_end_matches('/')
            ),
            authorization: format!("Basic {}", STANDARD.encode(static_key)),
            timeout,
            client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl GuestTokenIssuer for AuthServiceClient {
    async fn issue_guest_token(&self) -> ProxyResult<GuestToken> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(&self.endpoint)
            .header(AUTHORIZATION, &self.authorization)
            .header(CONTENT_TYPE, content_types::APPLICATION_JSON)
            .body(Body::from("{}"))
            .map_err(|e| ProxyError::external_service(AUTH_SERVICE, e))?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        let response = tokio::time::timeout_at(deadline, self.client.request(request))
            .await
            .map_err(|_| ProxyError::service_timeout(AUTH_SERVICE, self.timeout))?
            .map_err(|e| {
                if e.is_connect() {
                    ProxyError::connection(AUTH_SERVICE, e)
                } else {
                    ProxyError::external_service(AUTH_SERVICE, e)
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProxyError::rate_limited(AUTH_SERVICE));
        }
        if !status.is_success() {
            return Err(ProxyError::external_service(
                AUTH_SERVICE,
                format!("unexpected status {status}"),
            ));
        }

        let body = tokio::time::timeout_at(deadline, response.into_body().collect())
            .await
            .map_err(|_| ProxyError::service_timeout(AUTH_SERVICE, self.timeout))?
            .map_err(|e| ProxyError::external_service(AUTH_SERVICE, e))?
            .to_bytes();

        let envelope: Envelope = serde_json::from_slice(&body)
            .map_err(|e| ProxyError::external_service(AUTH_SERVICE, e))?;

        match envelope {
            Envelope {
                success: true,
                data: Some(token),
            } => {
                debug!(role = %token.role, "Guest token issued");
                Ok(token)
            }
            _ => Err(ProxyError::external_service(
                AUTH_SERVICE,
                "response did not contain a token",
            )),
        }
    }
}
