//! Request forwarding to a single upstream backend

use crate::proxy::headers::{
    is_hop_by_hop, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, HOST, KEEP_ALIVE, PROXY_SERVER_NAME,
    X_FORWARDED_FOR, X_FORWARDED_HOST, X_FORWARDED_PROTO, X_PROXY_SOURCE, X_WARMUP_TOKEN,
};
use crate::proxy::types::*;
use crate::proxy::url_resolver::UrlResolver;
use axum::body::Body;
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::{HeaderMap, Method, Request, Response, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::debug;

/// Per-request facts the forwarder needs besides the request itself
#[derive(Clone, Debug)]
pub struct DispatchContext {
    pub access_token: Option<String>,
    /// Host the client addressed, as used for cache keys
    pub host: String,
    pub forwarded_proto: String,
    pub peer_ip: Option<IpAddr>,
}

impl DispatchContext {
    pub fn new(headers: &HeaderMap, uri: &hyper::Uri, peer_ip: Option<IpAddr>) -> Self {
        let forwarded_proto = headers
            .get(X_FORWARDED_PROTO)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .or_else(|| uri.scheme_str().map(str::to_string))
            .unwrap_or_else(|| "http".to_string());

        Self {
            access_token: None,
            host: UrlResolver::request_host(headers, uri),
            forwarded_proto,
            peer_ip,
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }
}

/// Pooled HTTP/1.1 client bound to one backend base URL
#[derive(Clone)]
pub struct BackendForwarder {
    kind: BackendKind,
    target: TargetUrl,
    timeout: Duration,
    client: Client<HttpConnector, Body>,
}

impl BackendForwarder {
    pub fn new(kind: BackendKind, target: TargetUrl, timeout: Duration) -> Self {
        let client =
            hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
                .http1_title_case_headers(true)
                .http1_preserve_header_case(true)
                .build_http();

        Self {
            kind,
            target,
            timeout,
            client,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn target(&self) -> &TargetUrl {
        &self.target
    }

    /// Deadline for one exchange, body included when the caller buffers it
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forward `request` and return the backend's response unread
    pub async fn forward(
        &self,
        request: Request<Body>,
        context: &DispatchContext,
    ) -> ProxyResult<Response<Incoming>> {
        let start_time = Instant::now();
        let (mut parts, body) = request.into_parts();

        parts.uri = UrlResolver::resolve_target_uri(&self.target, &parts.uri, self.kind)?;
        parts.version = Version::HTTP_11;
        parts.headers = self.outgoing_headers(&parts.headers, context)?;

        let body = if parts.method == Method::GET || parts.method == Method::HEAD {
            parts.headers.remove(CONTENT_LENGTH);
            Body::empty()
        } else {
            body
        };

        let method = parts.method.clone();
        let uri = parts.uri.clone();
        let outgoing_request = Request::from_parts(parts, body);

        let response = tokio::time::timeout(self.timeout, self.client.request(outgoing_request))
            .await
            .map_err(|_| ProxyError::service_timeout(self.kind, self.timeout))?
            .map_err(|e| {
                if e.is_connect() {
                    ProxyError::connection(self.kind, e)
                } else {
                    ProxyError::service_unavailable(self.kind, e)
                }
            })?;

        debug!(
            backend = %self.kind,
            method = %method,
            uri = %uri,
            status = response.status().as_u16(),
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Backend responded"
        );

        Ok(response)
    }

    fn outgoing_headers(
        &self,
        inbound: &HeaderMap,
        context: &DispatchContext,
    ) -> ProxyResult<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(inbound.len() + 6);
        for (name, value) in inbound {
            if *name == HOST || name.as_str() == X_WARMUP_TOKEN || is_hop_by_hop(name) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        headers.insert(CONNECTION, HeaderValue::from_static(KEEP_ALIVE));

        if let Some(token) = &context.access_token {
            let value = HeaderValue::from_str(&format!("{BEARER_PREFIX}{token}"))
                .map_err(|e| ProxyError::proxy_request(self.kind, e))?;
            headers.insert(AUTHORIZATION, value);
        }

        let forwarded_host = HeaderValue::from_str(&context.host)
            .map_err(|e| ProxyError::proxy_request(self.kind, e))?;
        headers.insert(X_FORWARDED_HOST, forwarded_host);

        let forwarded_proto = HeaderValue::from_str(&context.forwarded_proto)
            .map_err(|e| ProxyError::proxy_request(self.kind, e))?;
        headers.insert(X_FORWARDED_PROTO, forwarded_proto);

        if let Some(ip) = context.peer_ip {
            let chain = match inbound.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(existing) => format!("{existing}, {ip}"),
                None => ip.to_string(),
            };
            let value =
                HeaderValue::from_str(&chain).map_err(|e| ProxyError::proxy_request(self.kind, e))?;
            headers.insert(X_FORWARDED_FOR, value);
        }

        headers.insert(X_PROXY_SOURCE, HeaderValue::from_static(PROXY_SERVER_NAME));

        Ok(headers)
    }
}
