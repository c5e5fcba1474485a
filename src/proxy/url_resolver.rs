//! Target URL resolution and path handling for proxy requests

use crate::proxy::headers::{HOST, X_FORWARDED_HOST};
use crate::proxy::types::*;
use hyper::{HeaderMap, Uri};

/// Strategy for resolving target URLs and handling path composition
pub struct UrlResolver;

impl UrlResolver {
    /// Resolve the final URI for the outgoing request
    ///
    /// The inbound path and query are appended to the backend base URL. A
    /// base URL carrying a path (e.g. `http://gateway:8000/v2`) keeps it as a
    /// prefix.
    pub fn resolve_target_uri(
        target_url: &TargetUrl,
        original_uri: &Uri,
        backend: BackendKind,
    ) -> ProxyResult<Uri> {
        let path_and_query = original_uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or(DEFAULT_PATH);

        let final_uri_str = format!(
            "{}{}",
            target_url.as_ref().trim_end_matches('/'),
            path_and_query
        );

        final_uri_str
            .parse()
            .map_err(|e| ProxyError::proxy_request(backend, format!("{final_uri_str}: {e}")))
    }

    /// Host the client asked for, used for cache keys and forwarding headers
    pub fn request_host(headers: &HeaderMap, uri: &Uri) -> String {
        headers
            .get(HOST)
            .or_else(|| headers.get(X_FORWARDED_HOST))
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .or_else(|| uri.authority().map(|authority| authority.to_string()))
            .unwrap_or_else(|| "localhost".to_string())
    }

    /// Whether the path belongs to the API gateway (`/api` and `/api/*`)
    pub fn is_gateway_path(path: &str) -> bool {
        path == API_PATH_PREFIX
            || path
                .strip_prefix(API_PATH_PREFIX)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn target(url: &str) -> TargetUrl {
        TargetUrl::try_new(url.to_string()).unwrap()
    }

    #[test]
    fn test_resolve_target_uri_appends_path_and_query() {
        let original_uri: Uri = "/api/products?page=2".parse().unwrap();

        let resolved = UrlResolver::resolve_target_uri(
            &target("http://gateway.internal:8000"),
            &original_uri,
            BackendKind::Gateway,
        )
        .unwrap();
        assert_eq!(
            resolved.to_string(),
            "http://gateway.internal:8000/api/products?page=2"
        );
    }

    #[test]
    fn test_resolve_target_uri_keeps_base_path_prefix() {
        let original_uri: Uri = "/categories".parse().unwrap();

        let resolved = UrlResolver::resolve_target_uri(
            &target("http://origin.internal/storefront/"),
            &original_uri,
            BackendKind::Origin,
        )
        .unwrap();
        assert_eq!(
            resolved.to_string(),
            "http://origin.internal/storefront/categories"
        );
    }

    #[test]
    fn test_resolve_target_uri_root_path() {
        let original_uri: Uri = "/".parse().unwrap();

        let resolved = UrlResolver::resolve_target_uri(
            &target("http://origin.internal"),
            &original_uri,
            BackendKind::Origin,
        )
        .unwrap();
        assert_eq!(resolved.to_string(), "http://origin.internal/");
    }

    #[test]
    fn test_request_host_prefers_host_header() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("Shop.Example.com"));
        let uri: Uri = "http://ignored.example/".parse().unwrap();

        assert_eq!(UrlResolver::request_host(&headers, &uri), "Shop.Example.com");
        assert_eq!(
            UrlResolver::request_host(&HeaderMap::new(), &uri),
            "ignored.example"
        );
        assert_eq!(
            UrlResolver::request_host(&HeaderMap::new(), &Uri::from_static("/")),
            "localhost"
        );
    }

    #[test]
    fn test_gateway_path_classification() {
        assert!(UrlResolver::is_gateway_path("/api"));
        assert!(UrlResolver::is_gateway_path("/api/products"));
        assert!(!UrlResolver::is_gateway_path("/apiary"));
        assert!(!UrlResolver::is_gateway_path("/"));
        assert!(!UrlResolver::is_gateway_path("/categories"));
    }
}
