//! End-to-end tests: the edge router served on a real socket, built from settings

use axum::body::Body;
use http_body_util::BodyExt;
use hyper::{Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use mockito::{Matcher, Server, ServerGuard};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use storefront_edge::application::{cache_service, edge_router};
use storefront_edge::cache::{CacheStore, InMemoryCacheStore};
use storefront_edge::config::Settings;
use tokio::net::TcpListener;

const WARMUP_TOKEN: &str = "integration-warmup";

struct Edge {
    address: SocketAddr,
    origin: ServerGuard,
    gateway: ServerGuard,
    auth: ServerGuard,
    store: Arc<InMemoryCacheStore>,
}

fn page(title: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>{title}</title></head><body><h1>{title}</h1>{}</body></html>",
        "<p>catalogue</p>".repeat(40)
    )
}

async fn start_edge() -> Edge {
    let origin = Server::new_async().await;
    let gateway = Server::new_async().await;
    let auth = Server::new_async().await;

    let vars: HashMap<&str, String> = HashMap::from([
        ("ORIGIN_SERVER_URL", origin.url()),
        ("API_GATEWAY_URL", gateway.url()),
        ("AUTH_SERVICE_URL", auth.url()),
        ("AUTH_API_PREFIX", "/auth".to_string()),
        ("AUTH_STATIC_KEY", "edge-key".to_string()),
        ("WARMUP_TOKEN", WARMUP_TOKEN.to_string()),
        ("ENABLE_REQUEST_LOGGING", "false".to_string()),
    ]);
    let config_dir = tempfile::tempdir().unwrap();
    let settings = Settings::load(config_dir.path(), |name| vars.get(name).cloned()).unwrap();

    let store = Arc::new(InMemoryCacheStore::new());
    let dyn_store: Arc<dyn CacheStore> = store.clone();
    let cache = Arc::new(cache_service(&settings, dyn_store));
    let router = edge_router(&settings, cache).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    Edge {
        address,
        origin,
        gateway,
        auth,
        store,
    }
}

async fn send(request: Request<Body>) -> (StatusCode, hyper::HeaderMap, String) {
    let client = Client::builder(TokioExecutor::new()).build_http::<Body>();
    let response = client.request(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_page_request_forwards_client_address_and_sets_cookies() {
    let mut edge = start_edge().await;
    let now = chrono::Utc::now().timestamp();
    let auth = edge
        .auth
        .mock("POST", "/auth/guest-token")
        .match_header("authorization", "Basic ZWRnZS1rZXk=")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            serde_json::json!({
                "success": true,
                "data": {"access_token": "guest-1", "role": "guest", "exp": now + 7200, "iat": now}
            })
            .to_string(),
        )
        .create_async()
        .await;
    let origin = edge
        .origin
        .mock("GET", "/")
        .match_header("authorization", "Bearer guest-1")
        .match_header("x-forwarded-for", "127.0.0.1")
        .match_header("x-proxy-source", "storefront-edge")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(page("Home"))
        .create_async()
        .await;

    let request = Request::builder()
        .uri(format!("http://{}/", edge.address))
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-cache"], "MISS");
    assert_eq!(headers.get_all("set-cookie").iter().count(), 2);
    assert_eq!(body, page("Home"));
    auth.assert_async().await;
    origin.assert_async().await;
}

#[tokio::test]
async fn test_second_visit_is_served_from_cache() {
    let mut edge = start_edge().await;
    let origin = edge
        .origin
        .mock("GET", "/categories")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page("Categories"))
        .expect(1)
        .create_async()
        .await;

    let visit = |address: SocketAddr| {
        Request::builder()
            .uri(format!("http://{address}/categories"))
            .header("cookie", "access_token=returning; access_type=guest")
            .body(Body::empty())
            .unwrap()
    };

    let (_, first, _) = send(visit(edge.address)).await;
    assert_eq!(first["x-cache"], "MISS");

    // The write is queued in the background
    let mut attempts = 0;
    while edge.store.set_calls() == 0 && attempts < 50 {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        attempts += 1;
    }

    let (status, second, body) = send(visit(edge.address)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["x-cache"], "HIT");
    assert_eq!(body, page("Categories"));
    origin.assert_async().await;
}

#[tokio::test]
async fn test_gateway_errors_are_relayed_verbatim() {
    let mut edge = start_edge().await;
    let _gateway = edge
        .gateway
        .mock("GET", Matcher::Regex("^/api/.*".to_string()))
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message":"no such product"}"#)
        .create_async()
        .await;

    let request = Request::builder()
        .uri(format!("http://{}/api/products/missing", edge.address))
        .header("cookie", "access_token=returning")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(request).await;

    // Upstream answers are relayed as-is, never rewritten
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(headers["x-proxy-target"], "gateway");
    assert_eq!(body, r#"{"message":"no such product"}"#);
}

#[tokio::test]
async fn test_purge_with_token_removes_entry() {
    let edge = start_edge().await;
    edge.store.insert_raw("html_cache:shop.test/", &page("Stale"));

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("http://{}/__edge/cache?path=/", edge.address))
        .header("host", "shop.test")
        .header("x-warmup-token", WARMUP_TOKEN)
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(request).await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["success"], true);
    assert!(edge.store.peek("html_cache:shop.test/").is_none());
}
