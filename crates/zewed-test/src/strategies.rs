//! # Strategy Tests
//!
//! Each caching strategy against a scripted network and a fault-injecting store.

use url::Url;
use zewed_cache::{CacheKey, PartitionStore, StoredResponse, CACHED_AT_HEADER, EXPIRES_HEADER};
use zewed_sw::{IncomingRequest, Response, ResponseSource};

use crate::world::{test_config, url, TestWorld, FONT_CSS, START_MILLIS};

const STATIC: &str = "static-v1";
const API: &str = "api-v1";

async fn stored(world: &TestWorld, partition: &str, absolute: &str) -> Option<StoredResponse> {
    let key = CacheKey::get(&Url::parse(absolute).unwrap());
    world.store.inner().get(partition, &key).await.unwrap()
}

fn offline_reason(response: &Response) -> String {
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["error"], "offline");
    assert_eq!(body["cached"], false);
    body["reason"].as_str().unwrap().to_string()
}

/// Test API responses are returned live and stored with write and expiry stamps.
#[tokio::test]
async fn test_api_success_is_stored_with_stamps() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    let jobs = serde_json::json!({"jobs": [{"id": 1}, {"id": 2}]});
    world.network.respond_json(&url("/api/jobs/recent"), 200, &jobs);

    let response = world.get(&worker, "/api/jobs/recent").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("sw-cached"), Some("false"));
    assert_eq!(response.source, ResponseSource::Network);

    worker.settle().await;
    let record = stored(&world, API, &url("/api/jobs/recent")).await.unwrap();
    assert_eq!(record.body, jobs.to_string().into_bytes());
    assert_eq!(record.header(CACHED_AT_HEADER), Some(START_MILLIS.to_string().as_str()));
    assert_eq!(
        record.header(EXPIRES_HEADER),
        Some((START_MILLIS + 300_000).to_string().as_str())
    );
    assert_eq!(record.header("sw-cached"), None);
}

/// Test a cached API response is served when the network fails.
#[tokio::test]
async fn test_api_falls_back_to_cache_when_offline() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    let body = r#"{"jobs":[{"id":"a"}]}"#;
    world.network.respond_text(&url("/api/jobs/recent"), 200, body);

    world.get(&worker, "/api/jobs/recent").await;
    worker.settle().await;

    world.network.set_online(false);
    let response = world.get(&worker, "/api/jobs/recent").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), body);
    assert_eq!(response.header("sw-cached"), Some("true"));
    assert_eq!(response.source, ResponseSource::Cache);
}

/// Test an API miss while offline yields the structured 503.
#[tokio::test]
async fn test_api_miss_offline_is_structured_503() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    world.network.set_online(false);

    let response = world.get(&worker, "/api/jobs/recent").await;
    assert_eq!(response.status, 503);
    assert_eq!(response.source, ResponseSource::Synthetic);
    assert_eq!(offline_reason(&response), "network_unavailable");
}

/// Test error statuses pass through and are never stored.
#[tokio::test]
async fn test_api_error_status_is_not_stored() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    world.network.respond_text(&url("/api/jobs"), 500, "boom");

    let response = world.get(&worker, "/api/jobs").await;
    worker.settle().await;

    assert_eq!(response.status, 500);
    assert!(stored(&world, API, &url("/api/jobs")).await.is_none());
}

/// Test a failing cache write does not affect the live response.
#[tokio::test]
async fn test_api_write_failure_is_swallowed() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    world.network.respond_text(&url("/api/jobs"), 200, "[]");
    world.store.fail_writes(true);

    let response = world.get(&worker, "/api/jobs").await;
    worker.settle().await;

    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "[]");
    world.store.fail_writes(false);
    assert!(stored(&world, API, &url("/api/jobs")).await.is_none());
}

/// Test a failing cache read is treated as a miss.
#[tokio::test]
async fn test_api_read_failure_is_a_miss() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    world.network.respond_text(&url("/api/jobs"), 200, "[]");
    world.get(&worker, "/api/jobs").await;
    worker.settle().await;

    world.network.set_online(false);
    world.store.fail_reads(true);
    let response = world.get(&worker, "/api/jobs").await;
    assert_eq!(response.status, 503);
}

/// Test a cache hit returns the cached body and refreshes behind the response.
#[tokio::test]
async fn test_background_refresh_serves_cache_then_updates() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    let css = url("/assets/css/style.min.css");
    let cached = stored(&world, STATIC, &css).await.unwrap();

    world.network.clear_requests();
    world.network.respond_text(&css, 200, "body { color: teal }");

    let response = world.get(&worker, "/assets/css/style.min.css").await;
    assert_eq!(response.body.as_ref(), cached.body.as_slice());
    assert_eq!(response.header("sw-cached"), Some("true"));

    worker.settle().await;
    assert_eq!(world.network.hits(&css), 1);

    let refreshed = stored(&world, STATIC, &css).await.unwrap();
    assert_eq!(refreshed.body, b"body { color: teal }");
    assert!(refreshed.cached_at().is_some());

    let response = world.get(&worker, "/assets/css/style.min.css").await;
    assert_eq!(response.text(), "body { color: teal }");
}

/// Test background refresh failures leave the cached copy alone.
#[tokio::test]
async fn test_background_refresh_failure_is_ignored() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    let js = url("/assets/js/main.min.js");
    let before = stored(&world, STATIC, &js).await.unwrap();

    world.network.fail(&js);
    let response = world.get(&worker, "/assets/js/main.min.js").await;
    worker.settle().await;

    assert_eq!(response.status, 200);
    assert_eq!(stored(&world, STATIC, &js).await.unwrap().body, before.body);
}

/// Test a refresh answered with an error status does not replace the cached copy.
#[tokio::test]
async fn test_background_refresh_ignores_error_status() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    let js = url("/assets/js/main.min.js");
    let before = stored(&world, STATIC, &js).await.unwrap();

    world.network.respond_text(&js, 503, "maintenance");
    world.get(&worker, "/assets/js/main.min.js").await;
    worker.settle().await;

    assert_eq!(stored(&world, STATIC, &js).await.unwrap().body, before.body);
}

/// Test a static miss is fetched, returned, and stored in the background.
#[tokio::test]
async fn test_background_refresh_miss_fetches_and_stores() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    let font = url("/fonts/inter.woff2");
    world.network.respond_text(&font, 200, "woff2");

    let response = world.get(&worker, "/fonts/inter.woff2").await;
    assert_eq!(response.text(), "woff2");
    assert_eq!(response.source, ResponseSource::Network);

    worker.settle().await;
    assert_eq!(stored(&world, STATIC, &font).await.unwrap().body, b"woff2");
}

/// Test a static miss while offline yields the structured 503.
#[tokio::test]
async fn test_background_refresh_miss_offline() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    world.network.set_online(false);

    let response = world.get(&worker, "/assets/js/vendor.js").await;
    assert_eq!(response.status, 503);
    assert_eq!(offline_reason(&response), "network_unavailable");
}

/// Test allow-listed CDN stylesheets are served from the static partition.
#[tokio::test]
async fn test_cdn_stylesheet_served_from_cache() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    world.network.set_online(false);

    let response = world.fetch(&worker, IncomingRequest::get(FONT_CSS)).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), format!("precached {FONT_CSS}"));
    worker.settle().await;
}

/// Test images are fetched and stored before the response is returned.
#[tokio::test]
async fn test_image_success_is_stored_synchronously() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    let logo = url("/assets/images/logo-192.png");
    world.network.respond_text(&logo, 200, "png-bytes");

    let response = world.get(&worker, "/assets/images/logo-192.png").await;
    assert_eq!(response.text(), "png-bytes");
    assert_eq!(worker.tasks().pending(), 0);
    assert_eq!(stored(&world, STATIC, &logo).await.unwrap().body, b"png-bytes");
}

/// Test a 404 image is not stored and the placeholder is served once offline.
#[tokio::test]
async fn test_image_404_not_stored_then_placeholder() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    let photo = url("/uploads/company-7.jpg");
    world.network.respond_text(&photo, 404, "missing");

    let response = world.get(&worker, "/uploads/company-7.jpg").await;
    assert_eq!(response.status, 404);
    assert!(stored(&world, STATIC, &photo).await.is_none());

    world.network.set_online(false);
    let response = world.get(&worker, "/uploads/company-7.jpg").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.source, ResponseSource::Fallback);
    assert_eq!(
        response.text(),
        format!("precached {}", url("/assets/images/placeholder.png"))
    );
}

/// Test a 500 image is passed through uncached.
#[tokio::test]
async fn test_image_500_not_stored() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    let photo = url("/uploads/banner.webp");
    world.network.respond_text(&photo, 500, "error");

    let response = world.get(&worker, "/uploads/banner.webp").await;
    assert_eq!(response.status, 500);
    assert!(stored(&world, STATIC, &photo).await.is_none());
}

/// Test a missing placeholder degrades to the structured 503.
#[tokio::test]
async fn test_image_without_placeholder() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    let placeholder = CacheKey::get(&Url::parse(&url("/assets/images/placeholder.png")).unwrap());
    world.store.inner().delete(STATIC, &placeholder).await.unwrap();
    world.network.set_online(false);

    let response = world.get(&worker, "/uploads/company-7.jpg").await;
    assert_eq!(response.status, 503);
    assert_eq!(offline_reason(&response), "network_unavailable");
}

/// Test documents are returned live and stored in the background.
#[tokio::test]
async fn test_document_success_is_stored() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    let page = url("/jobs/42");
    world.network.respond_text(&page, 200, "<h1>Job 42</h1>");

    let request = IncomingRequest::get(page.clone()).accept("text/html");
    let response = world.fetch(&worker, request).await;
    assert_eq!(response.text(), "<h1>Job 42</h1>");

    worker.settle().await;
    let record = stored(&world, STATIC, &page).await.unwrap();
    assert_eq!(record.body, b"<h1>Job 42</h1>");
    assert!(record.cached_at().is_some());
    assert_eq!(record.expiry(), None);
}

/// Test a previously seen document is served from cache when offline.
#[tokio::test]
async fn test_document_offline_uses_cached_copy() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    world.network.respond_text(&url("/jobs/42"), 200, "<h1>Job 42</h1>");
    world.get(&worker, "/jobs/42").await;
    worker.settle().await;

    world.network.set_online(false);
    let response = world.get(&worker, "/jobs/42").await;
    assert_eq!(response.text(), "<h1>Job 42</h1>");
    assert_eq!(response.source, ResponseSource::Cache);
}

/// Test an unseen document falls back to the offline page when offline.
#[tokio::test]
async fn test_document_offline_fallback_page() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    world.network.set_online(false);

    let response = world.get(&worker, "/companies/acme").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.source, ResponseSource::Fallback);
    assert_eq!(response.text(), format!("precached {}", url("/offline.html")));
}

/// Test a synthetic offline page is produced when even the fallback is missing.
#[tokio::test]
async fn test_document_synthetic_offline_page() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    world.store.inner().delete_partition(STATIC).await.unwrap();
    world.network.set_online(false);

    let response = world.get(&worker, "/companies/acme").await;
    assert_eq!(response.status, 503);
    assert_eq!(response.source, ResponseSource::Synthetic);
    assert!(response.header("content-type").unwrap().starts_with("text/html"));
}

/// Test third-party requests are never read from or written to a partition.
#[tokio::test]
async fn test_network_only_never_touches_cache() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    let tracker = "https://analytics.example.com/collect.js";
    world.network.respond_text(tracker, 200, "track()");
    let writes_before = world.store.writes();

    let response = world.fetch(&worker, IncomingRequest::get(tracker)).await;
    worker.settle().await;
    assert_eq!(response.text(), "track()");
    assert_eq!(world.store.writes(), writes_before);

    world.network.set_online(false);
    let response = world.fetch(&worker, IncomingRequest::get(tracker)).await;
    assert_eq!(response.status, 503);
    assert_eq!(offline_reason(&response), "network_unavailable");
}
