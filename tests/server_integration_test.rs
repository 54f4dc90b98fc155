//! Integration tests for the server startup / shutdown lifecycle.
//!
//! Each test spins up a real server on an ephemeral port via
//! [`run_server_with_config`], exercises it over HTTP, and shuts it down
//! cleanly.

use axum::routing::{get, post};
use axum::Router;

use pageflow::flash;
use pageflow::server::startup::{run_server_with_config, ServerConfig, ServerHandle};
use pageflow::server::RequestContext;

/// Routes used by the lifecycle tests
fn app_routes() -> Router {
    Router::new()
        .route(
            "/form",
            get(|ctx: RequestContext| async move {
                let page = ctx.page().unwrap_or_default();
                format!("{}|{}", page.info_message, page.form_values.len())
            }),
        )
        .route(
            "/form",
            post(|ctx: RequestContext| async move {
                ctx.with_session(|s| {
                    flash::set_info_message(s, "saved");
                    flash::set_form_value(s, "name", "Ada");
                });
                "ok"
            }),
        )
        .route("/boom", get(boom))
}

async fn boom() -> &'static str {
    panic!("integration panic")
}

/// Spin up a lightweight test server with all defaults.
async fn start_test_server() -> ServerHandle {
    let config = ServerConfig::for_testing(app_routes());
    run_server_with_config(config).await.unwrap()
}

fn session_cookie(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("session="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// 1. Server starts and binds to a real port
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_starts_and_binds() {
    let handle = start_test_server().await;
    assert_ne!(handle.port(), 0, "OS should assign a non-zero port");
    assert!(handle.base_url().starts_with("http://127.0.0.1:"));
    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 2. Health endpoint responds with 200 + expected JSON fields
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_endpoint_responds() {
    let handle = start_test_server().await;
    let url = format!("{}/health", handle.base_url());

    let resp = reqwest::get(&url).await.expect("GET /health failed");
    assert_eq!(resp.status(), 200);
    assert!(
        resp.headers().get("x-req-id").is_none(),
        "health is served outside the pipeline"
    );

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(
        body.get("version").is_some(),
        "response should include version"
    );

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 3. Non-existent route returns 404 with a correlation id
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_nonexistent_route_returns_404() {
    let handle = start_test_server().await;
    let url = format!("{}/does-not-exist", handle.base_url());

    let resp = reqwest::get(&url).await.expect("GET failed");
    assert_eq!(resp.status(), 404);
    assert!(resp.headers().get("x-req-id").is_some());

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 4. Flash data survives a redirect cycle and is shown exactly once
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_flash_round_trip_over_http() {
    let handle = start_test_server().await;
    let url = format!("{}/form", handle.base_url());
    let client = reqwest::Client::new();

    let resp = client.post(&url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let cookie = session_cookie(&resp).expect("dirty fresh session should set a cookie");

    let first = client
        .get(&url)
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(first.text().await.unwrap(), "saved|1");

    let second = client
        .get(&url)
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(second.text().await.unwrap(), "|0");

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 5. A panicking handler yields the generic 500 and the server keeps serving
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panic_does_not_take_server_down() {
    let handle = start_test_server().await;

    let resp = reqwest::get(format!("{}/boom", handle.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body = resp.text().await.unwrap();
    assert!(!body.contains("integration panic"));

    let resp = reqwest::get(format!("{}/health", handle.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    handle.shutdown().await;
}
