//! HTTP router assembly
//!
//! Wires application routes into the request pipeline and adds the built-in
//! endpoints:
//! - GET /health - liveness probe
//! - POST <deletePath> - sign out a session
//! - fallback - generic 404 page

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::config::{AppConfig, Environment};
use crate::flash;
use crate::page::menu::Menu;
use crate::page::PagePrototype;
use crate::server::context::RequestContext;
use crate::server::errors::not_found_handler;
use crate::server::pipeline::{
    nav_middleware, page_middleware, panic_recovery, request_logger, session_middleware,
};
use crate::server::recovery::install_panic_hook;
use crate::sessions::{SessionBackend, SessionCap, SessionGrouping, SessionResolver};

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Deployment environment (cosmetic log output only)
    pub environment: Environment,
    /// Requests under this prefix bypass the pipeline
    pub asset_prefix: String,
    /// Cookie carrying the session identifier
    pub cookie_name: String,
    /// Mark the session cookie `Secure`
    pub secure_cookie: bool,
    /// Session sign-out path
    pub delete_path: String,
    /// Concurrent sessions per group
    pub session_cap: SessionCap,
    /// How concurrent sessions are grouped
    pub grouping: SessionGrouping,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            environment: Environment::Production,
            asset_prefix: "/assets/".to_string(),
            cookie_name: "session".to_string(),
            secure_cookie: false,
            delete_path: "/sessions/delete".to_string(),
            session_cap: SessionCap::Unlimited,
            grouping: SessionGrouping::Identity,
        }
    }
}

impl PipelineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        PipelineConfig {
            environment: config.env,
            asset_prefix: config.assets.prefix.clone(),
            cookie_name: config.session.cookie_name.clone(),
            secure_cookie: config.session.secure_cookie,
            delete_path: config.session.delete_path.clone(),
            session_cap: config.session_cap(),
            grouping: config.session.grouping,
        }
    }
}

/// Shared state for the pipeline stages and built-in handlers
#[derive(Clone)]
pub struct PipelineState {
    pub config: Arc<PipelineConfig>,
    pub store: Arc<dyn SessionBackend>,
    pub resolver: Arc<SessionResolver>,
    pub prototype: PagePrototype,
    pub menu: Arc<Menu>,
    /// Server start time (Unix timestamp)
    pub start_time: i64,
}

impl PipelineState {
    pub fn new(config: PipelineConfig, store: Arc<dyn SessionBackend>) -> Self {
        let resolver = SessionResolver::new(Arc::clone(&store))
            .with_cap(config.session_cap)
            .with_grouping(config.grouping)
            .with_delete_path(config.delete_path.clone());
        PipelineState {
            config: Arc::new(config),
            store,
            resolver: Arc::new(resolver),
            prototype: PagePrototype::default(),
            menu: Arc::new(Menu::new()),
            start_time: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_prototype(mut self, prototype: PagePrototype) -> Self {
        self.prototype = prototype;
        self
    }

    pub fn with_menu(mut self, menu: Menu) -> Self {
        self.menu = Arc::new(menu);
        self
    }

    /// Whether `path` is a static asset
    pub fn is_asset(&self, path: &str) -> bool {
        path.starts_with(&self.config.asset_prefix)
    }
}

/// Wrap `routes` in the request pipeline and add the built-in endpoints.
pub fn create_router(state: PipelineState, routes: Router) -> Router {
    install_panic_hook();

    // Order matters: last added = first executed
    // The order here is: logger -> panic recovery -> session -> page -> nav -> handler
    // Handler panics are caught by the session stage; panic recovery covers the stages above it.
    let pipeline = routes
        .route(&state.config.delete_path, post(delete_session_handler))
        .fallback(not_found_handler)
        .layer(middleware::from_fn_with_state(state.clone(), nav_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), page_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ))
        .layer(middleware::from_fn(panic_recovery))
        .layer(middleware::from_fn_with_state(state.clone(), request_logger));

    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
        .merge(pipeline)
}

// ============================================================================
// Built-in handlers
// ============================================================================

/// GET /health - Lightweight liveness probe.
async fn health_handler(State(state): State<PipelineState>) -> Response {
    let uptime = chrono::Utc::now().timestamp() - state.start_time;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSeconds": uptime,
        })),
    )
        .into_response()
}

/// Session sign-out parameters
#[derive(Debug, Default, Deserialize)]
pub struct DeleteSessionParams {
    /// Session to remove; the current session when absent
    pub id: Option<String>,
}

/// POST <deletePath> - schedule a session for deletion and redirect back.
async fn delete_session_handler(
    ctx: RequestContext,
    headers: HeaderMap,
    Query(query): Query<DeleteSessionParams>,
    form: Option<Form<DeleteSessionParams>>,
) -> Response {
    let target = form
        .and_then(|Form(params)| params.id)
        .or(query.id)
        .filter(|id| !id.is_empty());

    let current = ctx.session_id();
    match target {
        Some(id) if id != current => {
            ctx.delete_session(&id);
            ctx.with_session(|s| flash::set_info_message(s, "The session has been signed out."));
        }
        _ => ctx.delete_current_session(),
    }

    Redirect::to(&redirect_target(&headers)).into_response()
}

/// Local path to return to after a form post: the referer when it points at
/// this host, `/` otherwise.
fn redirect_target(headers: &HeaderMap) -> String {
    let referer = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if referer.starts_with('/') && !referer.starts_with("//") {
        return referer.to_string();
    }

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !host.is_empty() {
        for scheme in ["http://", "https://"] {
            let origin = format!("{}{}", scheme, host);
            if let Some(rest) = referer.strip_prefix(&origin) {
                if rest.starts_with('/') {
                    return rest.to_string();
                }
                if rest.is_empty() {
                    return "/".to_string();
                }
            }
        }
    }

    "/".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::{MemorySessionStore, SessionRecord};
    use axum::body::Body;
    use axum::http::{HeaderValue, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_router(store: Arc<MemorySessionStore>) -> Router {
        let state = PipelineState::new(PipelineConfig::default(), store);
        create_router(state, Router::new())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = test_router(Arc::new(MemorySessionStore::new()));

        let req = Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("set-cookie").is_none());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].as_str().is_some());
        assert!(json["uptimeSeconds"].as_i64().is_some());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404_page() {
        let router = test_router(Arc::new(MemorySessionStore::new()));
        let req = Request::builder()
            .uri("/does-not-exist")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get("x-req-id").is_some());
    }

    #[tokio::test]
    async fn test_delete_other_session() {
        let store = Arc::new(MemorySessionStore::new());
        store.upsert(&SessionRecord::with_id("mine")).unwrap();
        store.upsert(&SessionRecord::with_id("other")).unwrap();
        let router = test_router(store.clone());

        let req = Request::builder()
            .method("POST")
            .uri("/sessions/delete")
            .header("cookie", "session=mine")
            .header("content-type", "application/x-www-form-urlencoded")
            .header("referer", "/sessions")
            .body(Body::from("id=other"))
            .unwrap();

        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get("location").unwrap(), "/sessions");
        assert!(!store.contains("other"));
        let mine = store.get("mine").unwrap();
        assert!(mine.contains_key(flash::INFO_MESSAGE));
    }

    #[tokio::test]
    async fn test_delete_current_session_expires_cookie() {
        let store = Arc::new(MemorySessionStore::new());
        store.upsert(&SessionRecord::with_id("mine")).unwrap();
        let router = test_router(store.clone());

        let req = Request::builder()
            .method("POST")
            .uri("/sessions/delete")
            .header("cookie", "session=mine")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get("location").unwrap(), "/");
        let cookie = response.headers().get("set-cookie").unwrap().to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_redirect_target() {
        let mut headers = HeaderMap::new();
        assert_eq!(redirect_target(&headers), "/");

        headers.insert(header::REFERER, HeaderValue::from_static("/users?page=2"));
        assert_eq!(redirect_target(&headers), "/users?page=2");

        headers.insert(header::REFERER, HeaderValue::from_static("//evil.example/x"));
        assert_eq!(redirect_target(&headers), "/");

        headers.insert(header::HOST, HeaderValue::from_static("app.example"));
        headers.insert(
            header::REFERER,
            HeaderValue::from_static("https://app.example/sessions"),
        );
        assert_eq!(redirect_target(&headers), "/sessions");

        headers.insert(header::REFERER, HeaderValue::from_static("https://evil.example/"));
        assert_eq!(redirect_target(&headers), "/");
    }

    #[test]
    fn test_is_asset() {
        let state = PipelineState::new(
            PipelineConfig::default(),
            Arc::new(MemorySessionStore::new()),
        );
        assert!(state.is_asset("/assets/app.js"));
        assert!(!state.is_asset("/users"));
    }
}
