//! Request pipeline stages
//!
//! Stages in execution order (outermost first):
//!
//! 1. [`request_logger`] - correlation id, request span, completion log
//! 2. [`panic_recovery`] - turns panics outside the session stage into the
//!    generic 500 page
//! 3. [`session_middleware`] - resolves the session and owns its finalizer;
//!    handler panics are recovered here so the 500 still carries the cookie
//! 4. [`page_middleware`] - GET only: page copy hydrated from flash data
//! 5. [`nav_middleware`] - GET only: navigation for the session's menu type
//!
//! Requests under the static-asset prefix skip the logger, session and page
//! stages and go straight to their handler.

use axum::body::{Body, HttpBody};
use axum::extract::{ConnectInfo, MatchedPath, State};
use axum::http::{header, HeaderValue, Method, Request, Response};
use axum::middleware::Next;
use axum::response::IntoResponse;
use futures_util::FutureExt;
use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, field, info, info_span, Instrument, Span};

use crate::logging::targets;
use crate::page::menu::menu_type_for;
use crate::server::context::{RequestContext, RequestMeta};
use crate::server::cookies::{expired_cookie_header, extract_cookie_value, session_cookie_header};
use crate::server::errors::internal_error_response;
use crate::server::finalize::SessionFinalizer;
use crate::server::http::PipelineState;
use crate::server::recovery::{panic_message, take_backtrace};
use crate::sessions::RequestInfo;

/// Response header carrying the request correlation id
pub const REQUEST_ID_HEADER: &str = "x-req-id";

fn header_str<'a>(request: &'a Request<Body>, name: header::HeaderName) -> &'a str {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn response_size(response: &Response<Body>) -> Option<u64> {
    response.body().size_hint().exact().or_else(|| {
        response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    })
}

/// Request logging stage
pub async fn request_logger(
    State(state): State<PipelineState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if state.is_asset(request.uri().path()) {
        return next.run(request).await;
    }

    let start = Instant::now();
    let req_id = crate::sessions::id::generate_request_id();
    let handler = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_default();
    let client = connect_info
        .map(|ci| ci.0.to_string())
        .unwrap_or_default();

    let span = info_span!(
        target: targets::HTTP,
        "http_request",
        req_id = %req_id,
        req_url = %request.uri(),
        req_referer = %header_str(&request, header::REFERER),
        req_ip = %client,
        req_method = %request.method(),
        req_useragent = %header_str(&request, header::USER_AGENT),
        req_handler = %handler,
        session_id = field::Empty,
        session_user_id = field::Empty,
        session_username = field::Empty,
    );

    request
        .extensions_mut()
        .insert(RequestMeta::new(req_id.clone(), span.clone()));

    let mut response = next.run(request).instrument(span.clone()).await;

    if let Ok(value) = HeaderValue::from_str(&req_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let elapsed_ms = start.elapsed().as_millis() as u64;
    span.in_scope(|| {
        info!(
            target: targets::HTTP,
            response_code = response.status().as_u16(),
            response_size = response_size(&response),
            req_duration_ms = elapsed_ms,
            "http_request"
        );
    });

    if state.config.environment.is_development() {
        println!();
    }

    response
}

/// Log a recovered panic and answer with the generic 500 page.
fn recovered_panic(span: &Span, payload: &(dyn Any + Send)) -> Response<Body> {
    let message = panic_message(payload);
    let stack = take_backtrace().unwrap_or_default();
    span.in_scope(|| {
        error!(target: targets::HTTP, error = %message, stack = %stack, "panic recovery");
    });
    internal_error_response()
}

/// Panic containment stage
pub async fn panic_recovery(request: Request<Body>, next: Next) -> Response<Body> {
    let span = request
        .extensions()
        .get::<RequestMeta>()
        .map(|meta| meta.span.clone())
        .unwrap_or_else(Span::current);

    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => recovered_panic(&span, payload.as_ref()),
    }
}

/// Session resolution and finalization stage
pub async fn session_middleware(
    State(state): State<PipelineState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let path = request.uri().path().to_string();
    if state.is_asset(&path) {
        return next.run(request).await;
    }

    let meta = request
        .extensions()
        .get::<RequestMeta>()
        .cloned()
        .unwrap_or_else(RequestMeta::detached);

    let presented = extract_cookie_value(request.headers(), &state.config.cookie_name);
    let info = RequestInfo {
        session_id: presented.clone(),
        path: path.clone(),
        ip: connect_info.map(|ci| ci.0.ip()),
        user_agent: header_str(&request, header::USER_AGENT).to_string(),
    };

    let resolution = meta.span.in_scope(|| state.resolver.resolve(&info));
    {
        let record = &resolution.record;
        meta.span.record("session_id", record.id());
        meta.span
            .record("session_user_id", record.user_id.as_deref().unwrap_or(""));
        meta.span.record("session_username", record.username.as_str());
    }

    let ctx = RequestContext::new(resolution, path, meta);
    if request.method() == Method::GET {
        ctx.expect_page();
    }
    request.extensions_mut().insert(ctx.clone());

    let finalizer = SessionFinalizer::new(ctx.clone(), Arc::clone(&state.store));
    let result = AssertUnwindSafe(next.run(request)).catch_unwind().await;
    let outcome = finalizer.finalize();
    let mut response = match result {
        Ok(response) => response,
        Err(payload) => recovered_panic(ctx.span(), payload.as_ref()),
    };

    let cookie = if outcome.discarded {
        presented
            .is_some()
            .then(|| expired_cookie_header(&state.config.cookie_name, state.config.secure_cookie))
    } else if outcome.persisted {
        let session_id = ctx.session_id();
        (presented.as_deref() != Some(session_id.as_str())).then(|| {
            session_cookie_header(&state.config.cookie_name, &session_id, state.config.secure_cookie)
        })
    } else {
        None
    };

    if let Some(value) = cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }

    response
}

/// Page view stage (GET only)
pub async fn page_middleware(
    State(state): State<PipelineState>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if request.method() != Method::GET || state.is_asset(request.uri().path()) {
        return next.run(request).await;
    }

    if let Some(ctx) = request.extensions().get::<RequestContext>() {
        ctx.install_page(state.prototype.instantiate());
    }

    next.run(request).await
}

/// Navigation stage (GET only)
pub async fn nav_middleware(
    State(state): State<PipelineState>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if request.method() != Method::GET || state.is_asset(request.uri().path()) {
        return next.run(request).await;
    }

    if let Some(ctx) = request.extensions().get::<RequestContext>() {
        let menu_type = ctx.with_session(|s| s.menu_type.clone());
        if let Some(nav) = state.menu.get(menu_type_for(&menu_type), request.uri().path()) {
            if let Err(e) = ctx.with_page(|page| page.set_nav(nav)) {
                error!(target: targets::PAGE, error = %e, "navigation stage ran without a page");
            }
        }
    }

    next.run(request).await
}

/// Extra stylesheets and scripts for a group of routes
#[derive(Debug, Clone, Default)]
pub struct PageAssets {
    pub links: Vec<String>,
    pub scripts: Vec<String>,
}

impl PageAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn links<I, S>(mut self, links: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.links.extend(links.into_iter().map(Into::into));
        self
    }

    pub fn scripts<I, S>(mut self, scripts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scripts.extend(scripts.into_iter().map(Into::into));
        self
    }

    /// Date picker, fuzzy search and form helpers used by form pages
    pub fn form() -> Self {
        Self::new()
            .links(["/static/lib/pikaday/css/pikaday.css"])
            .scripts([
                "/static/lib/pikaday/js/pikaday.js",
                "/static/lib/fuse/fuse.min.js",
                "/static/js/forms.js",
            ])
    }
}

/// Route-level stage appending [`PageAssets`] to the current page.
///
/// A no-op for non-GET requests. A GET request without a page view means the
/// page stage is not wired in front of this route; it is logged and
/// answered with the generic 500 page.
pub async fn page_assets(
    State(assets): State<Arc<PageAssets>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if request.method() == Method::GET {
        if let Some(ctx) = request.extensions().get::<RequestContext>() {
            let added = ctx.with_page(|page| {
                let links: Vec<&str> = assets.links.iter().map(String::as_str).collect();
                page.add_link(&links);
                let scripts: Vec<&str> = assets.scripts.iter().map(String::as_str).collect();
                page.add_script(&scripts);
            });
            if let Err(e) = added {
                return ctx.span().in_scope(|| e.into_response());
            }
        }
    }
    next.run(request).await
}
