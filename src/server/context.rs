//! Request-scoped context
//!
//! [`RequestContext`] is the typed handle through which handlers and later
//! pipeline stages reach the session record and page view bound to the
//! current request. It is created by the session stage and inserted into the
//! request extensions; handlers take it as an extractor.
//!
//! The record and the page are owned by the request. The mutex only exists
//! because the handle is shared between the pipeline stages and the
//! finalizer; it is never contended across requests.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::{error, Span};

use crate::logging::targets;
use crate::page::Page;
use crate::server::errors::internal_error_response;
use crate::sessions::id::generate_request_id;
use crate::sessions::{EvictionCandidate, Resolution, SessionRecord};

/// Pipeline wiring errors surfaced to the route layer
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContextError {
    #[error("session not found on request context; session middleware is missing")]
    MissingSession,
    #[error("page not found on request context: {0}")]
    MissingPage(String),
}

impl IntoResponse for ContextError {
    fn into_response(self) -> Response {
        error!(target: targets::HTTP, error = %self, "request context misconfigured");
        internal_error_response()
    }
}

/// Correlation data attached by the request logger
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub req_id: String,
    pub span: Span,
}

impl RequestMeta {
    pub fn new(req_id: impl Into<String>, span: Span) -> Self {
        Self {
            req_id: req_id.into(),
            span,
        }
    }

    /// Metadata for requests that bypassed the request logger.
    pub fn detached() -> Self {
        Self {
            req_id: generate_request_id(),
            span: Span::current(),
        }
    }
}

/// Mutable per-request state behind a [`RequestContext`]
#[derive(Debug)]
pub(crate) struct RequestScope {
    pub(crate) session: SessionRecord,
    pub(crate) page: Option<Page>,
    pub(crate) loaded: bool,
    pub(crate) candidates: Vec<EvictionCandidate>,
    pub(crate) pending_deletions: Vec<String>,
    pub(crate) discard_active: bool,
    pub(crate) path: String,
    pub(crate) page_expected: bool,
}

/// Handle to the session record and page view of one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    scope: Arc<Mutex<RequestScope>>,
    meta: RequestMeta,
}

impl RequestContext {
    pub(crate) fn new(resolution: Resolution, path: impl Into<String>, meta: RequestMeta) -> Self {
        let scope = RequestScope {
            session: resolution.record,
            page: None,
            loaded: resolution.loaded,
            candidates: resolution.candidates,
            pending_deletions: Vec::new(),
            discard_active: false,
            path: path.into(),
            page_expected: false,
        };
        Self {
            scope: Arc::new(Mutex::new(scope)),
            meta,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RequestScope> {
        self.scope.lock()
    }

    /// Correlation id of the request
    pub fn req_id(&self) -> &str {
        &self.meta.req_id
    }

    /// Span carrying the request and session fields
    pub fn span(&self) -> &Span {
        &self.meta.span
    }

    /// Run `f` with mutable access to the session record.
    ///
    /// The context lock is held while `f` runs and is not reentrant: calling
    /// another accessor of this context from inside `f` deadlocks. Use
    /// [`with_page_and_session`](Self::with_page_and_session) to touch both.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut SessionRecord) -> R) -> R {
        f(&mut self.lock().session)
    }

    /// Snapshot of the session record
    pub fn session(&self) -> SessionRecord {
        self.lock().session.clone()
    }

    pub fn session_id(&self) -> String {
        self.lock().session.id().to_string()
    }

    /// Whether the session record was loaded from storage
    pub fn is_loaded(&self) -> bool {
        self.lock().loaded
    }

    /// Stored sessions that finalization will evict
    pub fn eviction_candidates(&self) -> Vec<EvictionCandidate> {
        self.lock().candidates.clone()
    }

    /// Run `f` with mutable access to the page view.
    ///
    /// Fails when the page stage did not run for this request (non-GET
    /// requests, or a router without the page stage). Holds the same
    /// non-reentrant lock as [`with_session`](Self::with_session).
    pub fn with_page<R>(&self, f: impl FnOnce(&mut Page) -> R) -> Result<R, ContextError> {
        self.with_page_and_session(|page, _| f(page))
    }

    /// Run `f` with mutable access to both the page view and the session
    /// record under a single lock.
    pub fn with_page_and_session<R>(
        &self,
        f: impl FnOnce(&mut Page, &mut SessionRecord) -> R,
    ) -> Result<R, ContextError> {
        let mut scope = self.lock();
        let scope = &mut *scope;
        match scope.page.as_mut() {
            Some(page) => Ok(f(page, &mut scope.session)),
            None => Err(ContextError::MissingPage(scope.path.clone())),
        }
    }

    /// Whether this request is expected to carry a page view (GET requests).
    pub fn expects_page(&self) -> bool {
        self.lock().page_expected
    }

    pub(crate) fn expect_page(&self) {
        self.lock().page_expected = true;
    }

    /// Snapshot of the page view
    pub fn page(&self) -> Result<Page, ContextError> {
        self.with_page(|page| page.clone())
    }

    pub fn has_page(&self) -> bool {
        self.lock().page.is_some()
    }

    /// Hydrate `page` from the session's flash data and bind it to the request.
    pub(crate) fn install_page(&self, mut page: Page) {
        let mut scope = self.lock();
        let scope = &mut *scope;
        page.hydrate_from_session(&mut scope.session);
        scope.page = Some(page);
    }

    /// Schedule deletion of a stored session at finalization.
    ///
    /// Deleting the session bound to this request discards it instead of
    /// persisting it.
    pub fn delete_session(&self, session_id: &str) {
        let mut scope = self.lock();
        if scope.session.id() == session_id {
            scope.discard_active = true;
        } else if !scope.pending_deletions.iter().any(|id| id == session_id) {
            scope.pending_deletions.push(session_id.to_string());
        }
    }

    /// Discard the session bound to this request at finalization.
    pub fn delete_current_session(&self) {
        self.lock().discard_active = true;
    }

    pub fn is_discarded(&self) -> bool {
        self.lock().discard_active
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ContextError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or(ContextError::MissingSession)
    }
}
