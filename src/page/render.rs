//! Rendering seam
//!
//! The template engine is supplied by the application through [`Renderer`].
//! Views are always rendered inside a base layout with a data bag carrying
//! the request's page and session.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::error;

use crate::logging::targets;
use crate::server::context::{ContextError, RequestContext};
use crate::server::errors::internal_error_response;

/// Base layouts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Layout {
    #[default]
    Standard,
}

impl Layout {
    pub fn name(&self) -> &'static str {
        match self {
            Layout::Standard => "standard",
        }
    }

    /// Template key for one of the layout's partials, e.g. `standard.wrapper`.
    pub fn suffix(&self, part: &str) -> String {
        format!("{}.{}", self.name(), part)
    }
}

/// Rendering errors
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("unknown template: {0}")]
    UnknownTemplate(String),

    #[error("template execution failed: {0}")]
    Execution(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Template engine
pub trait Renderer: Send + Sync {
    /// Render `view` inside the `layout` template and return the HTML.
    fn render(&self, layout: &str, view: &str, data: &Value) -> Result<String, RenderError>;
}

/// Data bag handed to templates
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ViewData<T: Serialize> {
    pub page: Value,
    pub session: Value,
    /// View-specific data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ViewData<T> {
    /// Snapshot the request's page and session.
    ///
    /// A GET request without a page view is an error; other methods get a
    /// null page.
    pub fn from_context(ctx: &RequestContext, data: Option<T>) -> Result<Self, RenderError> {
        let page = match ctx.page() {
            Ok(page) => serde_json::to_value(page)?,
            Err(e) if ctx.expects_page() => return Err(e.into()),
            Err(_) => Value::Null,
        };
        let session = serde_json::to_value(ctx.session())?;
        Ok(ViewData {
            page,
            session,
            data,
        })
    }
}

/// Render `view` for the current request.
///
/// Failures are logged and answered with the generic 500 page.
pub fn render_view<T: Serialize>(
    renderer: &dyn Renderer,
    layout: Layout,
    view: &str,
    ctx: &RequestContext,
    data: Option<T>,
) -> Response {
    let result = ViewData::from_context(ctx, data)
        .and_then(|bag| Ok(serde_json::to_value(bag)?))
        .and_then(|bag| renderer.render(&layout.suffix("wrapper"), view, &bag));

    match result {
        Ok(html) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            )],
            html,
        )
            .into_response(),
        Err(e) => {
            ctx.span().in_scope(|| {
                error!(target: targets::PAGE, view = view, error = %e, "render failed");
            });
            internal_error_response()
        }
    }
}
