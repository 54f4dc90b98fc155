//! Generic error pages
//!
//! Responses shown to end users when something goes wrong. They never carry
//! internal details; those go to the log.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

const INTERNAL_ERROR_HTML: &str = "<!DOCTYPE html>\
<html><head><title>Internal Server Error</title></head>\
<body><h1>Internal Server Error</h1>\
<p>Something went wrong while processing your request. Please try again later.</p>\
</body></html>";

const NOT_FOUND_HTML: &str = "<!DOCTYPE html>\
<html><head><title>Page Not Found</title></head>\
<body><h1>Page Not Found</h1>\
<p>The page you requested could not be found.</p>\
</body></html>";

/// Generic 500 page
pub fn internal_error_response() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Html(INTERNAL_ERROR_HTML)).into_response()
}

/// Generic 404 page
pub fn not_found_response() -> Response {
    (StatusCode::NOT_FOUND, Html(NOT_FOUND_HTML)).into_response()
}

/// Fallback handler for unmatched routes
pub async fn not_found_handler() -> Response {
    not_found_response()
}
