//! Session identifier transport over cookies

use axum::http::{header, HeaderMap};

/// Extract a cookie value by name from the request headers.
pub fn extract_cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookie_str| cookie_str.split(';'))
        .map(|part| part.trim())
        .find_map(|part| part.strip_prefix(&prefix).map(|value| value.to_string()))
        .filter(|value| !value.is_empty())
}

/// Build the `Set-Cookie` header binding the client to a session.
pub fn session_cookie_header(name: &str, session_id: &str, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax{}", name, session_id, secure)
}

/// Build the `Set-Cookie` header that removes the session cookie.
pub fn expired_cookie_header(name: &str, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{}", name, secure)
}
