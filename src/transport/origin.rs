//! Localhost-only CORS policy for the HTTP transport.
//!
//! Requests without an `Origin` header (CLI clients, curl) pass unchanged.
//! Browser requests are only accepted from `localhost`, `127.0.0.1` or
//! `[::1]` on any port; every other origin is refused with 403 before it
//! reaches the MCP service.

use axum::Json;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::warn;
use url::Url;

const ALLOWED_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]"];
const ALLOW_METHODS: &str = "GET, POST, DELETE, OPTIONS";
const ALLOW_HEADERS: &str =
    "Content-Type, Accept, Authorization, Mcp-Session-Id, Mcp-Protocol-Version, Last-Event-ID";
const EXPOSE_HEADERS: &str = "Mcp-Session-Id";

/// Whether `origin` names a loopback host.
pub fn is_localhost_origin(origin: &str) -> bool {
    Url::parse(origin)
        .ok()
        .and_then(|url| {
            url.host_str()
                .map(|host| ALLOWED_HOSTS.contains(&host.to_ascii_lowercase().as_str()))
        })
        .unwrap_or(false)
}

/// axum middleware enforcing the localhost origin policy.
pub async fn localhost_only(request: Request, next: Next) -> Response {
    let Some(origin) = request.headers().get(header::ORIGIN).cloned() else {
        return next.run(request).await;
    };

    let allowed = origin.to_str().map(is_localhost_origin).unwrap_or(false);
    if !allowed {
        warn!(origin = ?origin, "Rejected request from non-localhost origin");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "Forbidden",
                "message": "Only localhost origins are allowed",
            })),
        )
            .into_response();
    }

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(&mut response, origin);
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(&mut response, origin);
    response
}

fn apply_cors_headers(response: &mut Response, origin: HeaderValue) {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSE_HEADERS),
    );
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localhost_origins() {
        assert!(is_localhost_origin("http://localhost:3000"));
        assert!(is_localhost_origin("https://localhost"));
        assert!(is_localhost_origin("http://127.0.0.1:8080"));
        assert!(is_localhost_origin("http://[::1]:5173"));
        assert!(is_localhost_origin("http://LOCALHOST:3000"));
    }

    #[test]
    fn test_foreign_origins() {
        assert!(!is_localhost_origin("https://evil.example"));
        assert!(!is_localhost_origin("http://localhost.evil.example"));
        assert!(!is_localhost_origin("http://127.0.0.2"));
        assert!(!is_localhost_origin("null"));
        assert!(!is_localhost_origin(""));
    }
}
