//! Per-request context types and the log lines handed to a [`LogSink`](crate::LogSink).
//!
//! Values travel between the middleware stages as typed request/response
//! extensions, so a missing value is simply `None` rather than a lookup that
//! can fail.

use axum::{
    extract::ConnectInfo,
    http::{header::HeaderName, Extensions, HeaderMap},
};
use std::net::SocketAddr;
use tower_http::request_id::RequestId;

/// Opaque per-request identifier used to group related log lines.
///
/// This crate never creates one. Insert it as a request extension in an
/// upstream middleware and every line emitted for that request carries it.
///
/// ```rust
/// use axum::{body::Body, http::Request};
/// use bodylog::CorrelationId;
///
/// let mut request = Request::new(Body::empty());
/// request.extensions_mut().insert(CorrelationId::new("req-42"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve the correlation id from a request's extensions.
    ///
    /// Looks for a [`CorrelationId`] first, then for tower-http's
    /// [`RequestId`]. Yields an empty string when neither is present.
    pub fn resolve(extensions: &Extensions) -> String {
        if let Some(id) = extensions.get::<CorrelationId>() {
            return id.0.clone();
        }
        extensions
            .get::<RequestId>()
            .and_then(|id| id.header_value().to_str().ok())
            .map(str::to_owned)
            .unwrap_or_default()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error text reported by a handler, rendered at the end of the access line.
///
/// Handlers attach it to their response as an extension:
///
/// ```rust
/// use axum::{http::StatusCode, response::IntoResponse, Extension};
/// use bodylog::HandlerError;
///
/// async fn handler() -> impl IntoResponse {
///     (
///         StatusCode::BAD_GATEWAY,
///         Extension(HandlerError::new("upstream timed out")),
///         "try again later",
///     )
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Best-effort client address of a request, or an empty string when unknown.
///
/// Proxy headers are only consulted when `trust_forwarded_headers` is set;
/// otherwise the peer address from axum's [`ConnectInfo`] is used.
pub fn client_ip(
    headers: &HeaderMap,
    extensions: &Extensions,
    trust_forwarded_headers: bool,
) -> String {
    if trust_forwarded_headers {
        if let Some(ip) = forwarded_ip(headers) {
            return ip;
        }
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let from_header = |name: &HeaderName, first_only: bool| {
        let value = headers.get(name)?.to_str().ok()?;
        let candidate = if first_only {
            value.split(',').next()?
        } else {
            value
        };
        let candidate = candidate.trim();
        candidate
            .parse::<std::net::IpAddr>()
            .ok()
            .map(|ip| ip.to_string())
    };
    from_header(&X_FORWARDED_FOR, true).or_else(|| from_header(&X_REAL_IP, false))
}

/// Which stage produced a [`LogLine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `<client-ip> <method> <path>\n<body>`, emitted before the handler runs.
    RequestBody,
    /// The per-request access line, emitted after the handler chain.
    Access,
}

impl LineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineKind::RequestBody => "request_body",
            LineKind::Access => "access",
        }
    }
}

/// A finished, pre-formatted log line plus the context a sink needs to
/// correlate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub kind: LineKind,
    /// Empty when the request carried no correlation id.
    pub correlation_id: String,
    pub text: String,
}
