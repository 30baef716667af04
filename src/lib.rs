//! # bodylog
//!
//! Axum middleware that captures HTTP request and response bodies for diagnostic logging,
//! producing one text record per request.
//!
//! ## Features
//!
//! - **Request body capture**: reads the body, logs a truncated copy, and hands the handler an
//!   identical body
//! - **Response tee**: every response chunk streams to the client untouched while a copy is kept
//! - **Access lines**: timestamp, correlation id, status, latency, client address, method, path
//!   and handler error on one line, optionally followed by the (gunzipped, truncated) response
//!   body
//! - **Degrade the log, never the request**: capture and decode failures only ever shorten the
//!   log output
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{routing::post, Router};
//! use bodylog::{BodyLogConfig, BodyLogLayer, TracingSink};
//! use std::net::SocketAddr;
//!
//! async fn echo(body: String) -> String {
//!     body
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = BodyLogConfig {
//!         capture_bodies: true,
//!         debug_detail: true,
//!         ..BodyLogConfig::default()
//!     };
//!
//!     let app = Router::new()
//!         .route("/echo", post(echo))
//!         .layer(BodyLogLayer::new(config, TracingSink));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<SocketAddr>(),
//!     )
//!     .await
//!     .unwrap();
//! }
//! ```
//!
//! ## Custom Sinks
//!
//! Implement [`LogSink`] to send the finished lines somewhere other than `tracing`:
//!
//! ```rust
//! use bodylog::{LogLine, LogSink};
//!
//! #[derive(Debug)]
//! struct StderrSink;
//!
//! impl LogSink for StderrSink {
//!     fn emit(&self, line: LogLine) {
//!         eprintln!("[{}] {}", line.correlation_id, line.text);
//!     }
//! }
//! ```

use serde::Deserialize;
use std::sync::Arc;
use tower::Layer;

pub mod types;
pub use types::{CorrelationId, HandlerError, LineKind, LogLine};

pub mod body_wrapper;
pub use body_wrapper::{ResponseBuffer, TeeWriter};

pub mod format;

mod access_log;
mod capture;
mod response_tee;
pub use access_log::{AccessLogLayer, AccessLogService};
pub use capture::{RequestCaptureLayer, RequestCaptureService};
pub use response_tee::{ResponseTeeLayer, ResponseTeeService};

pub mod logging_sink;
pub use logging_sink::TracingSink;

#[cfg(test)]
pub(crate) mod testing;

/// Configuration for the body logging middleware.
///
/// # Examples
///
/// ```rust
/// use bodylog::BodyLogConfig;
///
/// // Everything off: plain access lines only
/// let config = BodyLogConfig::default();
///
/// // Request bodies and response bodies
/// let config = BodyLogConfig {
///     capture_bodies: true,
///     debug_detail: true,
///     ..BodyLogConfig::default()
/// };
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BodyLogConfig {
    /// Whether request bodies are read and logged
    pub capture_bodies: bool,
    /// Whether access lines carry the response body
    pub debug_detail: bool,
    /// Label at the start of every access line, rendered as `[tag]`
    pub tag: String,
    /// Whether `X-Forwarded-For` / `X-Real-IP` are trusted for the client address
    pub trust_forwarded_headers: bool,
}

impl Default for BodyLogConfig {
    fn default() -> Self {
        Self {
            capture_bodies: false,
            debug_detail: false,
            tag: "HTTP".to_string(),
            trust_forwarded_headers: false,
        }
    }
}

impl BodyLogConfig {
    /// Builds a configuration from `BODY_LOG_ENABLED`, `DEBUG`, `BODY_LOG_TAG` and
    /// `BODY_LOG_TRUST_FORWARDED`. Unset variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).is_some_and(|value| parse_flag(&value));
        let defaults = Self::default();
        Self {
            capture_bodies: flag("BODY_LOG_ENABLED"),
            debug_detail: flag("DEBUG"),
            tag: lookup("BODY_LOG_TAG")
                .filter(|tag| !tag.is_empty())
                .unwrap_or(defaults.tag),
            trust_forwarded_headers: flag("BODY_LOG_TRUST_FORWARDED"),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Destination for finished log lines.
///
/// The middleware hands every line over synchronously on the request path, so
/// implementations should not block; queue the line if persisting it is slow.
pub trait LogSink: Send + Sync + 'static {
    fn emit(&self, line: LogLine);
}

/// Tower layer installing the full pipeline: request capture, access log and
/// response tee, outermost first.
///
/// The response tee is only installed when
/// [`debug_detail`](BodyLogConfig::debug_detail) is set, since nothing reads
/// the buffer otherwise.
///
/// ```rust,no_run
/// use axum::{routing::get, Router};
/// use bodylog::{BodyLogConfig, BodyLogLayer, TracingSink};
///
/// # async fn hello() -> &'static str { "Hello" }
/// let app: Router = Router::new()
///     .route("/hello", get(hello))
///     .layer(BodyLogLayer::new(BodyLogConfig::from_env(), TracingSink));
/// ```
#[derive(Clone)]
pub struct BodyLogLayer {
    capture: RequestCaptureLayer,
    access: AccessLogLayer,
    tee: ResponseTeeLayer,
}

impl BodyLogLayer {
    pub fn new<K: LogSink>(config: BodyLogConfig, sink: K) -> Self {
        let tee = ResponseTeeLayer::when(config.debug_detail);
        let config = Arc::new(config);
        let sink: Arc<dyn LogSink> = Arc::new(sink);
        Self {
            capture: RequestCaptureLayer::from_shared(config.clone(), sink.clone()),
            access: AccessLogLayer::from_shared(config, sink),
            tee,
        }
    }
}

impl<S> Layer<S> for BodyLogLayer {
    type Service = RequestCaptureService<AccessLogService<ResponseTeeService<S>>>;

    fn layer(&self, inner: S) -> Self::Service {
        self.capture.layer(self.access.layer(self.tee.layer(inner)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_quiet() {
        let config = BodyLogConfig::default();
        assert!(!config.capture_bodies);
        assert!(!config.debug_detail);
        assert!(!config.trust_forwarded_headers);
        assert_eq!(config.tag, "HTTP");
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("BODY_LOG_ENABLED", "true"),
            ("DEBUG", " ON "),
            ("BODY_LOG_TAG", "GIN"),
            ("BODY_LOG_TRUST_FORWARDED", "nope"),
        ]
        .into_iter()
        .collect();

        let config = BodyLogConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert!(config.capture_bodies);
        assert!(config.debug_detail);
        assert_eq!(config.tag, "GIN");
        assert!(!config.trust_forwarded_headers);
    }

    #[test]
    fn test_config_from_empty_lookup_uses_defaults() {
        let config = BodyLogConfig::from_lookup(|_| None);
        assert!(!config.capture_bodies);
        assert!(!config.debug_detail);
        assert_eq!(config.tag, "HTTP");
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: BodyLogConfig =
            serde_json::from_str(r#"{"capture_bodies": true, "tag": "API"}"#).unwrap();
        assert!(config.capture_bodies);
        assert!(!config.debug_detail);
        assert_eq!(config.tag, "API");
    }

    #[test]
    fn test_parse_flag() {
        for value in ["1", "true", "TRUE", "yes", "on"] {
            assert!(parse_flag(value), "{value}");
        }
        for value in ["", "0", "false", "off", "enabled"] {
            assert!(!parse_flag(value), "{value}");
        }
    }
}
