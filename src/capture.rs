//! Request body capture.
//!
//! Reads the request body, logs a truncated copy, and hands downstream
//! services a body with the same bytes.

use axum::{body::HttpBody, extract::Request, response::Response};
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::{
    body_wrapper::read_request_body,
    format::request_body_line,
    types::{client_ip, CorrelationId},
    BodyLogConfig, LineKind, LogLine, LogSink,
};

/// Tower layer that logs request bodies before the request reaches the inner
/// service.
///
/// Does nothing, and reads nothing, unless
/// [`BodyLogConfig::capture_bodies`] is set.
#[derive(Clone)]
pub struct RequestCaptureLayer {
    config: Arc<BodyLogConfig>,
    sink: Arc<dyn LogSink>,
}

impl RequestCaptureLayer {
    pub fn new<K: LogSink>(config: BodyLogConfig, sink: K) -> Self {
        Self::from_shared(Arc::new(config), Arc::new(sink))
    }

    pub(crate) fn from_shared(config: Arc<BodyLogConfig>, sink: Arc<dyn LogSink>) -> Self {
        Self { config, sink }
    }
}

impl<S> Layer<S> for RequestCaptureLayer {
    type Service = RequestCaptureService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestCaptureService {
            inner,
            config: self.config.clone(),
            sink: self.sink.clone(),
        }
    }
}

/// Service created by [`RequestCaptureLayer`].
#[derive(Clone)]
pub struct RequestCaptureService<S> {
    inner: S,
    config: Arc<BodyLogConfig>,
    sink: Arc<dyn LogSink>,
}

impl<S> Service<Request> for RequestCaptureService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        if !self.config.capture_bodies {
            let future = self.inner.call(request);
            return Box::pin(future);
        }

        // The ready inner service is the one that must handle this request
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let config = self.config.clone();
        let sink = self.sink.clone();

        Box::pin(async move {
            let (parts, body) = request.into_parts();

            let body = if body.size_hint().exact() == Some(0) {
                body
            } else {
                let (replacement, captured) = read_request_body(body).await;
                match captured {
                    Ok(bytes) if bytes.is_empty() => {}
                    Ok(bytes) => {
                        let text = request_body_line(
                            &client_ip(
                                &parts.headers,
                                &parts.extensions,
                                config.trust_forwarded_headers,
                            ),
                            &parts.method,
                            parts.uri.path(),
                            &bytes,
                        );
                        sink.emit(LogLine {
                            kind: LineKind::RequestBody,
                            correlation_id: CorrelationId::resolve(&parts.extensions),
                            text,
                        });
                    }
                    Err(e) => warn!(error = %e, "Proceeding without request body capture"),
                }
                replacement
            };

            debug!(method = %parts.method, uri = %parts.uri, "Forwarding captured request");
            inner.call(Request::from_parts(parts, body)).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CollectingSink;
    use axum::{
        body::{Body, Bytes},
        extract::ConnectInfo,
        routing::post,
        Router,
    };
    use futures::stream;
    use http_body_util::BodyExt;
    use std::{io, net::SocketAddr};
    use tower::ServiceExt;

    async fn echo(body: Bytes) -> Bytes {
        body
    }

    fn app(config: BodyLogConfig, sink: CollectingSink) -> Router {
        Router::new()
            .route("/v1/x", post(echo))
            .layer(RequestCaptureLayer::new(config, sink))
    }

    fn enabled() -> BodyLogConfig {
        BodyLogConfig {
            capture_bodies: true,
            ..BodyLogConfig::default()
        }
    }

    fn post_request(body: impl Into<Body>) -> Request {
        let mut request = axum::http::Request::post("/v1/x")
            .body(body.into())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 20], 40000))));
        request
    }

    #[tokio::test]
    async fn test_logs_body_and_keeps_it_for_handler() {
        let sink = CollectingSink::default();
        let mut request = post_request(r#"{"a":1}"#);
        request.extensions_mut().insert(CorrelationId::new("cid-7"));

        let response = app(enabled(), sink.clone()).oneshot(request).await.unwrap();
        let echoed = response.into_body().collect().await.unwrap().to_bytes();

        assert_eq!(echoed, r#"{"a":1}"#);
        assert_eq!(
            sink.lines(),
            vec![LogLine {
                kind: LineKind::RequestBody,
                correlation_id: "cid-7".to_string(),
                text: "192.168.1.20 POST /v1/x\n{\"a\":1}".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_disabled_capture_logs_nothing() {
        let sink = CollectingSink::default();

        let response = app(BodyLogConfig::default(), sink.clone())
            .oneshot(post_request("payload"))
            .await
            .unwrap();
        let echoed = response.into_body().collect().await.unwrap().to_bytes();

        assert_eq!(echoed, "payload");
        assert!(sink.lines().is_empty());
    }

    #[tokio::test]
    async fn test_empty_body_logs_nothing() {
        let sink = CollectingSink::default();

        app(enabled(), sink.clone())
            .oneshot(post_request(""))
            .await
            .unwrap();

        assert!(sink.lines().is_empty());
    }

    #[tokio::test]
    async fn test_large_body_is_truncated_in_log_only() {
        let sink = CollectingSink::default();
        let response = app(enabled(), sink.clone())
            .oneshot(post_request("b".repeat(3000)))
            .await
            .unwrap();
        let echoed = response.into_body().collect().await.unwrap().to_bytes();

        assert_eq!(echoed.len(), 3000);
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0].text,
            format!("192.168.1.20 POST /v1/x\n{}...", "b".repeat(1024))
        );
    }

    #[tokio::test]
    async fn test_read_failure_still_reaches_handler() {
        let sink = CollectingSink::default();
        let failing = stream::iter(vec![
            Ok::<_, io::Error>(Bytes::from("partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);

        let response = app(enabled(), sink.clone())
            .oneshot(post_request(Body::from_stream(failing)))
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let echoed = response.into_body().collect().await.unwrap().to_bytes();
        assert!(echoed.is_empty());
        assert!(sink.lines().is_empty());
    }
}
