//! One access line per request.

use axum::{extract::Request, response::Response};
use chrono::Local;
use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Instant,
};
use tower::{Layer, Service};
use tracing::debug;

use crate::{
    body_wrapper::ResponseBuffer,
    format::{accepts_gzip, response_segment, AccessRecord},
    types::{client_ip, CorrelationId, HandlerError},
    BodyLogConfig, LineKind, LogLine, LogSink,
};

/// Tower layer that emits an access line once the inner service has
/// produced its response.
///
/// With [`BodyLogConfig::debug_detail`] set and a [`ResponseBuffer`] present
/// in the response extensions, the line is emitted after the response body
/// has finished streaming and carries the captured body.
#[derive(Clone)]
pub struct AccessLogLayer {
    config: Arc<BodyLogConfig>,
    sink: Arc<dyn LogSink>,
}

impl AccessLogLayer {
    pub fn new<K: LogSink>(config: BodyLogConfig, sink: K) -> Self {
        Self::from_shared(Arc::new(config), Arc::new(sink))
    }

    pub(crate) fn from_shared(config: Arc<BodyLogConfig>, sink: Arc<dyn LogSink>) -> Self {
        Self { config, sink }
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService {
            inner,
            config: self.config.clone(),
            sink: self.sink.clone(),
        }
    }
}

/// Service created by [`AccessLogLayer`].
#[derive(Clone)]
pub struct AccessLogService<S> {
    inner: S,
    config: Arc<BodyLogConfig>,
    sink: Arc<dyn LogSink>,
}

impl<S> Service<Request> for AccessLogService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Display,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let start = Instant::now();
        let config = self.config.clone();
        let sink = self.sink.clone();

        let correlation_id = CorrelationId::resolve(request.extensions());
        let client_ip = client_ip(
            request.headers(),
            request.extensions(),
            config.trust_forwarded_headers,
        );
        let method = request.method().clone();
        let path = request.uri().path().to_owned();
        let gzip_accepted = accepts_gzip(request.headers());

        let future = self.inner.call(request);

        Box::pin(async move {
            let result = future.await;

            let (status, error, buffer) = match &result {
                Ok(response) => (
                    response.status(),
                    response
                        .extensions()
                        .get::<HandlerError>()
                        .map(|e| e.0.clone())
                        .unwrap_or_default(),
                    response.extensions().get::<ResponseBuffer>().cloned(),
                ),
                Err(e) => (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    e.to_string(),
                    None,
                ),
            };

            let record = AccessRecord {
                tag: config.tag.clone(),
                timestamp: Local::now(),
                correlation_id,
                status,
                latency: start.elapsed(),
                client_ip,
                method,
                path,
                error,
            };

            match buffer.filter(|_| config.debug_detail) {
                Some(buffer) => {
                    // The body streams after we return, so log once it is done
                    tokio::spawn(async move {
                        let body = buffer.finished().await;
                        debug!(bytes = body.len(), "Response body captured for access log");
                        let segment = response_segment(&body, gzip_accepted);
                        emit(sink.as_ref(), &record, Some(&segment));
                    });
                }
                None => emit(sink.as_ref(), &record, None),
            }

            result
        })
    }
}

fn emit(sink: &dyn LogSink, record: &AccessRecord, segment: Option<&str>) {
    sink.emit(LogLine {
        kind: LineKind::Access,
        correlation_id: record.correlation_id.clone(),
        text: record.render(segment),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{testing::CollectingSink, ResponseTeeLayer};
    use axum::{
        body::Body,
        http::{self, StatusCode},
        response::IntoResponse,
        routing::get,
        Extension, Router,
    };
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::{ServiceBuilder, ServiceExt};

    fn app(config: BodyLogConfig, sink: CollectingSink) -> Router {
        Router::new()
            .route("/ok", get(|| async { "fine" }))
            .route(
                "/fail",
                get(|| async {
                    (
                        StatusCode::BAD_GATEWAY,
                        Extension(HandlerError::new("upstream timed out")),
                        "bad gateway",
                    )
                        .into_response()
                }),
            )
            .layer(
                ServiceBuilder::new()
                    .layer(AccessLogLayer::new(config, sink))
                    .layer(ResponseTeeLayer::new()),
            )
    }

    fn get_request(path: &str) -> Request {
        http::Request::get(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_correlation_id_renders_empty_field() {
        let sink = CollectingSink::default();

        let response = app(BodyLogConfig::default(), sink.clone())
            .oneshot(get_request("/ok"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].kind, LineKind::Access);
        assert_eq!(lines[0].correlation_id, "");
        assert!(lines[0].text.starts_with("[HTTP] "));
        assert!(lines[0].text.contains(" |  | 200 | "));
        assert!(lines[0].text.ends_with("GET     /ok"));
    }

    #[tokio::test]
    async fn test_handler_error_is_appended() {
        let sink = CollectingSink::default();
        let mut request = get_request("/fail");
        request.extensions_mut().insert(CorrelationId::new("cid-9"));

        app(BodyLogConfig::default(), sink.clone())
            .oneshot(request)
            .await
            .unwrap();

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].text.contains(" | cid-9 | 502 | "));
        assert!(lines[0].text.ends_with("GET     /fail | upstream timed out"));
    }

    #[tokio::test]
    async fn test_debug_detail_appends_body_after_streaming() {
        let sink = CollectingSink::default();
        let config = BodyLogConfig {
            debug_detail: true,
            ..BodyLogConfig::default()
        };

        let response = app(config, sink.clone())
            .oneshot(get_request("/ok"))
            .await
            .unwrap();
        let delivered = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(delivered, "fine");

        let lines = sink.wait_for(1, Duration::from_secs(1)).await;
        assert!(lines[0].text.ends_with("GET     /ok\nfine\n"));
    }

    #[tokio::test]
    async fn test_without_debug_detail_body_is_not_logged() {
        let sink = CollectingSink::default();

        let response = app(BodyLogConfig::default(), sink.clone())
            .oneshot(get_request("/ok"))
            .await
            .unwrap();
        response.into_body().collect().await.unwrap();

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].text.contains('\n'));
    }
}
