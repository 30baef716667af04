//! Response body tee.

use axum::{body::Body, extract::Request, response::Response};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tower::{Layer, Service};

use crate::body_wrapper::{tee_body, ResponseBuffer};

/// Tower layer that copies every response body chunk into a
/// [`ResponseBuffer`] while streaming it to the client unchanged.
///
/// The buffer is inserted into the response extensions, where
/// [`AccessLogLayer`](crate::AccessLogLayer) picks it up.
#[derive(Clone, Debug)]
pub struct ResponseTeeLayer {
    enabled: bool,
}

impl ResponseTeeLayer {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    /// A layer that only tees when `enabled` is set, and is a pass-through
    /// otherwise.
    pub fn when(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Default for ResponseTeeLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for ResponseTeeLayer {
    type Service = ResponseTeeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResponseTeeService {
            inner,
            enabled: self.enabled,
        }
    }
}

/// Service created by [`ResponseTeeLayer`].
#[derive(Clone, Debug)]
pub struct ResponseTeeService<S> {
    inner: S,
    enabled: bool,
}

impl<S> Service<Request> for ResponseTeeService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let future = self.inner.call(request);
        if !self.enabled {
            return Box::pin(future);
        }

        Box::pin(async move {
            let mut response = future.await?;
            let buffer = ResponseBuffer::new();
            let body = std::mem::replace(response.body_mut(), Body::empty());
            *response.body_mut() = tee_body(body, buffer.clone());
            response.extensions_mut().insert(buffer);
            Ok(response)
        })
    }
}
