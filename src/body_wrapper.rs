//! Body capture utilities.
//!
//! Request bodies are read fully and handed back as an equivalent body.
//! Response bodies are teed: every chunk streams through untouched while a
//! copy accumulates in a [`ResponseBuffer`].

use axum::body::{Body, Bytes};
use bytes::BytesMut;
use futures::stream;
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use std::{
    convert::Infallible,
    io::{self, Write},
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Error type for body capture operations
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("error reading request body: {0}")]
    Read(#[source] axum::Error),
}

/// Reads a request body into memory and returns the bytes together with a
/// replacement body yielding the same bytes and trailers.
///
/// When reading fails the original stream is already partly consumed, so the
/// replacement is empty.
pub async fn read_request_body(body: Body) -> (Body, Result<Bytes, CaptureError>) {
    match body.collect().await {
        Ok(collected) => {
            let trailers = collected.trailers().cloned();
            let bytes = collected.to_bytes();
            let replacement = match trailers {
                None => Body::from(bytes.clone()),
                Some(trailers) => Body::new(StreamBody::new(stream::iter([
                    Ok::<_, Infallible>(Frame::data(bytes.clone())),
                    Ok(Frame::trailers(trailers)),
                ]))),
            };
            (replacement, Ok(bytes))
        }
        Err(e) => (Body::empty(), Err(CaptureError::Read(e))),
    }
}

/// Append-only copy of a response body, shared between the tee that fills it
/// and the access log that reads it once the body has finished streaming.
///
/// Stored as a response extension by [`ResponseTeeLayer`](crate::ResponseTeeLayer).
#[derive(Clone, Debug)]
pub struct ResponseBuffer {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    bytes: Mutex<BytesMut>,
    finished: watch::Sender<bool>,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                bytes: Mutex::new(BytesMut::new()),
                finished,
            }),
        }
    }

    pub fn append(&self, chunk: &[u8]) {
        self.shared
            .bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(chunk);
    }

    /// Snapshot of everything buffered so far.
    pub fn contents(&self) -> Bytes {
        self.shared
            .bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .freeze()
    }

    pub fn len(&self) -> usize {
        self.shared
            .bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks the body as complete. Idempotent.
    pub fn finish(&self) {
        self.shared.finished.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        *self.shared.finished.borrow()
    }

    /// Waits until the teed body has ended (or was dropped) and returns the
    /// buffered bytes.
    pub async fn finished(&self) -> Bytes {
        let mut rx = self.shared.finished.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel
        let _ = rx.wait_for(|done| *done).await;
        self.contents()
    }
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Owned by the teed stream. Finishes the buffer when the stream is dropped,
/// which covers normal completion, errors and client disconnects alike.
struct Tap {
    buffer: ResponseBuffer,
}

impl Tap {
    fn record(&self, chunk: &Bytes) {
        self.buffer.append(chunk);
    }
}

impl Drop for Tap {
    fn drop(&mut self) {
        debug!(bytes = self.buffer.len(), "Response body tee finished");
        self.buffer.finish();
    }
}

/// Wraps a response body so that every data chunk is copied into `buffer`
/// while passing through unchanged. Trailers and the size hint of the
/// original body are preserved.
///
/// # Examples
///
/// ```rust
/// use axum::body::Body;
/// use bodylog::body_wrapper::{tee_body, ResponseBuffer};
/// use http_body_util::BodyExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let buffer = ResponseBuffer::new();
/// let body = tee_body(Body::from("Hello, World!"), buffer.clone());
///
/// let delivered = body.collect().await?.to_bytes();
/// assert_eq!(delivered, buffer.finished().await);
/// # Ok(())
/// # }
/// ```
pub fn tee_body(body: Body, buffer: ResponseBuffer) -> Body {
    let tap = Tap { buffer };

    let teed = body
        .map_frame(move |frame| {
            if let Some(chunk) = frame.data_ref() {
                tap.record(chunk);
            }
            frame // pass through original
        })
        .map_err(|e| {
            warn!(error = %e, "Stream error during response body tee");
            e
        });

    Body::new(teed)
}

/// A [`Write`] decorator that forwards every write to the wrapped writer and
/// copies the bytes it accepted into an in-memory buffer.
///
/// Only the accepted prefix of a short write is buffered, so the buffer always
/// equals what the inner writer received. Errors are returned as-is and
/// buffer nothing.
#[derive(Debug)]
pub struct TeeWriter<W> {
    inner: W,
    buffer: Vec<u8>,
}

impl<W: Write> TeeWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }

    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_parts(self) -> (W, Vec<u8>) {
        (self.inner, self.buffer)
    }
}

impl<W: Write> Write for TeeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.buffer.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
