//! Text rendering for captured bodies and access lines.

use axum::http::{header::ACCEPT_ENCODING, HeaderMap, Method, StatusCode};
use chrono::{DateTime, Local};
use flate2::read::GzDecoder;
use std::{io::Read, time::Duration};
use tracing::debug;

/// Bodies longer than this many bytes are cut before logging.
pub const MAX_LOGGED_BODY_BYTES: usize = 1024;

/// Appended to a body that was cut at [`MAX_LOGGED_BODY_BYTES`].
pub const TRUNCATION_MARKER: &str = "...";

const TIMESTAMP_FORMAT: &str = "%Y/%m/%d - %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to gunzip response body: {0}")]
    Gzip(#[from] std::io::Error),
}

/// Renders a body for logging: the first [`MAX_LOGGED_BODY_BYTES`] bytes,
/// decoded lossily, followed by [`TRUNCATION_MARKER`] if anything was cut.
pub fn truncate_body(body: &[u8]) -> String {
    if body.len() > MAX_LOGGED_BODY_BYTES {
        let mut text = String::from_utf8_lossy(&body[..MAX_LOGGED_BODY_BYTES]).into_owned();
        text.push_str(TRUNCATION_MARKER);
        text
    } else {
        String::from_utf8_lossy(body).into_owned()
    }
}

pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains("gzip"))
}

/// Decompresses at most one byte more than [`MAX_LOGGED_BODY_BYTES`], which
/// is enough for [`truncate_body`] to decide whether to add the marker.
pub fn gunzip_prefix(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut decompressed = Vec::with_capacity(MAX_LOGGED_BODY_BYTES + 1);
    GzDecoder::new(data)
        .take(MAX_LOGGED_BODY_BYTES as u64 + 1)
        .read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// `<client-ip> <method> <path>\n<truncated-body>`
pub fn request_body_line(client_ip: &str, method: &Method, path: &str, body: &[u8]) -> String {
    format!("{client_ip} {method} {path}\n{}", truncate_body(body))
}

/// The response-body segment of an access line: the (possibly gunzipped)
/// body, truncated, followed by a newline.
///
/// Decompression is only attempted when `gzip_accepted` is set; if it fails
/// the raw bytes are logged instead.
pub fn response_segment(body: &[u8], gzip_accepted: bool) -> String {
    let mut segment = if gzip_accepted {
        match gunzip_prefix(body) {
            Ok(plain) => truncate_body(&plain),
            Err(e) => {
                debug!(error = %e, "Logging response body without decompression");
                truncate_body(body)
            }
        }
    } else {
        truncate_body(body)
    };
    segment.push('\n');
    segment
}

/// Everything the access line reports about one request.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub tag: String,
    pub timestamp: DateTime<Local>,
    pub correlation_id: String,
    pub status: StatusCode,
    pub latency: Duration,
    pub client_ip: String,
    pub method: Method,
    pub path: String,
    /// Empty when the handler reported no error.
    pub error: String,
}

impl AccessRecord {
    /// `[TAG] <timestamp> | <correlation-id> | <status> | <latency> | <client-ip> | <method> <path>`
    /// plus ` | <error>` when an error was reported.
    ///
    /// The error stays on the same line as the request fields, so the line
    /// never contains a newline; only the response segment added by
    /// [`render`](Self::render) starts a new line.
    pub fn base_line(&self) -> String {
        let mut line = format!(
            "[{}] {} | {} | {:>3} | {:>13} | {:>15} | {:<7} {}",
            self.tag,
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.correlation_id,
            self.status.as_u16(),
            format!("{:?}", self.latency),
            self.client_ip,
            self.method.as_str(),
            self.path,
        );
        if !self.error.is_empty() {
            line.push_str(" | ");
            line.push_str(&self.error);
        }
        line
    }

    /// The full access line, with the response segment on its own line when
    /// one is given.
    pub fn render(&self, response_segment: Option<&str>) -> String {
        let mut line = self.base_line();
        if let Some(segment) = response_segment {
            line.push('\n');
            line.push_str(segment);
        }
        line
    }
}
