//! Default [`LogSink`] backed by `tracing`.

use tracing::info;

use crate::{LogLine, LogSink};

/// Emits every line at INFO level through `tracing`.
///
/// The correlation id and line kind are attached as structured fields, so a
/// subscriber can group lines belonging to one request.
///
/// # Examples
///
/// ```rust,no_run
/// use bodylog::{BodyLogConfig, BodyLogLayer, TracingSink};
///
/// let layer = BodyLogLayer::new(BodyLogConfig::default(), TracingSink);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, line: LogLine) {
        info!(
            correlation_id = %line.correlation_id,
            kind = line.kind.as_str(),
            "{}",
            line.text
        );
    }
}
