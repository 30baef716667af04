//! In-memory sink for tests.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{LogLine, LogSink};

#[derive(Clone, Debug, Default)]
pub(crate) struct CollectingSink {
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl CollectingSink {
    pub(crate) fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().unwrap().clone()
    }

    /// Polls until at least `count` lines arrived; lines emitted from spawned
    /// tasks land after the response future resolves.
    pub(crate) async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<LogLine> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let lines = self.lines();
            if lines.len() >= count || tokio::time::Instant::now() >= deadline {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl LogSink for CollectingSink {
    fn emit(&self, line: LogLine) {
        self.lines.lock().unwrap().push(line);
    }
}
