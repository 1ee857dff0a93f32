use serde::Serialize;
use std::sync::Mutex;

/// Running pass/fail/skip counts for one QC session.
pub struct MetricsRecorder {
    inner: Mutex<Metrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Metrics {
    pub fn inspected(&self) -> usize {
        self.passed + self.failed
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Metrics::default()),
        }
    }

    pub fn record_pass(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.passed += 1;
        }
    }

    pub fn record_fail(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.failed += 1;
        }
    }

    pub fn record_skip(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.skipped += 1;
        }
    }

    pub fn snapshot(&self) -> Metrics {
        self.inner
            .lock()
            .map(|metrics| *metrics)
            .unwrap_or_default()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate() {
        let recorder = MetricsRecorder::new();
        recorder.record_pass();
        recorder.record_pass();
        recorder.record_fail();
        recorder.record_skip();
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.inspected(), 3);
        assert_eq!(snapshot.skipped, 1);
    }
}
