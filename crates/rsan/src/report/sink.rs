//! Destinations for rendered reports.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

/// Receives rendered reports. Each call carries one complete report and must
/// be written without interleaving with other reports.
pub trait ReportSink: Send + Sync {
    fn emit(&self, report: &str);

    /// Flush buffered output at session end.
    fn flush(&self) {}
}

/// Writes reports to standard error.
#[derive(Clone, Copy, Debug, Default)]
pub struct StderrSink;

impl ReportSink for StderrSink {
    fn emit(&self, report: &str) {
        let mut stderr = std::io::stderr().lock();
        // Nowhere left to report a failing stderr.
        let _ = stderr.write_all(report.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().lock().flush();
    }
}

/// Collects reports in memory. Clones share the buffer.
#[derive(Clone, Debug, Default)]
pub struct BufferSink {
    reports: Arc<Mutex<Vec<String>>>,
}

impl BufferSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All output so far, concatenated.
    #[must_use]
    pub fn contents(&self) -> String {
        self.reports.lock().concat()
    }

    /// Individual reports in emission order.
    #[must_use]
    pub fn reports(&self) -> Vec<String> {
        self.reports.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl ReportSink for BufferSink {
    fn emit(&self, report: &str) {
        self.reports.lock().push(report.to_string());
    }
}
