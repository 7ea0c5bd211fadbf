/// Trait for reporting scan progress.
///
/// The CLI implements it with indicatif. All methods default to no-ops.
pub trait ScanReporter: Send + Sync {
    fn on_scan_start(&self, _root: &str) {}
    fn on_scan_progress(&self, _entries_found: usize, _current_path: &str) {}
    fn on_scan_complete(&self, _total_entries: usize, _duration_secs: f64) {}
    fn on_batch_written(&self, _event_id: i64, _entries_written: usize, _total_entries: usize) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ScanReporter for SilentReporter {}
