use indicatif::{ProgressBar, ProgressStyle};
use rosie_core::ScanReporter;
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif.
///
/// - Walk: spinner (entry count unknown upfront)
/// - Event writes: progress bar over the walked entries
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(TICK_CHARS);
    pb.set_style(style);
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

impl ScanReporter for CliReporter {
    fn on_scan_start(&self, root: &str) {
        self.set_bar(spinner(format!("Scanning {}...", root)));
    }

    fn on_scan_progress(&self, entries_found: usize, _current_path: &str) {
        self.with_bar(|pb| pb.set_message(format!("Scanning... {} entries found", entries_found)));
    }

    fn on_scan_complete(&self, total_entries: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Scan complete: {} entries in {:.2}s",
            total_entries, duration_secs
        );

        let pb = ProgressBar::new(total_entries as u64);
        let style = ProgressStyle::with_template(
            "  {spinner:.cyan} Recording [{bar:30.cyan/dim}] {pos}/{len} entries",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
        .tick_chars(TICK_CHARS);
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_batch_written(&self, event_id: i64, entries_written: usize, total_entries: usize) {
        self.with_bar(|pb| pb.set_position(entries_written as u64));
        if entries_written >= total_entries {
            self.finish_bar();
            eprintln!(
                "  \x1b[32m✓\x1b[0m Recorded {} entries (last event #{})",
                total_entries, event_id
            );
        }
    }
}
