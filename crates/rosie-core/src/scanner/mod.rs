pub mod walk;

pub use walk::{compile_patterns, matches_any, scan_entries};

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use crate::error::Error;
use crate::events::{DomainEvent, FilesScanned};
use crate::progress::ScanReporter;
use crate::storage::EventLog;

/// Source of the known-path set for the scheduler's scanner stage.
pub trait TreeScanner: Send + Sync {
    fn list_files(&self, root: &Path) -> Result<BTreeSet<PathBuf>, Error>;
}

/// Regular files directly inside the root; no recursion, no symlinks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectChildren;

impl TreeScanner for DirectChildren {
    fn list_files(&self, root: &Path) -> Result<BTreeSet<PathBuf>, Error> {
        let mut files = BTreeSet::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.insert(entry.path());
            }
        }
        Ok(files)
    }
}

/// Walk `root` and append its entries as `FilesScanned` batches of at most
/// `batch_size`. Each event's `count` is the running total. An empty tree
/// still yields one event so the root is recorded. Returns the entry count.
pub fn scan_and_emit<S: AsRef<str>>(
    log: &EventLog,
    root: &Path,
    include: &[S],
    exclude: &[S],
    batch_size: usize,
    reporter: &dyn ScanReporter,
) -> Result<usize, Error> {
    let root_display = root.to_string_lossy();
    reporter.on_scan_start(&root_display);
    let scan_start = Instant::now();
    let entries = walk::walk_tree(root, include, exclude, reporter)?;
    let total = entries.len();
    reporter.on_scan_complete(total, scan_start.elapsed().as_secs_f64());
    info!("Scanned {} entries under {}", total, root.display());

    let batch_size = batch_size.max(1);
    let mut written = 0usize;
    let mut batches: Vec<Vec<_>> = entries
        .chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect();
    if batches.is_empty() {
        batches.push(Vec::new());
    }

    for batch in batches {
        written += batch.len();
        let event = DomainEvent::FilesScanned(FilesScanned {
            root: root.to_path_buf(),
            count: written as u64,
            batch: Some(batch),
        });
        let id = log.append(&event)?;
        debug!("FilesScanned #{}: {}/{} entries", id, written, total);
        reporter.on_batch_written(id, written, total);
    }
    Ok(total)
}
