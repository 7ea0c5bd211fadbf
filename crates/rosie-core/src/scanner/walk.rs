use dashmap::DashMap;
use glob::Pattern;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::UNIX_EPOCH;
use tracing::error;

use crate::events::ScannedEntry;
use crate::progress::{ScanReporter, SilentReporter};

/// Compile glob patterns, logging and skipping the invalid ones.
pub fn compile_patterns<S: AsRef<str>>(globs: &[S]) -> Vec<Pattern> {
    globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob.as_ref()) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob.as_ref(), e);
                None
            }
        })
        .collect()
}

/// True if any pattern matches the file name or the full path.
pub fn matches_any(patterns: &[Pattern], path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy());
    patterns.iter().any(|pattern| {
        pattern.matches_path(path) || name.as_deref().is_some_and(|n| pattern.matches(n))
    })
}

/// Parallel walk of `root`. Directories and files matching `exclude` are
/// skipped along with everything below them; when `include` is non-empty
/// only files matching it are kept. Symlinks are never followed. The
/// result is sorted by path.
pub fn scan_entries<S: AsRef<str>>(
    root: &Path,
    include: &[S],
    exclude: &[S],
) -> io::Result<Vec<ScannedEntry>> {
    walk_tree(root, include, exclude, &SilentReporter)
}

pub(crate) fn walk_tree<S: AsRef<str>>(
    root: &Path,
    include: &[S],
    exclude: &[S],
    reporter: &dyn ScanReporter,
) -> io::Result<Vec<ScannedEntry>> {
    let filters = Filters {
        include: compile_patterns(include),
        exclude: compile_patterns(exclude),
    };
    let found: DashMap<std::path::PathBuf, ScannedEntry> = DashMap::new();
    let counter = AtomicUsize::new(0);

    visit_dirs(root, &filters, &found, &counter, reporter)?;

    let mut entries: Vec<ScannedEntry> = found.into_iter().map(|(_, entry)| entry).collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

struct Filters {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

fn visit_dirs(
    dir: &Path,
    filters: &Filters,
    found: &DashMap<std::path::PathBuf, ScannedEntry>,
    counter: &AtomicUsize,
    reporter: &dyn ScanReporter,
) -> io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            if err.kind() == io::ErrorKind::PermissionDenied {
                error!(
                    "Access denied reading directory {}: {}",
                    dir.display(),
                    err
                );
                return Ok(());
            } else {
                return Err(io::Error::new(
                    err.kind(),
                    format!("Error reading directory {}: {}", dir.display(), err),
                ));
            }
        }
    };

    entries.par_bridge().try_for_each(|entry_result| {
        let entry = entry_result.map_err(|err| {
            io::Error::new(
                err.kind(),
                format!("Error reading entry in directory {}: {}", dir.display(), err),
            )
        })?;

        let path = entry.path();
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(io::Error::new(
                    err.kind(),
                    format!("Error getting metadata for {}: {}", path.display(), err),
                ));
            }
        };

        if metadata.file_type().is_symlink() || matches_any(&filters.exclude, &path) {
            return Ok(());
        }

        let is_dir = metadata.is_dir();
        if !is_dir && !filters.include.is_empty() && !matches_any(&filters.include, &path) {
            return Ok(());
        }

        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64);
        let entry = ScannedEntry {
            path: path.clone(),
            size: if is_dir { 0 } else { metadata.len() },
            mtime,
            is_dir,
        };
        found.insert(path.clone(), entry);
        let seen = counter.fetch_add(1, Ordering::Relaxed) + 1;
        reporter.on_scan_progress(seen, &path.to_string_lossy());

        if is_dir {
            visit_dirs(&path, filters, found, counter, reporter)?;
        }
        Ok(())
    })
}
