use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::warn;

const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Directories to create and `(src, dst)` moves for one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapedCluster {
    pub dirs: Vec<PathBuf>,
    pub moves: Vec<(PathBuf, PathBuf)>,
}

/// Turn a free-form cluster label into one path component that is valid on
/// Windows as well as POSIX.
pub fn sanitize_label(label: &str) -> String {
    let replaced: String = label
        .chars()
        .map(|ch| {
            if RESERVED_CHARS.contains(&ch) || ch.is_control() {
                '_'
            } else {
                ch
            }
        })
        .collect();
    let trimmed = replaced.trim_matches(|ch| ch == ' ' || ch == '.');
    if trimmed.is_empty() {
        return "cluster".to_string();
    }
    let stem = trimmed.split('.').next().unwrap_or(trimmed).trim_end();
    if RESERVED_NAMES
        .iter()
        .any(|name| name.eq_ignore_ascii_case(stem))
    {
        return format!("_{}", trimmed);
    }
    trimmed.to_string()
}

/// Lay out a cluster's members under `root` within the given limits.
///
/// Members go to `root/<label>` (or `root` itself when `max_depth <= 0`).
/// With a positive `max_children`, slices larger than the width are split
/// into contiguous `part_NNN` subdirectories, nested only as deep as the
/// slice needs and never more than `max_depth - 1` levels. Members that do
/// not fit are dropped.
pub fn shape_cluster_moves(
    root: &Path,
    label: &str,
    members: &[PathBuf],
    max_depth: Option<i64>,
    max_children: Option<i64>,
) -> ShapedCluster {
    let mut shaped = ShapedCluster::default();
    if members.is_empty() {
        return shaped;
    }

    let base = match max_depth {
        Some(depth) if depth <= 0 => root.to_path_buf(),
        _ => {
            let dir = root.join(sanitize_label(label));
            shaped.dirs.push(dir.clone());
            dir
        }
    };

    let width = match max_children {
        Some(width) if width > 0 => usize::try_from(width).unwrap_or(usize::MAX),
        _ => {
            place_directly(&base, members, &mut shaped);
            return shaped;
        }
    };

    let needed = levels_needed(members.len(), width);
    let levels = match max_depth {
        Some(depth) if depth <= 1 => 0,
        Some(depth) => needed.min(u32::try_from(depth - 1).unwrap_or(u32::MAX)),
        None => needed,
    };

    let placed = distribute(&base, members, width, levels, &mut shaped);
    if placed < members.len() {
        warn!(
            "Cluster '{}': {} of {} members exceed max_depth={:?}, max_children={} and were left out",
            label,
            members.len() - placed,
            members.len(),
            max_depth,
            width
        );
    }
    shaped
}

/// Members a directory can hold when `levels` subdirectory levels remain
/// below it: `width^(levels + 1)`, saturating.
fn subtree_capacity(width: usize, levels: u32) -> usize {
    width.checked_pow(levels.saturating_add(1)).unwrap_or(usize::MAX)
}

fn levels_needed(count: usize, width: usize) -> u32 {
    if width <= 1 {
        return 0;
    }
    let mut levels = 0;
    while subtree_capacity(width, levels) < count {
        levels += 1;
    }
    levels
}

fn distribute(
    dir: &Path,
    members: &[PathBuf],
    width: usize,
    levels: u32,
    shaped: &mut ShapedCluster,
) -> usize {
    if members.len() <= width || levels == 0 {
        let keep = members.len().min(width);
        place_directly(dir, &members[..keep], shaped);
        return keep;
    }

    let child_capacity = subtree_capacity(width, levels - 1);
    let mut placed = 0;
    for (index, slice) in members.chunks(child_capacity).take(width).enumerate() {
        let part = dir.join(format!("part_{:03}", index + 1));
        shaped.dirs.push(part.clone());
        placed += distribute(&part, slice, width, levels - 1, shaped);
    }
    placed
}

fn place_directly(dir: &Path, members: &[PathBuf], shaped: &mut ShapedCluster) {
    for src in members {
        let name = src
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| OsString::from(sanitize_label(&src.to_string_lossy())));
        shaped.moves.push((src.clone(), dir.join(name)));
    }
}
