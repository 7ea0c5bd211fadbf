#[cfg(target_os = "windows")]
pub mod windows;

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

const ONEDRIVE_ENV_VARS: &[&str] = &["OneDrive", "OneDriveCommercial", "OneDriveConsumer"];

#[cfg(target_os = "windows")]
pub fn volume_prefix(path: &Path) -> Option<String> {
    windows::volume_prefix(path)
}

#[cfg(not(target_os = "windows"))]
pub fn volume_prefix(_path: &Path) -> Option<String> {
    None
}

/// Resolve `.` and `..` components without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    result.push(component.as_os_str());
                }
            }
            other => result.push(other.as_os_str()),
        }
    }
    result
}

/// Join a relative `path` onto `root` and normalize; absolute paths are only
/// normalized.
pub fn resolve_against(root: Option<&Path>, path: &Path) -> PathBuf {
    match root {
        Some(root) if path.is_relative() => normalize_path(&root.join(path)),
        _ => normalize_path(path),
    }
}

/// Heuristic: any component containing "onedrive" (case-insensitive), or a
/// location under one of the OneDrive roots named by the environment.
pub fn is_onedrive_path(path: &Path) -> bool {
    let normalized = normalize_path(path);
    if normalized
        .components()
        .any(|c| c.as_os_str().to_string_lossy().to_lowercase().contains("onedrive"))
    {
        return true;
    }
    ONEDRIVE_ENV_VARS.iter().any(|var| match env::var_os(var) {
        Some(dir) if !dir.is_empty() => normalized.starts_with(normalize_path(Path::new(&dir))),
        _ => false,
    })
}

/// Whether `a` and `b` live on the same volume. Paths that do not exist yet
/// are judged by their closest existing ancestor. When that cannot be
/// determined the answer is `true`, so callers never flag a cross-volume
/// move on missing information.
pub fn same_volume(a: &Path, b: &Path) -> bool {
    if let (Some(va), Some(vb)) = (volume_prefix(a), volume_prefix(b)) {
        return va == vb;
    }
    match (device_id(a), device_id(b)) {
        (Some(da), Some(db)) => da == db,
        _ => true,
    }
}

#[cfg(unix)]
fn device_id(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    path.ancestors()
        .find_map(|p| fs::metadata(p).ok())
        .map(|m| m.dev())
}

#[cfg(not(unix))]
fn device_id(path: &Path) -> Option<u64> {
    // Without drive letters there is nothing cheaper to compare than
    // existence; treat everything as one volume.
    path.ancestors().find_map(|p| fs::metadata(p).ok()).map(|_| 0)
}
