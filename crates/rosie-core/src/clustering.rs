use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Bucket key for paths without an extension.
pub const NO_EXTENSION: &str = "<none>";

/// Lowercased extension of `path`, or [`NO_EXTENSION`].
pub fn extension_key(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| NO_EXTENSION.to_string())
}

/// Group paths by lowercased extension; each bucket is sorted.
pub fn cluster_by_extension<'a, I>(paths: I) -> BTreeMap<String, Vec<PathBuf>>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    let mut buckets: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for path in paths {
        buckets.entry(extension_key(path)).or_default().push(path.clone());
    }
    for bucket in buckets.values_mut() {
        bucket.sort();
    }
    buckets
}
