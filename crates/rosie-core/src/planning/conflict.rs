//! Collision and risk handling for a flat list of proposed items.
//!
//! Only `create_dir` and `move` items are touched. They are visited in
//! (lowercased target, action, id) order so the outcome does not depend on
//! input order: the first claimant keeps a target, later ones get a `_N`
//! suffix. Each item is then annotated with the risks the [`Probe`] reports.

use ahash::AHashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::model::{clamp_confidence, PlanAction, PlanItem};
use crate::platform;

const BLOCKED_LOCKED: &str = "blocked: locked";
const CAUTION_ONEDRIVE: &str = "caution: onedrive";
const TAG_CROSS_VOLUME: &str = "cross-volume";
const RESOLVER_TAGS: &[&str] = &[TAG_CROSS_VOLUME];
const LOCKED_CONFIDENCE_CAP: f64 = 0.4;
const ONEDRIVE_CONFIDENCE_CAP: f64 = 0.6;

/// Filesystem questions the resolver needs answered.
pub trait Probe {
    fn is_locked(&self, path: &Path) -> bool;
    fn is_cross_volume(&self, src: &Path, dst: &Path) -> bool;
}

/// Locks nothing; volumes compared through [`platform::same_volume`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultProbe;

impl Probe for DefaultProbe {
    fn is_locked(&self, _path: &Path) -> bool {
        false
    }

    fn is_cross_volume(&self, src: &Path, dst: &Path) -> bool {
        !platform::same_volume(src, dst)
    }
}

/// Make targets unique (case-insensitively) and annotate risky items.
///
/// Items other than `create_dir`/`move` come back unchanged and first; the
/// rest follow in resolution order. Ids are left as they were, callers
/// re-address items whose content changed.
pub fn resolve(items: Vec<PlanItem>, root: &Path, probe: &dyn Probe) -> Vec<PlanItem> {
    let (mut changes, passthrough): (Vec<PlanItem>, Vec<PlanItem>) =
        items.into_iter().partition(PlanItem::is_filesystem_change);

    changes.sort_by_cached_key(|item| {
        (
            item.target.to_string_lossy().to_lowercase(),
            item.action.to_string(),
            item.id.clone(),
        )
    });

    let mut taken: AHashSet<String> = AHashSet::with_capacity(changes.len());
    let mut resolved = passthrough;
    resolved.reserve(changes.len());

    for mut item in changes {
        claim_target(&mut item, root, &mut taken);
        annotate(&mut item, root, probe);
        resolved.push(item);
    }
    resolved
}

fn registry_key(root: &Path, target: &Path) -> String {
    platform::resolve_against(Some(root), target)
        .to_string_lossy()
        .to_lowercase()
}

fn claim_target(item: &mut PlanItem, root: &Path, taken: &mut AHashSet<String>) {
    if taken.insert(registry_key(root, &item.target)) {
        return;
    }
    let treat_as_dir = item.action == PlanAction::CreateDir || item.target.extension().is_none();
    let mut n = 2u64;
    loop {
        let candidate = suffixed(&item.target, n, treat_as_dir);
        if taken.insert(registry_key(root, &candidate)) {
            debug!(
                "Target collision: {} -> {}",
                item.target.display(),
                candidate.display()
            );
            item.target = candidate;
            return;
        }
        n += 1;
    }
}

/// `name_N` for directories and extension-less names, `stem_N.ext` otherwise.
fn suffixed(target: &Path, n: u64, treat_as_dir: bool) -> PathBuf {
    let name = match target.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => return PathBuf::from(format!("{}_{}", target.to_string_lossy(), n)),
    };
    let renamed = match (treat_as_dir, target.extension(), target.file_stem()) {
        (false, Some(ext), Some(stem)) => format!(
            "{}_{}.{}",
            stem.to_string_lossy(),
            n,
            ext.to_string_lossy()
        ),
        _ => format!("{}_{}", name, n),
    };
    target.with_file_name(renamed)
}

fn annotate(item: &mut PlanItem, root: &Path, probe: &dyn Probe) {
    let mut prefixes: Vec<&str> = Vec::new();
    let mut tags: Vec<&str> = Vec::new();
    let mut cap: Option<f64> = None;

    match item.action {
        PlanAction::Move => {
            let source = item
                .source
                .clone()
                .or_else(|| infer_source(&item.reason))
                .map(|src| platform::resolve_against(Some(root), &src));
            if let Some(src) = &source {
                if probe.is_locked(src) {
                    prefixes.push(BLOCKED_LOCKED);
                    cap = min_cap(cap, LOCKED_CONFIDENCE_CAP);
                }
                if probe.is_cross_volume(src, &item.target) {
                    tags.push(TAG_CROSS_VOLUME);
                }
            }
            let onedrive = source.as_deref().is_some_and(platform::is_onedrive_path)
                || platform::is_onedrive_path(&item.target);
            if onedrive {
                prefixes.push(CAUTION_ONEDRIVE);
                cap = min_cap(cap, ONEDRIVE_CONFIDENCE_CAP);
            }
        }
        PlanAction::CreateDir => {
            if probe.is_locked(&item.target) {
                prefixes.push(BLOCKED_LOCKED);
                cap = min_cap(cap, LOCKED_CONFIDENCE_CAP);
            }
            if platform::is_onedrive_path(&item.target) {
                prefixes.push(CAUTION_ONEDRIVE);
                cap = min_cap(cap, ONEDRIVE_CONFIDENCE_CAP);
            }
        }
        _ => return,
    }

    item.reason = with_tags(&with_prefixes(&item.reason, &prefixes), &tags);
    if let Some(cap) = cap {
        item.confidence = item.confidence.min(cap);
    }
    item.confidence = clamp_confidence(item.confidence);
}

fn min_cap(current: Option<f64>, cap: f64) -> Option<f64> {
    Some(current.map_or(cap, |c| c.min(cap)))
}

fn with_prefixes(reason: &str, prefixes: &[&str]) -> String {
    let fresh: Vec<&str> = prefixes
        .iter()
        .copied()
        .filter(|prefix| !reason.contains(prefix))
        .collect();
    if fresh.is_empty() {
        return reason.to_string();
    }
    if reason.is_empty() {
        return fresh.join("; ");
    }
    format!("{}; {}", fresh.join("; "), reason)
}

fn with_tags(reason: &str, tags: &[&str]) -> String {
    if tags.is_empty() {
        return reason.to_string();
    }
    match split_tag_block(reason) {
        Some((body, existing)) => {
            let mut merged: Vec<&str> = existing.split(", ").filter(|t| !t.is_empty()).collect();
            for tag in tags {
                if !merged.contains(tag) {
                    merged.push(tag);
                }
            }
            format!("{} [{}]", body, merged.join(", "))
        }
        None => format!("{} [{}]", reason, tags.join(", ")),
    }
}

/// Split `"text [a, b]"` into `("text", "a, b")`. Only a trailing block made
/// of resolver tags counts; `notes [draft]` is an ordinary name.
fn split_tag_block(reason: &str) -> Option<(&str, &str)> {
    let inner = reason.strip_suffix(']')?;
    let open = inner.rfind(" [")?;
    let block = &inner[open + 2..];
    block
        .split(", ")
        .all(|tag| RESOLVER_TAGS.contains(&tag))
        .then(|| (&inner[..open], block))
}

/// Source path recovered from free text: `src=<path>` first, then a trailing
/// `from <path>` that looks like a path.
pub fn infer_source(reason: &str) -> Option<PathBuf> {
    let body = split_tag_block(reason).map_or(reason, |(body, _)| body);

    let mut search = 0;
    while let Some(offset) = body[search..].find("src=") {
        let at = search + offset;
        let boundary = body[..at]
            .chars()
            .next_back()
            .map_or(true, char::is_whitespace);
        if boundary {
            let value = body[at + 4..].trim();
            if !value.is_empty() {
                return Some(PathBuf::from(value));
            }
        }
        search = at + 4;
    }

    let tail = body.rsplit_once(" from ")?.1.trim();
    looks_like_path(tail).then(|| PathBuf::from(tail))
}

fn looks_like_path(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let bytes = text.as_bytes();
    let drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    text.contains('/') || text.contains('\\') || drive
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_forms() {
        assert_eq!(
            suffixed(Path::new("/r/dst/file.txt"), 2, false),
            PathBuf::from("/r/dst/file_2.txt")
        );
        assert_eq!(
            suffixed(Path::new("/r/dst/archive.tar.gz"), 3, false),
            PathBuf::from("/r/dst/archive.tar_3.gz")
        );
        assert_eq!(suffixed(Path::new("/r/docs"), 2, true), PathBuf::from("/r/docs_2"));
        assert_eq!(suffixed(Path::new("/r/README"), 2, true), PathBuf::from("/r/README_2"));
    }

    #[test]
    fn test_infer_source() {
        assert_eq!(
            infer_source("cluster:docs from a.txt src=/r/a.txt"),
            Some(PathBuf::from("/r/a.txt"))
        );
        assert_eq!(
            infer_source("cluster:docs src=/r/my file.txt [cross-volume]"),
            Some(PathBuf::from("/r/my file.txt"))
        );
        assert_eq!(
            infer_source("cluster:docs from notes [draft] src=/r/notes [draft]"),
            Some(PathBuf::from("/r/notes [draft]"))
        );
        assert_eq!(
            infer_source("cluster:docs src=/r/notes [draft] [cross-volume]"),
            Some(PathBuf::from("/r/notes [draft]"))
        );
        assert_eq!(infer_source("cluster:docs from /r/b.txt"), Some(PathBuf::from("/r/b.txt")));
        assert_eq!(infer_source("cluster:docs from b.txt"), None);
        assert_eq!(infer_source("nosrc=/r/x"), None);
        assert_eq!(infer_source("Matched rule R1"), None);
    }

    #[test]
    fn test_tags_merge_into_one_block() {
        assert_eq!(with_tags("move it", &["cross-volume"]), "move it [cross-volume]");
        assert_eq!(
            with_tags("move it [slow]", &["cross-volume"]),
            "move it [slow] [cross-volume]"
        );
        assert_eq!(
            with_tags("move it [cross-volume]", &["cross-volume"]),
            "move it [cross-volume]"
        );
    }

    #[test]
    fn test_prefixes_not_repeated() {
        let once = with_prefixes("cluster:docs", &[BLOCKED_LOCKED, CAUTION_ONEDRIVE]);
        assert_eq!(once, "blocked: locked; caution: onedrive; cluster:docs");
        assert_eq!(with_prefixes(&once, &[BLOCKED_LOCKED]), once);
    }

    #[test]
    fn test_case_insensitive_collision() {
        let root = Path::new("/r");
        let a = PlanItem::new(PlanAction::CreateDir, PathBuf::from("/r/Docs"), "a".into(), 0.6);
        let b = PlanItem::new(PlanAction::CreateDir, PathBuf::from("/r/docs"), "b".into(), 0.6);
        let out = resolve(vec![b, a], root, &DefaultProbe);
        let targets: Vec<_> = out.iter().map(|i| i.target.clone()).collect();
        assert_eq!(targets, vec![PathBuf::from("/r/Docs"), PathBuf::from("/r/docs_2")]);
    }

    #[test]
    fn test_non_filesystem_items_pass_through() {
        let root = Path::new("/r");
        let rule = PlanItem::new(
            PlanAction::Rule("R1".into()),
            PathBuf::from("/r/a.txt"),
            "Matched rule R1".into(),
            0.75,
        );
        let info = PlanItem::new(PlanAction::Info, PathBuf::from("/r/a.txt"), "x".into(), 1.0);
        let out = resolve(vec![rule.clone(), info.clone()], root, &DefaultProbe);
        assert_eq!(out, vec![rule, info]);
    }
}
