use std::path::{Component, Path, Prefix};

/// Upper-cased volume prefix: `C:` for drive paths, `\\SERVER\SHARE` for UNC.
/// Relative paths are judged by the current directory.
pub fn volume_prefix(path: &Path) -> Option<String> {
    let absolute = std::path::absolute(path).ok()?;
    let prefix = absolute.components().find_map(|component| match component {
        Component::Prefix(prefix) => Some(prefix.kind()),
        _ => None,
    })?;
    match prefix {
        Prefix::Disk(letter) | Prefix::VerbatimDisk(letter) => {
            Some(format!("{}:", (letter as char).to_ascii_uppercase()))
        }
        Prefix::UNC(server, share) | Prefix::VerbatimUNC(server, share) => Some(format!(
            "\\\\{}\\{}",
            server.to_string_lossy().to_uppercase(),
            share.to_string_lossy().to_uppercase()
        )),
        _ => None,
    }
}
