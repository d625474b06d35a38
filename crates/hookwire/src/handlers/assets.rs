//! Mapping request paths onto an asset directory.

use std::path::{Component, Path, PathBuf};

const INDEX_FILE: &str = "index.html";

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AssetPath {
    File(PathBuf),
    /// The path tries to leave the asset directory
    Forbidden,
}

/// Resolve `request_path` under `root`.
///
/// `strip_prefix` is removed when present. Directory paths resolve to
/// `index.html`.
pub(crate) fn resolve(root: &Path, request_path: &str, strip_prefix: Option<&str>) -> AssetPath {
    let path = strip_prefix
        .and_then(|prefix| request_path.strip_prefix(prefix))
        .unwrap_or(request_path);

    let mut relative = PathBuf::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        match Path::new(segment).components().next() {
            Some(Component::Normal(part)) if Path::new(segment).components().count() == 1 => {
                relative.push(part)
            }
            Some(Component::CurDir) => {}
            _ => return AssetPath::Forbidden,
        }
    }

    if path.is_empty() || path.ends_with('/') || relative.as_os_str().is_empty() {
        relative.push(INDEX_FILE);
    }
    AssetPath::File(root.join(relative))
}
