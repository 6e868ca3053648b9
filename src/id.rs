//! Normalization and relative-path resolution for module specifiers.
//!
//! Module ids are interned as `Arc<str>` so that every table keyed by id
//! (`ModuleStore::by_id`, `Module::resolved_ids`, chunk membership maps, ...)
//! can clone a key cheaply instead of re-allocating a `String` per entry.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// An interned, resolved module id.
pub type ModuleId = Arc<str>;

pub fn intern(id: impl AsRef<str>) -> ModuleId {
    Arc::from(id.as_ref())
}

/// True if a specifier should be resolved relative to its importer rather
/// than through package/bare-specifier resolution.
pub fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier == "." || specifier == ".."
}

/// Join an importer's directory with a relative specifier and collapse
/// `.`/`..` components, mirroring how a real resolver normalizes on-disk
/// paths before using them as a graph key.
pub fn join_relative(importer: &str, specifier: &str) -> String {
    let base = Path::new(importer)
        .parent()
        .unwrap_or_else(|| Path::new(""));
    normalize(&base.join(specifier))
}

fn normalize(path: &Path) -> String {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !matches!(out.components().last(), Some(Component::RootDir) | None) {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_detection() {
        assert!(is_relative("./a"));
        assert!(is_relative("../a"));
        assert!(!is_relative("a"));
        assert!(!is_relative("@scope/a"));
    }

    #[test]
    fn join_collapses_dot_segments() {
        assert_eq!(join_relative("src/a.js", "./b.js"), "src/b.js");
        assert_eq!(join_relative("src/nested/a.js", "../b.js"), "src/b.js");
        assert_eq!(join_relative("a.js", "./b/../c.js"), "c.js");
    }
}
