//! Root-relative path handling.
//!
//! Registered paths and buffered changes both use forward-slash,
//! root-relative strings with no leading slash. The empty string (or a
//! bare `/` at registration time) denotes the watched root itself.

use std::path::{Component, Path};

/// Normalize a registered path: forward slashes, no leading or trailing
/// separator. `"/"` normalizes to the empty string (whole-root interest).
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

/// Express `path` relative to `root` as a forward-slash string.
///
/// Returns `None` when `path` is not under `root`.
pub fn relativize(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut out = String::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str(&part.to_string_lossy());
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

/// Join a relative directory and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// True when an entry registered on `entry` covers a change at `event`.
///
/// Root interest (empty entry) matches everything. Otherwise the event
/// path must start with the entry path and either be equal or continue
/// with a separator. The boundary check matters: an entry on `sub` must
/// not match `sublet/x`.
pub fn matches(entry: &str, event: &str) -> bool {
    if entry.is_empty() || entry == "/" {
        return true;
    }
    match event.as_bytes().get(entry.len()) {
        None => event == entry,
        Some(&b'/') => event.starts_with(entry),
        Some(_) => false,
    }
}

/// Compute the path handed to an observer for a matched change.
///
/// `None` when the change hit the registered path itself, otherwise the
/// remainder below it with the leading separator stripped. When the event
/// path does not actually extend the entry (possible transiently around
/// renames), the raw event path is delivered unchanged.
pub fn delivered(entry: &str, event: &str) -> Option<String> {
    if event == entry {
        return None;
    }
    if entry.is_empty() {
        return Some(event.trim_start_matches('/').to_string());
    }
    match event.strip_prefix(entry) {
        Some(rest) if rest.starts_with('/') => Some(rest.trim_start_matches('/').to_string()),
        _ => Some(event.to_string()),
    }
}

/// Rewrite `path` for a rename of `old` to `new`.
///
/// `Some` carries the rewritten path; `None` means the path is not
/// affected by the rename and must stay as it is.
pub fn remap(path: &str, old: &str, new: &str) -> Option<String> {
    if path == old {
        return Some(new.to_string());
    }
    match path.strip_prefix(old) {
        Some(rest) if rest.starts_with('/') => Some(format!("{new}{rest}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn normalize_strips_separators() {
        assert_eq!(normalize("prj/sub"), "prj/sub");
        assert_eq!(normalize("/prj/sub/"), "prj/sub");
        assert_eq!(normalize("/"), "");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("prj\\sub"), "prj/sub");
    }

    #[test]
    fn relativize_inside_and_outside_root() {
        let root = PathBuf::from("/watched");
        assert_eq!(
            relativize(&root, Path::new("/watched/prj/a.txt")).as_deref(),
            Some("prj/a.txt")
        );
        assert_eq!(relativize(&root, Path::new("/watched")).as_deref(), Some(""));
        assert_eq!(relativize(&root, Path::new("/elsewhere/a.txt")), None);
    }

    #[test]
    fn join_handles_root_parent() {
        assert_eq!(join("", "a.txt"), "a.txt");
        assert_eq!(join("prj/sub", "a.txt"), "prj/sub/a.txt");
    }

    #[test]
    fn matches_exact_and_descendant() {
        assert!(matches("prj/sub", "prj/sub"));
        assert!(matches("prj/sub", "prj/sub/a.txt"));
        assert!(matches("prj/sub", "prj/sub/deep/b.txt"));
    }

    #[test]
    fn matches_respects_component_boundary() {
        assert!(!matches("sub", "sublet/x"));
        assert!(!matches("prj/sub", "prj/sublet"));
        assert!(!matches("prj/sub", "prj"));
    }

    #[test]
    fn root_interest_matches_everything() {
        assert!(matches("", "prj/sub/a.txt"));
        assert!(matches("/", "prj"));
        assert!(matches("", ""));
    }

    #[test]
    fn delivered_path_for_exact_match_is_none() {
        assert_eq!(delivered("prj/sub/a.txt", "prj/sub/a.txt"), None);
        assert_eq!(delivered("", ""), None);
    }

    #[test]
    fn delivered_path_is_remainder_below_entry() {
        assert_eq!(delivered("prj/sub", "prj/sub/a.txt").as_deref(), Some("a.txt"));
        assert_eq!(
            delivered("prj", "prj/sub/a.txt").as_deref(),
            Some("sub/a.txt")
        );
        assert_eq!(delivered("", "prj/a.txt").as_deref(), Some("prj/a.txt"));
    }

    #[test]
    fn delivered_path_falls_back_to_raw_event() {
        // Transient mismatch: the event does not extend the entry
        assert_eq!(delivered("prj/sub/a.txt", "prj").as_deref(), Some("prj"));
        assert_eq!(delivered("prj/sub", "prj/sublet").as_deref(), Some("prj/sublet"));
    }

    #[test]
    fn remap_rewrites_node_and_descendants() {
        assert_eq!(
            remap("prj/sub/a.txt", "prj/sub/a.txt", "prj/sub/b.txt").as_deref(),
            Some("prj/sub/b.txt")
        );
        assert_eq!(
            remap("prj/sub/a.txt", "prj/sub", "prj/other").as_deref(),
            Some("prj/other/a.txt")
        );
    }

    #[test]
    fn remap_leaves_unrelated_paths_alone() {
        assert_eq!(remap("prj/sublet", "prj/sub", "prj/other"), None);
        assert_eq!(remap("other/a.txt", "prj", "prj2"), None);
    }
}
