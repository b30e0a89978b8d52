//! Lexical path handling for the workspace boundary.
//!
//! Nothing here touches the filesystem. Symlink resolution happens in
//! [`crate::io::path_validator`], which feeds canonical paths back into
//! [`is_within`] for the final decision.

use std::path::{Component, Path, PathBuf};

/// Interpret a caller-supplied path, treating `\` as a separator on every platform.
///
/// Windows already parses both separators, so the input is left untouched there.
pub fn normalize_input(input: &Path) -> PathBuf {
    if cfg!(windows) {
        return input.to_path_buf();
    }
    match input.to_str() {
        Some(text) if text.contains('\\') => PathBuf::from(text.replace('\\', "/")),
        _ => input.to_path_buf(),
    }
}

/// Resolve `input` against `root` without consulting the filesystem.
///
/// Absolute inputs replace the root. `.` segments are dropped and `..` segments
/// pop the previous component (never above the filesystem root).
pub fn resolve_lexically(root: &Path, input: &Path) -> PathBuf {
    let joined = if input.is_absolute() {
        input.to_path_buf()
    } else {
        root.join(input)
    };
    normalize_lexically(&joined)
}

/// Collapse `.` and `..` segments of an absolute path.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// True when `candidate` equals `root` or lies beneath it.
///
/// Comparison is per component, so `/workspace-other` is never inside `/workspace`.
pub fn is_within(root: &Path, candidate: &Path) -> bool {
    candidate.starts_with(root)
}

/// Render a path with `/` separators for display and RPC payloads.
pub fn to_slash(path: &Path) -> String {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::RootDir if parts.is_empty() => parts.push(String::new()),
            Component::RootDir => {}
            Component::CurDir => {}
            other => parts.push(other.as_os_str().to_string_lossy().into_owned()),
        }
    }
    if parts.len() == 1 && parts[0].is_empty() {
        return "/".to_string();
    }
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_collapses_to_filesystem_root() {
        let resolved = resolve_lexically(Path::new("/ws"), Path::new("../../../etc/passwd"));
        assert_eq!(resolved, PathBuf::from("/etc/passwd"));
    }

    #[test]
    fn absolute_input_replaces_root() {
        let resolved = resolve_lexically(Path::new("/ws"), Path::new("/tmp/./x/../y"));
        assert_eq!(resolved, PathBuf::from("/tmp/y"));
    }

    #[test]
    fn nested_parent_segments_stay_inside() {
        let resolved = resolve_lexically(Path::new("/ws"), Path::new("a/b/../c/./d.txt"));
        assert_eq!(resolved, PathBuf::from("/ws/a/c/d.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn backslashes_become_separators() {
        let input = normalize_input(Path::new("..\\..\\etc\\passwd"));
        assert_eq!(input, PathBuf::from("../../etc/passwd"));
        let resolved = resolve_lexically(Path::new("/ws/sub"), &input);
        assert_eq!(resolved, PathBuf::from("/etc/passwd"));
    }

    #[test]
    fn sibling_with_shared_prefix_is_outside() {
        assert!(!is_within(
            Path::new("/workspace"),
            Path::new("/workspace-other/file")
        ));
        assert!(is_within(Path::new("/workspace"), Path::new("/workspace")));
        assert!(is_within(
            Path::new("/workspace"),
            Path::new("/workspace/dir/file")
        ));
    }

    #[test]
    fn filesystem_root_contains_everything() {
        assert!(is_within(Path::new("/"), Path::new("/etc/passwd")));
    }

    #[test]
    fn to_slash_joins_components() {
        assert_eq!(to_slash(Path::new("a/b/c.txt")), "a/b/c.txt");
        assert_eq!(to_slash(Path::new("./a")), "a");
        assert_eq!(to_slash(Path::new("/")), "/");
        assert_eq!(to_slash(Path::new("/ws/a")), "/ws/a");
    }
}
