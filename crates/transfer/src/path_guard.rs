use std::path::{Component, Path, PathBuf};

use crate::TransferError;

/// Normalizes a caller-supplied relative path.
///
/// Leading and repeated separators are dropped, `.` segments vanish and
/// `..` segments pop the previous segment. The result is relative and may be
/// empty (the path resolved to the root itself).
///
/// Rejects:
/// - Empty input
/// - `..` segments that would climb above the root
/// - Windows prefix components (`C:`, `\\server`)
/// - NUL bytes
pub fn validate_upload_path(file_path: &str) -> Result<PathBuf, TransferError> {
    if file_path.trim().is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }
    if file_path.contains('\0') {
        return Err(TransferError::InvalidPath(format!(
            "NUL byte not allowed: {file_path:?}"
        )));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(file_path).components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(TransferError::InvalidPath(format!(
                        "path escapes root: {file_path}"
                    )));
                }
            }
            Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {file_path}"
                )));
            }
        }
    }

    Ok(normalized)
}

/// Resolves `relative` under `root`.
///
/// The result is `root` itself or a strict descendant of it.
pub fn resolve(root: &Path, relative: &str) -> Result<PathBuf, TransferError> {
    let normalized = validate_upload_path(relative)?;
    let resolved = root.join(&normalized);
    if !resolved.starts_with(root) {
        return Err(TransferError::InvalidPath(format!(
            "path escapes root: {relative}"
        )));
    }
    Ok(resolved)
}

/// Like [`resolve`] but the path must name something below `root`.
pub fn resolve_file(root: &Path, relative: &str) -> Result<PathBuf, TransferError> {
    let resolved = resolve(root, relative)?;
    if resolved == root {
        return Err(TransferError::InvalidPath(format!(
            "path resolves to the root itself: {relative}"
        )));
    }
    Ok(resolved)
}

/// Validates a single path segment (a caller id or a file name).
pub fn validate_component(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidPath("empty name".into()));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(TransferError::InvalidPath(format!(
            "name must not contain separators: {name:?}"
        )));
    }
    if name == "." || name == ".." {
        return Err(TransferError::InvalidPath(format!("reserved name: {name}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> PathBuf {
        PathBuf::from("/srv/storage/alice")
    }

    #[test]
    fn rejects_empty_path() {
        assert!(validate_upload_path("").is_err());
        assert!(validate_upload_path("   ").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(validate_upload_path("../../../etc/passwd").is_err());
        assert!(validate_upload_path("..").is_err());
        assert!(validate_upload_path("../file.txt").is_err());
    }

    #[test]
    fn rejects_nested_parent_dir_traversal() {
        assert!(validate_upload_path("sub/../../escape").is_err());
    }

    #[test]
    fn allows_parent_dir_that_stays_inside() {
        assert_eq!(
            validate_upload_path("docs/drafts/../final.pdf").unwrap(),
            PathBuf::from("docs/final.pdf")
        );
    }

    #[test]
    fn strips_leading_and_repeated_separators() {
        assert_eq!(
            validate_upload_path("//photos///2024/cat.jpg/").unwrap(),
            PathBuf::from("photos/2024/cat.jpg")
        );
        assert_eq!(
            validate_upload_path("./game.exe").unwrap(),
            PathBuf::from("game.exe")
        );
    }

    #[test]
    fn rejects_nul_byte() {
        assert!(validate_upload_path("a\0b").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn backslash_segments_stay_inside_one_name() {
        let normalized = validate_upload_path("docs\\..\\..\\x").unwrap();
        assert_eq!(normalized.components().count(), 1);
        assert!(resolve(&root(), "docs\\..\\..\\x").unwrap().starts_with(root()));
    }

    #[test]
    fn resolve_stays_under_root() {
        let resolved = resolve(&root(), "photos/cat.jpg").unwrap();
        assert_eq!(resolved, root().join("photos/cat.jpg"));
        assert!(resolved.starts_with(root()));
    }

    #[test]
    fn resolve_allows_root_itself() {
        assert_eq!(resolve(&root(), "photos/..").unwrap(), root());
        assert_eq!(resolve(&root(), "/").unwrap(), root());
    }

    #[test]
    fn resolve_absolute_input_is_rebased() {
        assert_eq!(
            resolve(&root(), "/etc/passwd").unwrap(),
            root().join("etc/passwd")
        );
    }

    #[test]
    fn resolve_rejects_escape() {
        assert!(matches!(
            resolve(&root(), "../bob/secret.txt"),
            Err(TransferError::InvalidPath(_))
        ));
    }

    #[test]
    fn resolve_file_rejects_root() {
        assert!(resolve_file(&root(), "a/..").is_err());
        assert!(resolve_file(&root(), "a/b.txt").is_ok());
    }

    #[test]
    fn component_validation() {
        assert!(validate_component("cat.jpg").is_ok());
        assert!(validate_component(".bashrc").is_ok());
        assert!(validate_component("").is_err());
        assert!(validate_component("..").is_err());
        assert!(validate_component(".").is_err());
        assert!(validate_component("a/b").is_err());
        assert!(validate_component("a\\b").is_err());
    }
}
