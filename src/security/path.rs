use crate::execroot::ExecRootError;
use std::path::{Component, Path, PathBuf};

pub struct PathSanitizer;

impl PathSanitizer {
    /// Sanitize a path that names a location inside an exec root to prevent:
    /// - Directory traversal (../)
    /// - Absolute paths (/etc/passwd)
    ///
    /// Hidden files (starting with .) are allowed.
    /// Returns a normalized relative path joined with forward slashes.
    pub fn sanitize(raw_path: &str) -> Result<String, ExecRootError> {
        // Reject empty paths
        if raw_path.is_empty() {
            return Err(ExecRootError::InvalidPath("Empty path".to_string()));
        }

        let path = Path::new(raw_path);
        let mut components = Vec::new();

        for component in path.components() {
            match component {
                Component::Prefix(_) | Component::RootDir => {
                    return Err(ExecRootError::InvalidPath(format!(
                        "Absolute path not allowed: {}",
                        raw_path
                    )));
                }
                Component::ParentDir => {
                    return Err(ExecRootError::InvalidPath(format!(
                        "Parent directory traversal not allowed: {}",
                        raw_path
                    )));
                }
                Component::CurDir => continue,
                Component::Normal(part) => {
                    let part_str = part.to_str().ok_or_else(|| {
                        ExecRootError::InvalidPath(format!("Invalid UTF-8 in path: {:?}", part))
                    })?;
                    components.push(part_str);
                }
            }
        }

        // The root itself is never a valid input or output location
        if components.is_empty() {
            return Err(ExecRootError::InvalidPath(format!(
                "No valid components: {}",
                raw_path
            )));
        }

        Ok(components.join("/"))
    }

    /// Lexically normalize an absolute path, resolving `.` and `..` without
    /// touching the filesystem. `..` at the root stays at the root.
    pub fn normalize_absolute(path: &Path) -> Result<PathBuf, ExecRootError> {
        if !path.is_absolute() {
            return Err(ExecRootError::InvalidPath(format!(
                "Absolute path required: {}",
                path.display()
            )));
        }

        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                    normalized.push(component.as_os_str())
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    normalized.pop();
                }
            }
        }
        Ok(normalized)
    }

    /// Express an absolute path relative to `root`.
    ///
    /// Returns `Some("")` for the root itself and `None` when the path lies
    /// outside of it. Both paths are normalized lexically first.
    pub fn relative_to_root(root: &Path, path: &Path) -> Result<Option<String>, ExecRootError> {
        let root = Self::normalize_absolute(root)?;
        let path = Self::normalize_absolute(path)?;

        let Ok(rest) = path.strip_prefix(&root) else {
            return Ok(None);
        };

        let mut components = Vec::new();
        for part in rest.iter() {
            let part_str = part.to_str().ok_or_else(|| {
                ExecRootError::InvalidPath(format!("Invalid UTF-8 in path: {:?}", part))
            })?;
            components.push(part_str);
        }
        Ok(Some(components.join("/")))
    }
}

/// Every proper ancestor of a sanitized relative path, outermost first.
/// `"a/b/c"` yields `["a", "a/b"]`.
pub fn ancestors(rel: &str) -> impl Iterator<Item = &str> {
    rel.match_indices('/').map(move |(idx, _)| &rel[..idx])
}
