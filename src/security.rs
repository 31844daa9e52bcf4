//! Allowed-directory path validation
//!
//! Every caller-supplied path is checked against the allowed directory set
//! before it crosses into an LSP operation.

use crate::error::{BridgeError, Result};
use std::path::{Component, Path, PathBuf};

/// Resolve a path to absolute form and verify it lies within one of the
/// allowed directories.
///
/// Resolution is lexical (`.` and `..` components are folded without
/// touching the filesystem) so that paths which do not exist yet can still
/// be validated.
pub fn within_allowed(path: &Path, allowed_dirs: &[PathBuf]) -> Result<PathBuf> {
    let absolute = lexical_absolute(path)?;

    for dir in allowed_dirs {
        let dir = lexical_absolute(dir)?;
        if absolute.starts_with(&dir) {
            return Ok(absolute);
        }
    }

    tracing::warn!(
        "Rejected path outside allowed directories: {}",
        absolute.display()
    );
    Err(BridgeError::PathNotAllowed(absolute))
}

/// Absolutise against the current working directory and fold `.`/`..`.
fn lexical_absolute(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_inside_allowed_dir_accepted() {
        let allowed = vec![PathBuf::from("/workspace/project")];
        let result = within_allowed(Path::new("/workspace/project/src/main.go"), &allowed);
        assert_eq!(
            result.unwrap(),
            PathBuf::from("/workspace/project/src/main.go")
        );
    }

    #[test]
    fn test_path_outside_allowed_dir_rejected() {
        let allowed = vec![PathBuf::from("/workspace/project")];
        let err = within_allowed(Path::new("/etc/passwd"), &allowed).unwrap_err();
        assert!(matches!(err, BridgeError::PathNotAllowed(_)));
    }

    #[test]
    fn test_parent_traversal_cannot_escape() {
        let allowed = vec![PathBuf::from("/workspace/project")];
        let err = within_allowed(
            Path::new("/workspace/project/../../etc/passwd"),
            &allowed,
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::PathNotAllowed(_)));
    }

    #[test]
    fn test_dot_components_folded() {
        let allowed = vec![PathBuf::from("/workspace")];
        let result =
            within_allowed(Path::new("/workspace/./a/b/../c.go"), &allowed).unwrap();
        assert_eq!(result, PathBuf::from("/workspace/a/c.go"));
    }

    #[test]
    fn test_empty_allowed_set_rejects_everything() {
        let err = within_allowed(Path::new("/anything"), &[]).unwrap_err();
        assert!(matches!(err, BridgeError::PathNotAllowed(_)));
    }
}
