use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path escapes root")]
    Traversal,
    #[error("root unavailable")]
    Root,
}

/// Joins a user-supplied request path under `root`, guaranteeing the result
/// stays inside `root`. `..` components that would climb above the root are
/// rejected outright, and every existing symlink along the way must resolve
/// back inside the root. Non-existent suffixes are allowed (upload targets).
pub fn join_secure(root: &Path, request: &str) -> Result<PathBuf, PathError> {
    let root = root.canonicalize().map_err(|_| PathError::Root)?;

    let mut parts: Vec<String> = Vec::new();
    for comp in Path::new(request).components() {
        match comp {
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(PathError::Traversal);
                }
            }
            Component::Normal(seg) => {
                parts.push(seg.to_str().ok_or(PathError::Traversal)?.to_string())
            }
            Component::Prefix(_) => return Err(PathError::Traversal),
        }
    }

    let mut cur = root.clone();
    for seg in parts {
        cur.push(&seg);

        if let Ok(meta) = std::fs::symlink_metadata(&cur)
            && meta.file_type().is_symlink()
        {
            let target = std::fs::read_link(&cur).map_err(|_| PathError::Traversal)?;
            let resolved = if target.is_absolute() {
                normalize_lexical(&target)?
            } else {
                let parent = cur.parent().ok_or(PathError::Traversal)?;
                normalize_lexical(&parent.join(target))?
            };
            if !resolved.starts_with(&root) {
                return Err(PathError::Traversal);
            }
            cur = resolved;
        }

        if !cur.starts_with(&root) {
            return Err(PathError::Traversal);
        }
    }

    Ok(cur)
}

/// Resolves `.` and `..` lexically; climbing above the filesystem root is an
/// escape.
fn normalize_lexical(path: &Path) -> Result<PathBuf, PathError> {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::RootDir => out.push(Component::RootDir),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(PathError::Traversal);
                }
            }
            Component::Normal(seg) => out.push(seg),
            Component::Prefix(_) => return Err(PathError::Traversal),
        }
    }
    Ok(out)
}
