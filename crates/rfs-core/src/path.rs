//! Mapping client paths onto the storage root
//!
//! By default a client path is appended to the storage root as-is: no
//! canonicalization and no rejection of `..` segments, which matches how
//! existing clients address files. Confined mode validates the path first
//! and refuses anything that could leave the root.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::ProtocolError;
use crate::{MAX_FILENAME_LEN, MAX_PATH_LEN};

/// Resolves client-relative paths to locations inside the storage root.
#[derive(Clone, Debug)]
pub struct PathResolver {
    root: PathBuf,
    confine: bool,
}

impl PathResolver {
    /// Resolver that appends client paths verbatim
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            confine: false,
        }
    }

    /// Resolver that rejects paths escaping the root
    pub fn confined(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            confine: true,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_confined(&self) -> bool {
        self.confine
    }

    /// Resolve `relative` to `<root>/<relative>`.
    ///
    /// A leading `/` does not make the path absolute: `"/a/b"` lands at
    /// `<root>/a/b`.
    pub fn resolve(&self, relative: impl AsRef<[u8]>) -> Result<PathBuf, ProtocolError> {
        let relative = relative.as_ref();
        if self.confine {
            return safe_path(&self.root, relative);
        }
        let start = relative
            .iter()
            .position(|b| *b != b'/')
            .unwrap_or(relative.len());
        Ok(self.root.join(path_from_bytes(&relative[start..])?))
    }

    /// Create every missing directory above `resolved`, root first.
    ///
    /// Existing directories are fine. Failures are only logged; opening the
    /// file afterwards reports the real problem.
    pub async fn ensure_parent_dirs(&self, resolved: &Path) {
        let Some(parent) = resolved.parent() else {
            return;
        };
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            debug!("Could not create {:?}: {}", parent, e);
        }
    }
}

/// Validate and resolve a path within a base directory.
///
/// Rejects NUL bytes, over-long paths and components, `..` segments and
/// root or prefix components. `.` segments are dropped. Works on paths that
/// do not exist yet.
pub fn safe_path(base: &Path, relative: impl AsRef<[u8]>) -> Result<PathBuf, ProtocolError> {
    let relative = relative.as_ref();
    if relative.contains(&0) {
        return Err(ProtocolError::PathTraversal(
            "path contains null byte".into(),
        ));
    }

    if relative.len() > MAX_PATH_LEN {
        return Err(ProtocolError::PathTraversal(format!(
            "path too long: {} bytes (max {})",
            relative.len(),
            MAX_PATH_LEN
        )));
    }

    let relative_path = path_from_bytes(relative)?;

    if relative_path.is_absolute() {
        return Err(ProtocolError::PathTraversal(
            "absolute paths not allowed".into(),
        ));
    }

    let mut result = base.to_path_buf();
    let mut depth = 0usize;

    for component in relative_path.components() {
        match component {
            Component::Normal(name) => {
                if name.len() > MAX_FILENAME_LEN {
                    return Err(ProtocolError::PathTraversal(format!(
                        "filename too long: {} bytes (max {})",
                        name.len(),
                        MAX_FILENAME_LEN
                    )));
                }
                result.push(name);
                depth += 1;
            }
            Component::ParentDir => {
                return Err(ProtocolError::PathTraversal(
                    "parent directory (..) not allowed".into(),
                ));
            }
            Component::CurDir => {}
            Component::Prefix(_) | Component::RootDir => {
                return Err(ProtocolError::PathTraversal(
                    "absolute paths not allowed".into(),
                ));
            }
        }
    }

    if depth == 0 {
        return Err(ProtocolError::PathTraversal("empty path".into()));
    }

    Ok(result)
}

/// Interpret raw request bytes as a path.
#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> Result<PathBuf, ProtocolError> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    Ok(PathBuf::from(OsStr::from_bytes(bytes)))
}

/// Interpret raw request bytes as a path. Only UTF-8 names are representable.
#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> Result<PathBuf, ProtocolError> {
    std::str::from_utf8(bytes)
        .map(PathBuf::from)
        .map_err(|_| ProtocolError::PathTraversal("path is not valid UTF-8".into()))
}
