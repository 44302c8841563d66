//! Per-file permission records
//!
//! Each stored file may have a one-byte sidecar at `<path>.meta` holding
//! `R` (read-only) or `W` (writable). A missing or malformed sidecar means
//! writable.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::META_SUFFIX;

/// Permission flag of a stored file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Permission {
    /// File cannot be overwritten or removed
    Readable,
    /// File can be overwritten and removed
    #[default]
    Writable,
}

impl Permission {
    /// Interpret the optional permission token of a WRITE command.
    ///
    /// Only the first character matters: `R...` is read-only, everything
    /// else (including no token at all) is writable.
    pub fn from_token(token: Option<&[u8]>) -> Self {
        match token.and_then(|t| t.first()) {
            Some(b'R') => Permission::Readable,
            _ => Permission::Writable,
        }
    }

    /// Decode a sidecar byte. Unknown bytes yield `None`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'R' => Some(Permission::Readable),
            b'W' => Some(Permission::Writable),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Permission::Readable => b'R',
            Permission::Writable => b'W',
        }
    }

    pub fn as_char(self) -> char {
        self.as_byte() as char
    }

    pub fn is_read_only(self) -> bool {
        self == Permission::Readable
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Reads and writes permission sidecars next to stored files.
#[derive(Clone, Copy, Debug, Default)]
pub struct PermissionStore;

impl PermissionStore {
    pub fn new() -> Self {
        Self
    }

    /// Sidecar location for a stored file
    pub fn meta_path(file: &Path) -> PathBuf {
        let mut name = OsString::from(file.as_os_str());
        name.push(META_SUFFIX);
        PathBuf::from(name)
    }

    /// Current permission of `file`, defaulting to writable.
    pub async fn read(&self, file: &Path) -> Permission {
        let meta = Self::meta_path(file);
        match tokio::fs::read(&meta).await {
            Ok(bytes) => bytes
                .first()
                .copied()
                .and_then(Permission::from_byte)
                .unwrap_or_default(),
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!("Unreadable sidecar {:?}: {}", meta, e);
                }
                Permission::Writable
            }
        }
    }

    /// Replace the sidecar of `file` with a single permission byte.
    pub async fn write(&self, file: &Path, permission: Permission) -> io::Result<()> {
        tokio::fs::write(Self::meta_path(file), [permission.as_byte()]).await
    }

    /// Delete the sidecar of `file`.
    pub async fn remove(&self, file: &Path) -> io::Result<()> {
        tokio::fs::remove_file(Self::meta_path(file)).await
    }
}
