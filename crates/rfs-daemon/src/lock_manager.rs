//! Lock manager for file operations on the server side
//!
//! Every WRITE, GET and RM holds an exclusive guard for its whole body
//! transfer. With [`LockScope::Global`] all operations share one lock; with
//! [`LockScope::PerPath`] operations on different files run in parallel and
//! only operations touching the same file serialize.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use rfs_core::{LockScope, META_SUFFIX};

type PathLocks = DashMap<PathBuf, Arc<Mutex<()>>>;

/// Hands out exclusive guards for stored files
pub struct LockManager {
    scope: LockScope,
    global: Arc<Mutex<()>>,
    paths: Arc<PathLocks>,
}

impl LockManager {
    pub fn new(scope: LockScope) -> Self {
        Self {
            scope,
            global: Arc::new(Mutex::new(())),
            paths: Arc::new(DashMap::new()),
        }
    }

    pub fn scope(&self) -> LockScope {
        self.scope
    }

    /// Wait for exclusive access to `path`.
    ///
    /// The guard covers the file and its permission sidecar; aliases such
    /// as `d/../f` and the sidecar path itself map to the same lock. Waiters
    /// are served in FIFO order (tokio mutex fairness).
    pub async fn acquire(&self, path: &Path) -> FileGuard {
        match self.scope {
            LockScope::Global => FileGuard {
                guard: Some(self.global.clone().lock_owned().await),
                entry: None,
            },
            LockScope::PerPath => {
                let key = lock_key(path);
                // Clone under the shard lock so eviction can't race with us
                let lock = self
                    .paths
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(())))
                    .clone();
                let guard = lock.lock_owned().await;
                trace!("Acquired lock for {:?}", key);
                FileGuard {
                    guard: Some(guard),
                    entry: Some((self.paths.clone(), key)),
                }
            }
        }
    }

    /// Number of paths with a live lock entry
    pub fn tracked_paths(&self) -> usize {
        self.paths.len()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(LockScope::default())
    }
}

/// Key under which `path` is locked.
///
/// `.` and `..` are folded lexically and every trailing `.meta` extension is
/// dropped, so `f`, `d/../f` and `./f.meta` share one key. Symlinked
/// directories inside the root are not resolved.
fn lock_key(path: &Path) -> PathBuf {
    let mut key = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match key.components().next_back() {
                Some(Component::Normal(_)) => {
                    key.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => key.push(".."),
            },
            other => key.push(other),
        }
    }

    let meta = OsStr::new(META_SUFFIX.trim_start_matches('.'));
    while key.extension() == Some(meta) {
        key.set_extension("");
    }
    key
}

/// Exclusive access to one stored file, released on drop
pub struct FileGuard {
    guard: Option<OwnedMutexGuard<()>>,
    entry: Option<(Arc<PathLocks>, PathBuf)>,
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        // Release before checking whether anyone still references the entry
        drop(self.guard.take());

        if let Some((paths, key)) = self.entry.take() {
            if paths
                .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1)
                .is_some()
            {
                trace!("Evicted idle lock for {:?}", key);
            }
        }
    }
}
