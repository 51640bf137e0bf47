//! Cross-process advisory locks on store directories.

use std::fs::File;
use std::path::Path;

use fs2::FileExt;

use porter_common::{PorterError, PorterResult};

/// An exclusive advisory lock over a directory.
///
/// Separate hook invocations are separate processes, so an in-process mutex
/// would not serialise them. The lock is released when the guard drops.
#[derive(Debug)]
pub struct DirLock {
    file: File,
}

impl DirLock {
    /// Take the exclusive lock on `path`, creating the directory first if
    /// needed. Blocks until the current holder releases it.
    pub fn acquire(path: &Path) -> PorterResult<Self> {
        std::fs::create_dir_all(path)?;
        let file = File::open(path)?;
        file.lock_exclusive().map_err(|e| PorterError::Store {
            message: format!("failed to lock {}: {e}", path.display()),
        })?;
        Ok(Self { file })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Run `f` while holding the exclusive lock on `path`.
pub fn with_dir_lock<T>(path: &Path, f: impl FnOnce() -> PorterResult<T>) -> PorterResult<T> {
    let _lock = DirLock::acquire(path)?;
    f()
}
