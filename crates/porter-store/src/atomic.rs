//! Atomic file writes.
//!
//! Both helpers write through a temporary file in the target directory and
//! commit with a rename, so readers never observe a partial file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use porter_common::PorterResult;

/// Removes the temporary file unless the rename committed it.
struct TempFileGuard {
    path: PathBuf,
    keep: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Write `data` to `target` atomically via a `.tmp` sibling.
pub fn write_atomically(target: &Path, data: &[u8]) -> PorterResult<()> {
    let tmp_path = target.with_extension("tmp");
    let mut guard = TempFileGuard::new(tmp_path.clone());

    let mut tmp = File::create(&tmp_path)?;
    tmp.write_all(data)?;
    tmp.sync_all()?;
    drop(tmp);

    std::fs::rename(&tmp_path, target)?;
    guard.keep();
    sync_parent(target)?;
    Ok(())
}

fn sync_parent(path: &Path) -> PorterResult<()> {
    if let Some(dir) = path.parent() {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

/// Write `pid` as a decimal string to `path` atomically.
///
/// The temporary file is a dot-prefixed sibling opened with
/// `O_CREAT|O_EXCL|O_RDWR|O_SYNC` and mode 0666; the rename is the commit
/// point. No trailing newline.
pub fn write_pid_file(path: &Path, pid: u32) -> PorterResult<()> {
    let path = std::path::absolute(path)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("/"));
    let base = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| porter_common::PorterError::Config {
            message: format!("invalid pid file path {}", path.display()),
        })?;
    let tmp_path = dir.join(format!(".{base}"));

    let mut options = OpenOptions::new();
    options.read(true).write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o666).custom_flags(libc::O_SYNC);
    }
    let mut file = options.open(&tmp_path)?;
    let result = write!(file, "{pid}");
    drop(file);
    result?;

    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}
