use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive lock on `<db>.lock`, held for the whole run and released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

pub fn lock_path(db: &Path) -> PathBuf {
    let mut s = db.as_os_str().to_owned();
    s.push(".lock");
    PathBuf::from(s)
}

impl RunLock {
    pub fn acquire(db: &Path) -> Result<Self> {
        let path = lock_path(db);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("opening run lock {}", path.display()))?;
        if FileExt::try_lock_exclusive(&file).is_err() {
            bail!("another run holds {}; refusing to start a concurrent run", path.display());
        }
        tracing::debug!(lock = %path.display(), "run lock acquired");
        Ok(RunLock { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
