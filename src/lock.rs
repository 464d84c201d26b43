use std::fs::{self, File, OpenOptions};
use std::path::Path;

use anyhow::{Result, anyhow};
use fs2::FileExt;

use crate::error::{RunError, transient_error};

const LOCK_FILE: &str = ".lock";

/// OS advisory lock on `<dir>/.lock`, held for the duration of a mutating
/// run. The OS releases it when the process exits, crashed or not, so stale
/// locks cannot wedge the schedule.
#[derive(Debug)]
pub struct DirLock {
    file: File,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .map_err(|e| transient_error(format!("create {}: {e}", dir.display())))?;
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| transient_error(format!("open lock file {}: {e}", path.display())))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file }),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                Err(anyhow!(RunError::LockHeld(format!(
                    "another run holds the lock at {}",
                    path.display()
                ))))
            }
            Err(err) => Err(transient_error(format!(
                "lock {}: {err}",
                path.display()
            ))),
        }
    }

}

impl Drop for DirLock {
    fn drop(&mut self) {
        // Unlock errors are unrecoverable here; the OS drops the lock with
        // the file handle anyway.
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
