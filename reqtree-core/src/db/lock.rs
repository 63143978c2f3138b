//! Single-writer lock for a database file
//!
//! Mutating commands hold a [`WriteLock`] for their whole duration so two
//! processes never interleave a read-compute-write cycle (numbering,
//! reordering) against the same database.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use log::debug;

use crate::error::{ReqError, Result};

/// How long [`WriteLock::acquire`] waits before giving up
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Exclusive advisory lock on `<database>.lock`, released on drop
#[derive(Debug)]
pub struct WriteLock {
    file: File,
    path: PathBuf,
}

impl WriteLock {
    pub fn acquire(db_path: &Path) -> Result<Self> {
        Self::acquire_with_timeout(db_path, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn acquire_with_timeout(db_path: &Path, timeout: Duration) -> Result<Self> {
        let path = lock_path(db_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("Acquired write lock {:?}", path);
                    return Ok(Self { file, path });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if start.elapsed() > timeout {
                        return Err(ReqError::LockTimeout {
                            path: db_path.to_path_buf(),
                            waited: timeout,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn lock_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}
