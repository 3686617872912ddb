//! Process lock guarding the active session slot.
//!
//! The lock is a file holding the owner's PID. It is written to a temp file
//! first and published with a no-clobber link, so the lock path never exists
//! without a PID in it. A marker whose PID is no longer alive is reclaimed.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{SessionError, StorageError};

pub const LOCK_FILE_NAME: &str = "genloop.lock";

/// Unreadable markers younger than this are treated as held.
pub const UNREADABLE_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    pid: u32,
}

impl ProcessLock {
    /// Take the lock at `path`, reclaiming it if the recorded owner is gone.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref().to_path_buf();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(StorageError::from)?;
        let pid = std::process::id();

        // Two passes: the second runs after a stale marker was removed.
        for _ in 0..2 {
            let mut marker = NamedTempFile::new_in(&dir).map_err(StorageError::from)?;
            write!(marker, "{}", pid).map_err(StorageError::from)?;
            marker.as_file().sync_all().map_err(StorageError::from)?;

            match marker.persist_noclobber(&path) {
                Ok(_) => {
                    debug!(path = %path.display(), pid, "process lock acquired");
                    return Ok(Self { path, pid });
                }
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                    let holder = read_pid(&path);
                    let stale = match holder {
                        Some(owner) => owner == pid || !process_alive(owner),
                        None => marker_age(&path).map_or(true, |age| age >= UNREADABLE_GRACE),
                    };
                    if !stale {
                        return Err(SessionError::LockHeld {
                            pid: holder.unwrap_or(0),
                        });
                    }
                    warn!(path = %path.display(), stale_pid = ?holder, "reclaiming stale process lock");
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(StorageError::from(e).into()),
                    }
                }
                Err(e) => return Err(StorageError::from(e.error).into()),
            }
        }
        Err(SessionError::LockHeld {
            pid: read_pid(&path).unwrap_or(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded in an existing lock file, if any.
    pub fn holder(path: impl AsRef<Path>) -> Option<u32> {
        read_pid(path.as_ref())
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if read_pid(&self.path) == Some(self.pid) {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to release process lock");
            }
        }
    }
}

/// Time since the marker was last written. `None` if it vanished.
fn marker_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(SystemTime::now().duration_since(modified).unwrap_or_default())
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists but owned by someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
