//! Cross-workflow lock on the shared library cache
//!
//! The lock is a file created with `create_new`, holding the owner PID and a
//! per-holder token. A lock whose owner process is gone is taken over. A lock
//! file that names no owner is a holder mid-write until it is older than
//! [`UNREADABLE_GRACE`]. Dropping the guard releases the lock.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const LOCK_FILE: &str = ".solforge-cache.lock";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long an empty or unparseable lock file is treated as held.
pub const UNREADABLE_GRACE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Timed out after {waited_ms}ms waiting for cache lock {path} (held by pid {holder:?})")]
    Timeout {
        path: PathBuf,
        waited_ms: u64,
        holder: Option<u32>,
    },

    #[error("Cache lock IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
    token: String,
}

impl CacheLock {
    pub fn lock_path(cache_dir: &Path) -> PathBuf {
        cache_dir.join(LOCK_FILE)
    }

    /// Wait for the lock, polling until `timeout` elapses.
    pub async fn acquire(cache_dir: &Path, timeout: Duration) -> Result<Self, LockError> {
        let start = Instant::now();
        let mut logged = false;
        loop {
            if let Some(lock) = Self::try_acquire(cache_dir)? {
                return Ok(lock);
            }
            let holder = read_holder(&Self::lock_path(cache_dir)).map(|(pid, _)| pid);
            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: Self::lock_path(cache_dir),
                    waited_ms: start.elapsed().as_millis() as u64,
                    holder,
                });
            }
            if !logged {
                debug!(cache = %cache_dir.display(), ?holder, "Waiting for library cache lock");
                logged = true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Take the lock if it is free or stale. `Ok(None)` means a live holder.
    pub fn try_acquire(cache_dir: &Path) -> Result<Option<Self>, LockError> {
        let path = Self::lock_path(cache_dir);
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(cache_dir).map_err(io_err)?;

        let token = Uuid::new_v4().to_string();
        for _ in 0..2 {
            match fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&path)
            {
                Ok(mut file) => {
                    file.write_all(format!("{}\n{}\n", std::process::id(), token).as_bytes())
                        .and_then(|_| file.sync_all())
                        .map_err(io_err)?;
                    return Ok(Some(Self {
                        path: path.clone(),
                        token,
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match read_holder(&path) {
                        Some((pid, _)) if is_process_alive(pid) => return Ok(None),
                        None if !lock_age(&path).is_some_and(|age| age >= UNREADABLE_GRACE) => {
                            return Ok(None)
                        }
                        holder => {
                            warn!(lock = %path.display(), ?holder, "Taking over stale cache lock");
                            take_over_stale(&path, holder.map(|(_, t)| t)).map_err(io_err)?;
                        }
                    }
                }
                Err(e) => return Err(io_err(e)),
            }
        }
        Ok(None)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        // only remove the file if it is still ours
        if read_holder(&self.path).is_some_and(|(_, token)| token == self.token) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn read_holder(path: &Path) -> Option<(u32, String)> {
    let raw = fs::read_to_string(path).ok()?;
    let mut lines = raw.lines();
    let pid = lines.next()?.trim().parse().ok()?;
    let token = lines.next().unwrap_or("").trim().to_string();
    Some((pid, token))
}

fn lock_age(path: &Path) -> Option<Duration> {
    fs::metadata(path).ok()?.modified().ok()?.elapsed().ok()
}

/// Move a stale lock aside, checking it has not changed hands since it was
/// read. Losing the race to another waiter is not an error.
fn take_over_stale(path: &Path, seen_token: Option<String>) -> std::io::Result<()> {
    if read_holder(path).map(|(_, t)| t) != seen_token {
        return Ok(());
    }
    let aside = path.with_extension(format!("stale-{}", Uuid::new_v4()));
    match fs::rename(path, &aside) {
        Ok(()) => fs::remove_file(&aside).or(Ok(())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Signal 0 checks for the process without touching it. EPERM means it
/// exists under another user.
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    if pid == std::process::id() {
        return true;
    }

    #[cfg(unix)]
    {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // SAFETY: kill with signal 0 delivers nothing
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    {
        true
    }
}
