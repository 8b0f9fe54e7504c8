//! C2: process lock. Enforces invariant I1 — at most one process owns a
//! data directory at a time. Modeled on the file-descriptor-held advisory
//! lock pattern (see the SQLite fallback branch of typical DB advisory
//! lock guards): the open, locked file descriptor *is* the lock; there is
//! no separate liveness check against the file's contents except to
//! report who holds it on contention.

use camino::Utf8PathBuf;
use nix::fcntl::{Flock, FlockArg};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use thiserror::Error;

const LOCK_FILE_NAME: &str = ".lock";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LockRecord {
    pub pid: i32,
    pub hostname: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl LockRecord {
    fn render(&self) -> String {
        format!("pid={}\nhostname={}\nstart={}\n", self.pid, self.hostname, self.start_time.to_rfc3339())
    }

    fn parse(contents: &str) -> Option<LockRecord> {
        let mut pid = None;
        let mut hostname = None;
        let mut start = None;
        for line in contents.lines() {
            let (key, value) = line.split_once('=')?;
            match key {
                "pid" => pid = value.parse::<i32>().ok(),
                "hostname" => hostname = Some(value.to_string()),
                "start" => start = chrono::DateTime::parse_from_rfc3339(value)
                    .ok()
                    .map(|d| d.with_timezone(&chrono::Utc)),
                _ => {}
            }
        }
        Some(LockRecord {
            pid: pid?,
            hostname: hostname?,
            start_time: start?,
        })
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("data directory is locked by another process: {0:?}")]
    DirectoryLocked(Option<LockRecord>),
    #[error("io error acquiring process lock: {0}")]
    Io(#[from] std::io::Error),
}

/// Holds the locked, open file descriptor for the lifetime of the guard.
/// Dropping (or calling [`ProcessLock::release`]) unlocks, closes, and
/// unlinks the lock file.
pub struct ProcessLock {
    path: Utf8PathBuf,
    file: Option<Flock<File>>,
}

impl ProcessLock {
    /// Acquire exclusive ownership of `data_dir`. Creates the directory if
    /// absent. Non-blocking: contention fails immediately with
    /// [`LockError::DirectoryLocked`] carrying the existing owner's record.
    pub fn acquire(data_dir: &camino::Utf8Path) -> Result<Self, LockError> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(LOCK_FILE_NAME);

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path.as_std_path())?;

        let flock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => flock,
            Err((mut file, _errno)) => {
                let mut contents = String::new();
                let _ = file.read_to_string(&mut contents);
                return Err(LockError::DirectoryLocked(LockRecord::parse(&contents)));
            }
        };

        let mut lock = ProcessLock {
            path: path.clone(),
            file: Some(flock),
        };
        lock.write_record()?;
        tracing::info!(path = %path, "acquired process lock");
        Ok(lock)
    }

    fn write_record(&mut self) -> Result<(), LockError> {
        let record = LockRecord {
            pid: std::process::id() as i32,
            hostname: hostname_or_unknown(),
            start_time: chrono::Utc::now(),
        };
        if let Some(flock) = self.file.as_mut() {
            use std::io::{Seek, SeekFrom};
            flock.set_len(0)?;
            flock.seek(SeekFrom::Start(0))?;
            flock.write_all(record.render().as_bytes())?;
            flock.flush()?;
        }
        Ok(())
    }

    /// Release the lock, closing the descriptor and unlinking the file.
    /// Idempotent: safe to call, then let `Drop` run a no-op afterward.
    pub fn release(mut self) {
        unlock_and_unlink(&self.path, self.file.take());
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        unlock_and_unlink(&self.path, self.file.take());
    }
}

fn unlock_and_unlink(path: &camino::Utf8Path, flock: Option<Flock<File>>) {
    if let Some(flock) = flock {
        let _ = std::fs::remove_file(path);
        if let Err((_file, errno)) = flock.unlock() {
            tracing::warn!(%errno, "failed to release advisory lock (descriptor will close on drop anyway)");
        }
    }
}

fn hostname_or_unknown() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Confirm whether `pid` still refers to a live process, by sending the
/// null signal (no-op delivery, non-zero errno means the process is gone
/// or unreachable).
pub fn is_pid_alive(pid: i32) -> bool {
    nix::sys::signal::kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_allows_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let lock = ProcessLock::acquire(&path).unwrap();
        lock.release();

        let lock2 = ProcessLock::acquire(&path).unwrap();
        lock2.release();
    }

    #[test]
    fn second_acquire_fails_while_first_holds() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let _lock = ProcessLock::acquire(&path).unwrap();
        let err = ProcessLock::acquire(&path).unwrap_err();
        match err {
            LockError::DirectoryLocked(record) => {
                let record = record.expect("lock record should be observable");
                assert_eq!(record.pid, std::process::id() as i32);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn pid_liveness_check() {
        assert!(is_pid_alive(std::process::id() as i32));
    }
}
