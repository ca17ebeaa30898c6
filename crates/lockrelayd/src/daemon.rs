//! Process management for the daemon binary.
//!
//! A [`PidFile`] guard marks the running relay; `stop` signals the PID it
//! holds. Paths come from [`RelayConfig`](crate::config::RelayConfig) so a
//! second relay with its own `state_dir` can run alongside.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A PID file that cannot be parsed or points at a dead process is
//!   treated as stale

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

/// Poll step while waiting for a signalled relay to exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors from daemon process management.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Relay already running (PID {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("Failed to write PID file {path}: {error}")]
    PidFile { path: PathBuf, error: String },

    #[error("Failed to signal PID {pid}: {error}")]
    Signal { pid: u32, error: String },

    #[error("Failed to detach: {0}")]
    Detach(String),
}

/// PID file owned by the running relay. Removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

impl PidFile {
    /// Records this process in `path`, replacing a stale file.
    pub fn acquire(path: &Path) -> Result<Self, DaemonError> {
        if let Some(pid) = running_pid(path) {
            return Err(DaemonError::AlreadyRunning { pid });
        }

        let pid = std::process::id();
        let write = || -> io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, pid.to_string())
        };
        write().map_err(|e| DaemonError::PidFile {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        debug!(path = %path.display(), pid, "PID file written");
        Ok(Self {
            path: path.to_path_buf(),
            pid,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Another relay may have taken over a file we no longer own
        if read_pid(&self.path) == Some(self.pid) {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to remove PID file");
            }
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// PID of the relay recorded in `path`, if that process is alive.
///
/// A stale file is removed.
pub fn running_pid(path: &Path) -> Option<u32> {
    let pid = read_pid(path);
    match pid {
        Some(pid) if process_alive(pid) => Some(pid),
        _ => {
            if path.exists() {
                debug!(path = %path.display(), "Removing stale PID file");
                let _ = fs::remove_file(path);
            }
            None
        }
    }
}

/// Whether a process with this PID exists.
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // Signal 0 checks existence; EPERM means it exists under another user
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Sends SIGTERM to the relay.
pub fn request_stop(pid: u32) -> Result<(), DaemonError> {
    let target = libc::pid_t::try_from(pid).map_err(|e| DaemonError::Signal {
        pid,
        error: e.to_string(),
    })?;

    if unsafe { libc::kill(target, libc::SIGTERM) } != 0 {
        return Err(DaemonError::Signal {
            pid,
            error: io::Error::last_os_error().to_string(),
        });
    }
    Ok(())
}

/// Blocks until `pid` exits or `limit` passes. Returns whether it exited.
pub fn wait_for_exit(pid: u32, limit: Duration) -> bool {
    let started = Instant::now();
    while process_alive(pid) {
        if started.elapsed() >= limit {
            return false;
        }
        std::thread::sleep(EXIT_POLL_INTERVAL);
    }
    true
}

/// Forks into the background with stdout and stderr appended to `log_file`.
///
/// Must run before any tokio runtime exists.
pub fn detach(log_file: &Path) -> Result<(), DaemonError> {
    let open = || -> io::Result<(File, File)> {
        if let Some(parent) = log_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let stdout = fs::OpenOptions::new().create(true).append(true).open(log_file)?;
        let stderr = stdout.try_clone()?;
        Ok((stdout, stderr))
    };
    let (stdout, stderr) = open().map_err(|e| DaemonError::Detach(e.to_string()))?;

    daemonize::Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .map_err(|e| DaemonError::Detach(e.to_string()))
}
