//! PID file management and background launch.

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::info;

/// Write the current process PID to the PID file.
pub fn write_pid_file(path: &Path) -> Result<()> {
    let pid = std::process::id();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create PID file directory")?;
    }
    fs::write(path, pid.to_string()).context("failed to write PID file")?;
    info!(pid, path = %path.display(), "wrote PID file");
    Ok(())
}

/// Read the PID from the PID file, if it exists.
pub fn read_pid_file(path: &Path) -> Result<Option<u32>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).context("failed to read PID file")?;
    let pid: u32 = contents
        .trim()
        .parse()
        .context("PID file contains invalid data")?;
    Ok(Some(pid))
}

pub fn remove_pid_file(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).context("failed to remove PID file")?;
        info!(path = %path.display(), "removed PID file");
    }
    Ok(())
}

/// Check whether a process with the given PID is alive.
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // Signal 0 only checks that the process exists.
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// PID of the running daemon, clearing a stale PID file on the way.
pub fn is_running(pid_file: &Path) -> Result<Option<u32>> {
    match read_pid_file(pid_file)? {
        Some(pid) if is_process_alive(pid) => Ok(Some(pid)),
        Some(_stale) => {
            remove_pid_file(pid_file)?;
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Ask the daemon to shut down and wait for it to release its claims.
///
/// Returns `false` if no daemon was running.
pub fn stop_daemon(pid_file: &Path) -> Result<bool> {
    match read_pid_file(pid_file)? {
        Some(pid) if is_process_alive(pid) => {
            info!(pid, "sending SIGTERM to daemon");
            #[cfg(unix)]
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            // Shutdown runs reconciliations, so allow a generous window.
            for _ in 0..60 {
                std::thread::sleep(std::time::Duration::from_millis(250));
                if !is_process_alive(pid) {
                    remove_pid_file(pid_file)?;
                    return Ok(true);
                }
            }
            anyhow::bail!("daemon (PID {}) did not exit after SIGTERM", pid);
        }
        Some(_stale) => {
            remove_pid_file(pid_file)?;
            Ok(false)
        }
        None => Ok(false),
    }
}

/// Relaunch this executable detached, running in the foreground with file
/// logging. Returns the child's PID.
pub fn spawn_background(config_path: &Path, log_level: Option<&str>) -> Result<u32> {
    let exe = std::env::current_exe().context("cannot locate the daemon executable")?;
    let mut command = Command::new(exe);
    command.arg("--config").arg(config_path);
    if let Some(level) = log_level {
        command.arg("--log-level").arg(level);
    }
    command
        .args(["start", "--foreground", "--log-to-file"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let child = command.spawn().context("failed to launch background daemon")?;
    Ok(child.id())
}
