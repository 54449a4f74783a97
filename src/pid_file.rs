use crate::dashboard::data_cache::atomic_write;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};

/// Single instance guard. Holds our PID in a file and removes it on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

pub fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Ask the process `pid` to exit if it still runs the same program as we do.
/// Returns `true` if a signal was delivered.
fn terminate_previous(pid: u32) -> bool {
    if pid == std::process::id() {
        return false;
    }
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    let Some(process) = system.process(pid) else {
        return false;
    };
    let ours = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.file_name().map(|n| n.to_os_string()));
    if ours.as_deref().is_some_and(|name| name != process.name()) {
        tracing::warn!(%pid, name = ?process.name(), "pid file points at another program, leaving it alone");
        return false;
    }
    tracing::info!(%pid, "terminating previous instance");
    process.kill_with(Signal::Term).unwrap_or_else(|| process.kill())
}

impl PidFile {
    /// Replace any running instance recorded in `path` and record ourselves.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(previous) = read_pid(&path) {
            if terminate_previous(previous) {
                std::thread::sleep(Duration::from_millis(200));
            }
        }
        atomic_write(&path, std::process::id().to_string().as_bytes())
            .with_context(|| format!("writing pid file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "pid file written");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Only remove the file if a newer instance has not taken it over.
        if read_pid(&self.path) == Some(std::process::id()) {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
            }
        }
    }
}
