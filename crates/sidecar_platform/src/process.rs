//! Child Player Processes
//!
//! PATH lookup and lifecycle management for external player executables.
//! Both the streaming subprocess backend and the command-based OS player
//! run on top of [`ManagedProcess`].

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PlatformError, PlatformResult};

/// How often the monitor thread checks whether the child exited
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a terminated child gets before it is killed
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Called once when a child exits on its own (not via `stop()`).
/// The flag is the child's exit success.
pub type ExitCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// An executable name plus the fixed arguments that precede the locator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl PlayerCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Resolve `program` against PATH
    pub fn resolve(&self) -> Option<PathBuf> {
        find_executable(&self.program)
    }
}

/// Find an executable by name on the current PATH
///
/// Names containing a path separator are checked as-is.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    find_executable_in(name, &path_var)
}

/// Find an executable by name on an explicit PATH-style list
pub fn find_executable_in(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    let as_path = Path::new(name);
    if as_path.components().count() > 1 {
        return is_executable(as_path).then(|| as_path.to_path_buf());
    }

    for dir in std::env::split_paths(path_var) {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let with_ext = candidate.with_extension("exe");
            if is_executable(&with_ext) {
                return Some(with_ext);
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> PlatformResult<()> {
    // SAFETY: kill(2) takes plain integers and touches no memory we own
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(PlatformError::SignalFailed(
            std::io::Error::last_os_error().to_string(),
        ))
    }
}

/// A running player process with a monitor thread watching for exit
pub struct ManagedProcess {
    label: String,
    pid: u32,
    child: Arc<Mutex<Child>>,
    stopping: Arc<AtomicBool>,
    paused: bool,
    monitor: Option<JoinHandle<()>>,
}

impl ManagedProcess {
    /// Spawn `program args... locator` with stdio detached
    pub fn spawn(
        program: &Path,
        args: &[String],
        locator: &str,
        on_exit: Option<ExitCallback>,
    ) -> PlatformResult<Self> {
        let label = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());

        let child = Command::new(program)
            .args(args)
            .arg(locator)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PlatformError::SpawnFailed {
                program: label.clone(),
                reason: e.to_string(),
            })?;

        let pid = child.id();
        let child = Arc::new(Mutex::new(child));
        let stopping = Arc::new(AtomicBool::new(false));

        let monitor_child = Arc::clone(&child);
        let monitor_stopping = Arc::clone(&stopping);
        let monitor_label = label.clone();
        let monitor = thread::Builder::new()
            .name(format!("sidecar-{}-monitor", label))
            .spawn(move || {
                Self::monitor_main(monitor_label, monitor_child, monitor_stopping, on_exit);
            });

        let monitor = match monitor {
            Ok(handle) => handle,
            Err(e) => {
                let mut child = child.lock();
                let _ = child.kill();
                let _ = child.wait();
                return Err(PlatformError::SpawnFailed {
                    program: label,
                    reason: e.to_string(),
                });
            }
        };

        info!("Spawned {} (PID {})", label, pid);

        Ok(Self {
            label,
            pid,
            child,
            stopping,
            paused: false,
            monitor: Some(monitor),
        })
    }

    fn monitor_main(
        label: String,
        child: Arc<Mutex<Child>>,
        stopping: Arc<AtomicBool>,
        on_exit: Option<ExitCallback>,
    ) {
        loop {
            if stopping.load(Ordering::Acquire) {
                return;
            }

            let status = child.lock().try_wait();
            match status {
                Ok(Some(status)) => {
                    if stopping.load(Ordering::Acquire) {
                        return;
                    }
                    debug!("{} exited on its own: {}", label, status);
                    if let Some(callback) = on_exit {
                        callback(status.success());
                    }
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Lost track of {}: {}", label, e);
                    return;
                }
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the child is still alive (paused counts as alive)
    pub fn is_running(&self) -> bool {
        matches!(self.child.lock().try_wait(), Ok(None))
    }

    pub fn is_paused(&self) -> bool {
        self.paused && self.is_running()
    }

    /// Suspend the child (SIGSTOP on Unix)
    pub fn pause(&mut self) -> PlatformResult<()> {
        if !self.is_running() {
            return Err(PlatformError::NotRunning);
        }
        #[cfg(unix)]
        {
            send_signal(self.pid, libc::SIGSTOP)?;
            self.paused = true;
            Ok(())
        }
        #[cfg(not(unix))]
        {
            Err(PlatformError::unsupported("pause"))
        }
    }

    /// Continue a suspended child (SIGCONT on Unix)
    pub fn resume(&mut self) -> PlatformResult<()> {
        if !self.is_running() {
            return Err(PlatformError::NotRunning);
        }
        #[cfg(unix)]
        {
            send_signal(self.pid, libc::SIGCONT)?;
            self.paused = false;
            Ok(())
        }
        #[cfg(not(unix))]
        {
            Err(PlatformError::unsupported("resume"))
        }
    }

    /// Terminate the child, escalating to kill after a bounded wait
    pub fn stop(&mut self) {
        self.stopping.store(true, Ordering::Release);

        {
            let mut child = self.child.lock();
            if let Ok(None) = child.try_wait() {
                #[cfg(unix)]
                {
                    if self.paused {
                        let _ = send_signal(self.pid, libc::SIGCONT);
                    }
                    let _ = send_signal(self.pid, libc::SIGTERM);
                }
                #[cfg(not(unix))]
                {
                    let _ = child.kill();
                }

                let deadline = Instant::now() + STOP_TIMEOUT;
                loop {
                    match child.try_wait() {
                        Ok(Some(_)) => break,
                        Ok(None) if Instant::now() < deadline => {
                            thread::sleep(Duration::from_millis(20));
                        }
                        _ => {
                            warn!("{} (PID {}) ignored terminate, killing", self.label, self.pid);
                            let _ = child.kill();
                            let _ = child.wait();
                            break;
                        }
                    }
                }
            }
        }
        self.paused = false;

        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
        debug!("Stopped {} (PID {})", self.label, self.pid);
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if self.monitor.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_player_command_serialization() {
        let cmd = PlayerCommand::new("mpv", &["--no-video"]);
        let json = serde_json::to_string(&cmd).unwrap();
        let back: PlayerCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd, back);

        // args default to empty
        let bare: PlayerCommand = serde_json::from_str(r#"{"program":"ffplay"}"#).unwrap();
        assert!(bare.args.is_empty());
    }

    #[test]
    fn test_find_executable_missing() {
        assert!(find_executable("definitely-not-a-real-player-binary").is_none());
        assert!(find_executable("").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_find_executable_in_custom_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("fakeplayer");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let plain = dir.path().join("notexec");
        std::fs::write(&plain, "").unwrap();
        std::fs::set_permissions(&plain, std::fs::Permissions::from_mode(0o644)).unwrap();

        let path_var = std::env::join_paths([dir.path()]).unwrap();
        assert_eq!(find_executable_in("fakeplayer", &path_var), Some(exe.clone()));
        assert!(find_executable_in("notexec", &path_var).is_none());

        // Absolute paths bypass PATH
        let empty = std::ffi::OsString::new();
        assert_eq!(
            find_executable_in(exe.to_str().unwrap(), &empty),
            Some(exe)
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_spawn_pause_resume_stop() {
        let Some(sleep) = find_executable("sleep") else {
            return;
        };

        let mut process = ManagedProcess::spawn(&sleep, &[], "30", None).unwrap();
        assert!(process.is_running());

        process.pause().unwrap();
        assert!(process.is_paused());
        process.resume().unwrap();
        assert!(!process.is_paused());

        let started = Instant::now();
        process.stop();
        assert!(!process.is_running());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_callback_fires_on_natural_exit() {
        let Some(sleep) = find_executable("sleep") else {
            return;
        };

        let (tx, rx) = mpsc::channel();
        let _process = ManagedProcess::spawn(
            &sleep,
            &[],
            "0",
            Some(Box::new(move |success| {
                let _ = tx.send(success);
            })),
        )
        .unwrap();

        let success = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(success);
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_callback_suppressed_on_stop() {
        let Some(sleep) = find_executable("sleep") else {
            return;
        };

        let (tx, rx) = mpsc::channel();
        let mut process = ManagedProcess::spawn(
            &sleep,
            &[],
            "30",
            Some(Box::new(move |success| {
                let _ = tx.send(success);
            })),
        )
        .unwrap();

        process.stop();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn test_spawn_missing_program_fails() {
        let result = ManagedProcess::spawn(
            Path::new("/nonexistent/sidecar-player"),
            &[],
            "x",
            None,
        );
        assert!(matches!(result, Err(PlatformError::SpawnFailed { .. })));
    }
}
