//! Engine and watchdog process supervision
//!
//! The supervisor exclusively owns the engine's OS process and the
//! companion watchdog. Nothing else in the crate signals either process.
//! Teardown is idempotent and infallible: each step logs and swallows its
//! own failure so a dead component never blocks the rest.

mod args;
mod watchdog;

pub use args::{effective_cache_size, free_space, CacheMode, MountOptions};
pub use watchdog::{script_filename, WATCHDOG_VERSION};

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, watch, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MountError, Result};
use crate::platform::Platform;

/// How long teardown waits for the engine to die after being signaled.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// How long after spawn an immediate engine exit is treated as a launch
/// failure rather than a readiness problem.
const LAUNCH_SETTLE: Duration = Duration::from_millis(300);

/// Ownership wrapper around a spawned engine process
pub struct ProcessHandle {
    pid: u32,
    alive: Arc<AtomicBool>,
    kill_tx: oneshot::Sender<()>,
    exit_rx: watch::Receiver<bool>,
    forwarders: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Channel that flips to `true` once the process has exited.
    pub fn exited(&self) -> watch::Receiver<bool> {
        self.exit_rx.clone()
    }

    /// Detach stream forwarders, signal termination, and wait up to
    /// `grace` for a confirmed exit. Returns whether the exit was
    /// confirmed.
    pub async fn kill(mut self, grace: Duration) -> bool {
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }
        let alive = self.alive.clone();
        let mut exit_rx = self.exit_rx.clone();
        let _ = self.kill_tx.send(());
        tokio::time::timeout(grace, exit_rx.wait_for(|exited| *exited))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
            || !alive.load(Ordering::SeqCst)
    }
}

/// Engine process management as seen by the lifecycle controller.
///
/// Implemented by [`ProcessSupervisor`]; tests substitute their own.
#[async_trait]
pub trait EngineSupervisor: Send + Sync {
    /// Spawn the engine with the given argv; returns its pid.
    async fn spawn_engine(&self, binary: &Path, argv: &[String]) -> Result<u32>;

    /// Pid of the currently tracked engine, if one is live.
    async fn engine_pid(&self) -> Option<u32>;

    /// Spawn the watchdog, once per orchestrator lifetime.
    async fn ensure_watchdog(&self, mount_point: &Path) -> Result<u32>;

    /// Tear down the engine. Idempotent; never raises.
    async fn teardown(&self, mount_point: &Path);
}

/// Spawns and tears down the engine plus the companion watchdog
pub struct ProcessSupervisor {
    platform: Arc<dyn Platform>,
    scripts_dir: PathBuf,
    engine: Mutex<Option<ProcessHandle>>,
    /// Watchdog pid; spawned once per orchestrator lifetime.
    watchdog_pid: OnceCell<u32>,
}

impl ProcessSupervisor {
    pub fn new(platform: Arc<dyn Platform>, scripts_dir: PathBuf) -> Self {
        Self {
            platform,
            scripts_dir,
            engine: Mutex::new(None),
            watchdog_pid: OnceCell::new(),
        }
    }

    async fn spawn_watchdog(&self, mount_point: &Path) -> Result<u32> {
        let script = watchdog::materialize(&self.scripts_dir)?;
        let own_pid = std::process::id().to_string();
        let image = self.platform.engine_image_name();

        let mut cmd = if cfg!(windows) {
            let mut c = std::process::Command::new("cmd");
            c.arg("/C").arg(&script).arg(&own_pid).arg(&image);
            c
        } else {
            let mut c = std::process::Command::new("sh");
            c.arg(&script).arg(&own_pid).arg(&image).arg(mount_point);
            c
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            // DETACHED_PROCESS | CREATE_NO_WINDOW
            cmd.creation_flags(0x0800_0008);
        }

        let child = Command::from(cmd).spawn().map_err(MountError::Spawn)?;
        let pid = child.id().unwrap_or(0);
        info!(pid, script = %script.display(), "watchdog spawned");
        // Intentionally dropped: the watchdog must keep running without us.
        drop(child);
        Ok(pid)
    }
}

#[async_trait]
impl EngineSupervisor for ProcessSupervisor {
    /// Spawn the engine with the given argv and track its handle.
    ///
    /// Fails with [`MountError::EngineExited`] when the process dies within
    /// the launch settle window.
    async fn spawn_engine(&self, binary: &Path, argv: &[String]) -> Result<u32> {
        let mut child = Command::new(binary)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(MountError::Spawn)?;

        let pid = child.id().ok_or_else(|| {
            MountError::Spawn(std::io::Error::new(
                std::io::ErrorKind::Other,
                "spawned engine has no pid",
            ))
        })?;

        let mut forwarders = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(forward_stream(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(forward_stream(stderr, "stderr"));
        }

        let alive = Arc::new(AtomicBool::new(true));
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(false);
        {
            let alive = alive.clone();
            tokio::spawn(async move {
                tokio::select! {
                    status = child.wait() => match status {
                        Ok(status) => info!(code = ?status.code(), "engine process exited"),
                        Err(e) => warn!(error = %e, "waiting on engine process failed"),
                    },
                    _ = kill_rx => {
                        if let Err(e) = child.start_kill() {
                            debug!(error = %e, "engine already gone when killed");
                        }
                        let _ = child.wait().await;
                    }
                }
                alive.store(false, Ordering::SeqCst);
                let _ = exit_tx.send(true);
            });
        }

        let handle = ProcessHandle {
            pid,
            alive,
            kill_tx,
            exit_rx,
            forwarders,
        };

        tokio::time::sleep(LAUNCH_SETTLE).await;
        if !handle.is_alive() {
            return Err(MountError::EngineExited);
        }

        info!(pid, "engine process spawned");
        *self.engine.lock().await = Some(handle);
        Ok(pid)
    }

    async fn engine_pid(&self) -> Option<u32> {
        self.engine
            .lock()
            .await
            .as_ref()
            .filter(|h| h.is_alive())
            .map(ProcessHandle::pid)
    }

    /// The watchdog outlives this process by design: it is detached from
    /// the process group and left running so it can clean up after an
    /// abrupt orchestrator death.
    async fn ensure_watchdog(&self, mount_point: &Path) -> Result<u32> {
        let pid = self
            .watchdog_pid
            .get_or_try_init(|| self.spawn_watchdog(mount_point))
            .await?;
        Ok(*pid)
    }

    /// Order: detach forwarders and signal the tracked handle, fall back to
    /// kill-by-name when the handle is stale or absent, then force-unmount
    /// the mount path if it is still listed.
    async fn teardown(&self, mount_point: &Path) {
        let handle = self.engine.lock().await.take();
        let mut confirmed_dead = false;
        if let Some(handle) = handle {
            let pid = handle.pid();
            confirmed_dead = handle.kill(KILL_GRACE).await;
            if confirmed_dead {
                debug!(pid, "engine terminated");
            } else {
                warn!(pid, "engine did not confirm exit; falling back to kill-by-name");
            }
        }

        if !confirmed_dead {
            self.platform.kill_engine_by_name().await;
        }

        if self.platform.is_mounted(mount_point).await {
            self.platform.unmount(mount_point).await;
            if self.platform.is_mounted(mount_point).await {
                warn!(path = %mount_point.display(), "mount path still listed after unmount");
            }
        }
    }
}

fn forward_stream<R>(stream: R, label: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(stream = label, "engine: {line}");
        }
    })
}

/// Is a process with this pid alive?
pub fn pid_is_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        if pid == 0 {
            return false;
        }
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }
    #[cfg(windows)]
    {
        let filter = format!("PID eq {pid}");
        std::process::Command::new("tasklist")
            .args(["/FI", &filter, "/FO", "CSV", "/NH"])
            .output()
            .map(|o| {
                let stdout = String::from_utf8_lossy(&o.stdout);
                stdout.lines().any(|l| l.contains(&format!("\"{pid}\"")))
            })
            .unwrap_or(false)
    }
    #[cfg(not(any(unix, windows)))]
    {
        pid == std::process::id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn own_pid_is_alive() {
        assert!(pid_is_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn pid_zero_is_not_alive() {
        assert!(!pid_is_alive(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawned_process_is_tracked_and_killed() {
        let platform = crate::platform::current();
        let tmp = tempfile::TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(platform, tmp.path().to_path_buf());

        // A long sleep stands in for the engine.
        let pid = supervisor
            .spawn_engine(Path::new("/bin/sleep"), &["300".to_string()])
            .await
            .unwrap();
        assert!(pid_is_alive(pid));
        assert_eq!(supervisor.engine_pid().await, Some(pid));

        supervisor.teardown(tmp.path()).await;
        assert_eq!(supervisor.engine_pid().await, None);
        // Killed processes may linger as zombies until reaped, but a second
        // teardown must still be a no-op.
        supervisor.teardown(tmp.path()).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_confirms_exit_within_grace() {
        let platform = crate::platform::current();
        let tmp = tempfile::TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(platform, tmp.path().to_path_buf());

        supervisor
            .spawn_engine(Path::new("/bin/sleep"), &["300".to_string()])
            .await
            .unwrap();
        let handle = supervisor.engine.lock().await.take().unwrap();
        let pid = handle.pid();
        assert!(handle.kill(KILL_GRACE).await);
        // The waiter task reaped the child, so the pid is really gone.
        assert!(!pid_is_alive(pid));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn immediate_exit_is_a_spawn_failure() {
        let platform = crate::platform::current();
        let tmp = tempfile::TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(platform, tmp.path().to_path_buf());

        let err = supervisor
            .spawn_engine(Path::new("/bin/true"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, MountError::EngineExited));
        assert_eq!(supervisor.engine_pid().await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_binary_is_a_spawn_failure() {
        let platform = crate::platform::current();
        let tmp = tempfile::TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(platform, tmp.path().to_path_buf());

        let err = supervisor
            .spawn_engine(&tmp.path().join("no-such-engine"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, MountError::Spawn(_)));
    }
}
