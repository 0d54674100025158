//! Mount lifecycle controller
//!
//! The top-level state machine. `start` and `stop` are each serialized by
//! their own lock; the locks are distinct so the unconditional `stop` at
//! the top of `start` (and the `stop` that recovers from a failed start)
//! can never deadlock against the start lock the caller already holds.
//! A background monitor re-probes readiness every interval while the
//! session is `Active` and stops the session when a probe fails, which
//! catches engines that died silently out-of-band.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{obscure_password, render_profile, write_profile, AppDirs, REMOTE_NAME};
use crate::credentials::Credentials;
use crate::error::{MountError, Result};
use crate::platform::{self, Platform};
use crate::ports;
use crate::probe::{ProbeTarget, Readiness, ReadinessProbe};
use crate::provision::{engine_descriptor, BinaryProvisioner};
use crate::rc::RcClient;
use crate::server::FileServer;
use crate::session::{MountSession, MountState};
use crate::stats::{CacheStats, TransferStats};
use crate::supervisor::{
    effective_cache_size, free_space, CacheMode, EngineSupervisor, MountOptions, ProcessSupervisor,
};

/// Static configuration for one orchestrator instance
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Local mount target: a directory under the home hierarchy on POSIX
    /// platforms, a free drive letter (`X:`) on Windows
    pub mount_point: PathBuf,
    pub read_only: bool,
    /// Volume label shown by the OS
    pub volume_name: String,
    pub cache_mode: CacheMode,
    /// Upper bound for the VFS cache; the effective bound also honors free
    /// space on the cache volume where the platform exposes it
    pub cache_ceiling_bytes: u64,
    /// Free space on the cache volume kept untouched
    pub reserved_bytes: u64,
    pub cache_max_age: String,
    pub poll_interval: String,
    pub dir_cache_time: String,
    /// Engine log file; engine logging is disabled when absent
    pub log_file: Option<PathBuf>,
    /// Attempt privileged driver installation when the probe fails
    pub try_install_driver: bool,
    /// Override the per-user data directory (used by tests)
    pub data_dir: Option<PathBuf>,
    /// Overall deadline for the readiness wait during start
    pub readiness_timeout: Duration,
    /// Cadence of the self-healing monitor
    pub monitor_interval: Duration,
}

impl MountConfig {
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
            read_only: false,
            volume_name: "Drive".to_string(),
            cache_mode: CacheMode::Full,
            cache_ceiling_bytes: 10 * 1024 * 1024 * 1024,
            reserved_bytes: 2 * 1024 * 1024 * 1024,
            cache_max_age: "720h".to_string(),
            poll_interval: "15s".to_string(),
            dir_cache_time: "60s".to_string(),
            log_file: None,
            try_install_driver: false,
            data_dir: None,
            readiness_timeout: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(15),
        }
    }
}

struct Inner {
    config: MountConfig,
    dirs: AppDirs,
    platform: Arc<dyn Platform>,
    server: Arc<dyn FileServer>,
    provisioner: BinaryProvisioner,
    supervisor: Arc<dyn EngineSupervisor>,
    probe: Arc<dyn Readiness>,
    session: RwLock<MountSession>,
    start_lock: Mutex<()>,
    stop_lock: Mutex<()>,
}

/// Orchestrates the mount session lifecycle
pub struct LifecycleController {
    inner: Arc<Inner>,
    monitor: JoinHandle<()>,
}

impl LifecycleController {
    /// Build a controller for the platform this binary runs on.
    pub fn new(config: MountConfig, server: Arc<dyn FileServer>) -> Result<Self> {
        Self::with_platform(config, server, platform::current())
    }

    /// Build a controller with an explicit platform adapter.
    ///
    /// Must be called within a Tokio runtime: construction spawns the
    /// background monitor task.
    pub fn with_platform(
        config: MountConfig,
        server: Arc<dyn FileServer>,
        platform: Arc<dyn Platform>,
    ) -> Result<Self> {
        let dirs = Self::resolve_dirs(&config)?;
        let supervisor = Arc::new(ProcessSupervisor::new(platform.clone(), dirs.scripts_dir()));
        Self::assemble(
            config,
            dirs,
            server,
            platform,
            supervisor,
            Arc::new(ReadinessProbe::new()),
        )
    }

    /// Build a controller with every collaborator injected, including the
    /// process supervisor and the readiness signal. Used by tests.
    pub fn with_components(
        config: MountConfig,
        server: Arc<dyn FileServer>,
        platform: Arc<dyn Platform>,
        supervisor: Arc<dyn EngineSupervisor>,
        probe: Arc<dyn Readiness>,
    ) -> Result<Self> {
        let dirs = Self::resolve_dirs(&config)?;
        Self::assemble(config, dirs, server, platform, supervisor, probe)
    }

    fn resolve_dirs(config: &MountConfig) -> Result<AppDirs> {
        match &config.data_dir {
            Some(root) => AppDirs::at(root.clone()),
            None => AppDirs::resolve(),
        }
    }

    fn assemble(
        config: MountConfig,
        dirs: AppDirs,
        server: Arc<dyn FileServer>,
        platform: Arc<dyn Platform>,
        supervisor: Arc<dyn EngineSupervisor>,
        probe: Arc<dyn Readiness>,
    ) -> Result<Self> {
        let session = MountSession::new(config.mount_point.clone(), config.read_only);
        let monitor_interval = config.monitor_interval;

        let inner = Arc::new(Inner {
            config,
            dirs,
            platform,
            server,
            provisioner: BinaryProvisioner::new(),
            supervisor,
            probe,
            session: RwLock::new(session),
            start_lock: Mutex::new(()),
            stop_lock: Mutex::new(()),
        });

        let monitor = tokio::spawn(monitor_loop(Arc::downgrade(&inner), monitor_interval));
        Ok(Self { inner, monitor })
    }

    /// Start the mount session.
    ///
    /// Any prior session is torn down first. On failure every partially
    /// allocated resource is released and the state is `Stopped`.
    pub async fn start(&self) -> Result<()> {
        self.inner.start().await
    }

    /// Stop the mount session. Safe to call unconditionally, including on
    /// a never-started or already-stopped instance.
    pub async fn stop(&self) {
        self.inner.stop().await;
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> MountState {
        self.inner.state().await
    }

    /// Live composite readiness check; `false` whenever not `Active`.
    pub async fn is_active(&self) -> bool {
        if self.inner.state().await != MountState::Active {
            return false;
        }
        match self.inner.probe_target().await {
            Some(target) => self.inner.probe.is_active(&target).await,
            None => false,
        }
    }

    /// Transfer counters; zeroed when the session is inactive or the
    /// engine cannot be queried. Never errors.
    pub async fn stats(&self) -> TransferStats {
        match self.inner.rc_client().await {
            Some(rc) => rc.core_stats().await,
            None => TransferStats::default(),
        }
    }

    /// VFS cache counters; zeroed when inactive. Never errors.
    pub async fn cache_stats(&self) -> CacheStats {
        match self.inner.rc_client().await {
            Some(rc) => rc.vfs_stats().await,
            None => CacheStats::default(),
        }
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        self.monitor.abort();
    }
}

impl Inner {
    async fn state(&self) -> MountState {
        self.session.read().await.state
    }

    async fn set_state(&self, state: MountState) {
        self.session.write().await.state = state;
    }

    async fn start(&self) -> Result<()> {
        let _serialized = self.start_lock.lock().await;
        info!(mount_point = %self.config.mount_point.display(), "starting mount session");

        // Any prior session is force-stopped; stop takes its own lock.
        self.stop().await;
        self.set_state(MountState::Starting).await;

        match self.start_pipeline().await {
            Ok(()) => {
                self.set_state(MountState::Active).await;
                info!("mount session active");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "start failed; tearing down partial session");
                self.stop().await;
                Err(e)
            }
        }
    }

    async fn start_pipeline(&self) -> Result<()> {
        // 1. Platform prerequisites, before anything is allocated.
        if !self.platform.driver_installed().await {
            if !self.config.try_install_driver {
                return Err(MountError::DriverMissing(
                    "platform mount driver is not installed".into(),
                ));
            }
            self.platform
                .install_driver(&self.provisioner, &self.dirs.bin_dir())
                .await?;
            if !self.platform.driver_installed().await {
                return Err(MountError::DriverMissing(
                    "mount driver still missing after installation".into(),
                ));
            }
        }

        // 2. Mount target validation.
        self.platform.validate_mount_point(&self.config.mount_point)?;

        // 3. Engine binary, provisioned on first use.
        let engine = self
            .provisioner
            .ensure(&engine_descriptor(&self.dirs.bin_dir())?)
            .await?;

        // 4. Session resources: ports and fresh credentials.
        let ports = ports::allocate_pair()?;
        let credentials = Credentials::issue();
        {
            let mut session = self.session.write().await;
            session.dav_port = Some(ports.dav);
            session.rc_port = Some(ports.rc);
            session.credentials = Some(credentials.clone());
            session.log_file = self.config.log_file.clone();
        }

        // 5. Local file-serving endpoint.
        let addr = SocketAddr::from(([127, 0, 0, 1], ports.dav));
        self.server
            .start(addr, &credentials)
            .await
            .map_err(MountError::FileServer)?;
        debug!(%addr, "file-serving endpoint started");

        // 6. Engine connection profile, rewritten with this session's
        // credentials over a freshly reset cache directory.
        let cache_dir = self.dirs.reset_cache_dir()?;
        self.session.write().await.cache_dir = Some(cache_dir.clone());
        let obscured = obscure_password(&engine, &credentials).await?;
        let profile = render_profile(
            REMOTE_NAME,
            &format!("http://{addr}"),
            credentials.user(),
            &obscured,
        );
        write_profile(&self.dirs.profile_path(), &profile)?;

        // 7. Watchdog (once per orchestrator lifetime), then the engine.
        self.supervisor
            .ensure_watchdog(&self.config.mount_point)
            .await?;
        let options = self.mount_options(ports.rc, cache_dir);
        let cache_size = effective_cache_size(
            free_space(&options.cache_dir),
            options.cache_ceiling_bytes,
            options.reserved_bytes,
        );
        let pid = self
            .supervisor
            .spawn_engine(&engine, &options.to_args(cache_size))
            .await?;
        self.session.write().await.engine_pid = Some(pid);

        // 8. Block until the mount is verifiably live.
        let target = ProbeTarget {
            mount_point: self.config.mount_point.clone(),
            dav_port: ports.dav,
            rc_port: ports.rc,
            remote: REMOTE_NAME.to_string(),
            engine_pid: Some(pid),
        };
        if !self
            .probe
            .wait_active(&target, self.config.readiness_timeout)
            .await
        {
            return Err(MountError::ReadinessTimeout(self.config.readiness_timeout));
        }
        Ok(())
    }

    async fn stop(&self) {
        let _serialized = self.stop_lock.lock().await;
        let previous = self.state().await;
        self.set_state(MountState::Stopping).await;

        self.supervisor.teardown(&self.config.mount_point).await;
        if let Err(e) = self.server.stop().await {
            debug!(error = %e, "file-serving endpoint stop failed");
        }
        self.session.write().await.clear();

        if previous != MountState::Stopped {
            info!("mount session stopped");
        }
    }

    async fn probe_target(&self) -> Option<ProbeTarget> {
        let session = self.session.read().await;
        Some(ProbeTarget {
            mount_point: session.mount_point.clone(),
            dav_port: session.dav_port?,
            rc_port: session.rc_port?,
            remote: REMOTE_NAME.to_string(),
            engine_pid: session.engine_pid,
        })
    }

    async fn rc_client(&self) -> Option<RcClient> {
        let session = self.session.read().await;
        if session.state != MountState::Active {
            return None;
        }
        session.rc_port.map(RcClient::new)
    }

    fn mount_options(&self, rc_port: u16, cache_dir: PathBuf) -> MountOptions {
        MountOptions {
            remote: REMOTE_NAME.to_string(),
            mount_point: self.config.mount_point.clone(),
            profile_path: self.dirs.profile_path(),
            cache_dir,
            cache_mode: self.config.cache_mode,
            cache_ceiling_bytes: self.config.cache_ceiling_bytes,
            reserved_bytes: self.config.reserved_bytes,
            cache_max_age: self.config.cache_max_age.clone(),
            poll_interval: self.config.poll_interval.clone(),
            dir_cache_time: self.config.dir_cache_time.clone(),
            read_only: self.config.read_only,
            rc_port,
            volume_name: self.config.volume_name.clone(),
            log_file: self.config.log_file.clone(),
            exclusions: self
                .platform
                .junk_exclusions()
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

/// Self-healing monitor: while `Active`, re-probe readiness and stop the
/// session on failure. Holds only a weak reference so it dies with the
/// controller, and never lets an error escape its loop.
async fn monitor_loop(inner: Weak<Inner>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.state().await != MountState::Active {
            continue;
        }
        let Some(target) = inner.probe_target().await else {
            continue;
        };
        if !inner.probe.is_active(&target).await {
            warn!("readiness lost while active; stopping session");
            inner.stop().await;
        }
    }
}
