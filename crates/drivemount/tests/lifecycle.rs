//! Integration tests for the mount lifecycle controller
//!
//! These exercise the start/stop state machine with a stub platform
//! adapter and a stub file server, without spawning a real engine or
//! requiring mount privileges.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use drivemount::platform::Platform;
use drivemount::probe::{ProbeTarget, Readiness};
use drivemount::provision::{engine_binary_name, BinaryProvisioner};
use drivemount::supervisor::EngineSupervisor;
use drivemount::{
    CacheStats, Credentials, FileServer, LifecycleController, MountConfig, MountError, MountState,
    TransferStats,
};

fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct StubPlatform {
    driver_installed: AtomicBool,
    validations: AtomicUsize,
}

impl StubPlatform {
    fn new(driver_installed: bool) -> Arc<Self> {
        Arc::new(Self {
            driver_installed: AtomicBool::new(driver_installed),
            validations: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Platform for StubPlatform {
    fn engine_image_name(&self) -> String {
        "drivemount-test-engine".to_string()
    }

    fn junk_exclusions(&self) -> &'static [&'static str] {
        &[]
    }

    fn validate_mount_point(&self, path: &Path) -> drivemount::Result<()> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        if !path.exists() {
            return Err(MountError::MountPointMissing(path.to_path_buf()));
        }
        if !path.is_dir() {
            return Err(MountError::MountPointNotADirectory(path.to_path_buf()));
        }
        if std::fs::read_dir(path).unwrap().next().is_some() {
            return Err(MountError::MountPointNotEmpty(path.to_path_buf()));
        }
        Ok(())
    }

    async fn driver_installed(&self) -> bool {
        self.driver_installed.load(Ordering::SeqCst)
    }

    async fn install_driver(
        &self,
        _provisioner: &BinaryProvisioner,
        _bin_dir: &Path,
    ) -> drivemount::Result<()> {
        self.driver_installed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_mounted(&self, _path: &Path) -> bool {
        false
    }

    async fn unmount(&self, _path: &Path) {}

    async fn kill_engine_by_name(&self) {}
}

#[derive(Default)]
struct StubServer {
    starts: AtomicUsize,
    stops: AtomicUsize,
    credentials_seen: Mutex<Vec<Credentials>>,
}

#[async_trait]
impl FileServer for StubServer {
    async fn start(
        &self,
        _addr: std::net::SocketAddr,
        credentials: &Credentials,
    ) -> anyhow::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.credentials_seen.lock().unwrap().push(credentials.clone());
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct StubSupervisor {
    spawns: AtomicUsize,
    teardowns: AtomicUsize,
    engine_alive: AtomicBool,
}

#[async_trait]
impl EngineSupervisor for StubSupervisor {
    async fn spawn_engine(&self, _binary: &Path, _argv: &[String]) -> drivemount::Result<u32> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        self.engine_alive.store(true, Ordering::SeqCst);
        Ok(4242)
    }

    async fn engine_pid(&self) -> Option<u32> {
        self.engine_alive.load(Ordering::SeqCst).then_some(4242)
    }

    async fn ensure_watchdog(&self, _mount_point: &Path) -> drivemount::Result<u32> {
        Ok(1)
    }

    async fn teardown(&self, _mount_point: &Path) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        self.engine_alive.store(false, Ordering::SeqCst);
    }
}

struct StubReadiness {
    ready: AtomicBool,
}

impl StubReadiness {
    fn new(ready: bool) -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(ready),
        })
    }
}

#[async_trait]
impl Readiness for StubReadiness {
    async fn is_active(&self, _target: &ProbeTarget) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn wait_active(&self, target: &ProbeTarget, _deadline: Duration) -> bool {
        self.is_active(target).await
    }
}

/// A stand-in engine binary at the provisioned install path. Echoing stdin
/// back satisfies the `obscure -` invocation, and the pre-existing file
/// keeps the provisioner from downloading anything.
#[cfg(unix)]
fn install_fake_engine(data_root: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let bin_dir = data_root.join("bin");
    std::fs::create_dir_all(&bin_dir).unwrap();
    let path = bin_dir.join(engine_binary_name().unwrap());
    std::fs::write(&path, "#!/bin/sh\ncat\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn test_config(data_root: &TempDir, mount_point: PathBuf) -> MountConfig {
    let mut config = MountConfig::new(mount_point);
    config.data_dir = Some(data_root.path().join("state"));
    config
}

#[tokio::test]
async fn stop_on_fresh_instance_is_a_noop() {
    let data = TempDir::new().unwrap();
    let config = test_config(&data, data.path().join("drive"));
    let server = Arc::new(StubServer::default());
    let controller =
        LifecycleController::with_platform(config, server.clone(), StubPlatform::new(true))
            .unwrap();

    assert_eq!(controller.state().await, MountState::Stopped);
    controller.stop().await;
    assert_eq!(controller.state().await, MountState::Stopped);
    controller.stop().await;
    assert_eq!(controller.state().await, MountState::Stopped);
}

#[tokio::test]
async fn start_with_missing_mount_point_fails_cleanly() {
    let data = TempDir::new().unwrap();
    let mount_point = data.path().join("drive");
    let config = test_config(&data, mount_point.clone());
    let server = Arc::new(StubServer::default());
    let controller =
        LifecycleController::with_platform(config, server.clone(), StubPlatform::new(true))
            .unwrap();

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, MountError::MountPointMissing(p) if p == mount_point));
    assert_eq!(controller.state().await, MountState::Stopped);
    // Validation aborts the start before the file server is touched.
    assert_eq!(server.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn start_with_non_empty_mount_point_fails_cleanly() {
    let data = TempDir::new().unwrap();
    let mount_point = data.path().join("drive");
    std::fs::create_dir(&mount_point).unwrap();
    std::fs::write(mount_point.join("occupied"), b"x").unwrap();

    let config = test_config(&data, mount_point);
    let server = Arc::new(StubServer::default());
    let controller =
        LifecycleController::with_platform(config, server.clone(), StubPlatform::new(true))
            .unwrap();

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, MountError::MountPointNotEmpty(_)));
    assert_eq!(controller.state().await, MountState::Stopped);
    assert_eq!(server.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_driver_aborts_before_validation() {
    let data = TempDir::new().unwrap();
    let config = test_config(&data, data.path().join("drive"));
    let server = Arc::new(StubServer::default());
    let platform = StubPlatform::new(false);
    let controller =
        LifecycleController::with_platform(config, server, platform.clone()).unwrap();

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, MountError::DriverMissing(_)));
    assert_eq!(controller.state().await, MountState::Stopped);
    // Prerequisite errors are reported before the mount target is looked at.
    assert_eq!(platform.validations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn driver_install_is_attempted_when_enabled() {
    let data = TempDir::new().unwrap();
    let mut config = test_config(&data, data.path().join("drive"));
    config.try_install_driver = true;
    let server = Arc::new(StubServer::default());
    let platform = StubPlatform::new(false);
    let controller =
        LifecycleController::with_platform(config, server, platform.clone()).unwrap();

    // The stub installer succeeds, so the pipeline reaches validation and
    // fails there instead of on the prerequisite.
    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, MountError::MountPointMissing(_)));
    assert!(platform.driver_installed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn stats_on_stopped_session_are_zeroed() {
    let data = TempDir::new().unwrap();
    let config = test_config(&data, data.path().join("drive"));
    let server = Arc::new(StubServer::default());
    let controller =
        LifecycleController::with_platform(config, server, StubPlatform::new(true)).unwrap();

    assert_eq!(controller.stats().await, TransferStats::default());
    assert_eq!(controller.cache_stats().await, CacheStats::default());
    assert!(!controller.is_active().await);
}

#[tokio::test]
async fn failed_start_always_stops_the_file_server() {
    // The mount point exists but contains a file, so start fails after the
    // unconditional stop has already run once.
    let data = TempDir::new().unwrap();
    let mount_point = data.path().join("drive");
    std::fs::create_dir(&mount_point).unwrap();
    std::fs::write(mount_point.join("occupied"), b"x").unwrap();

    let config = test_config(&data, mount_point);
    let server = Arc::new(StubServer::default());
    let controller =
        LifecycleController::with_platform(config, server.clone(), StubPlatform::new(true))
            .unwrap();

    let _ = controller.start().await;
    // One stop at the top of start, one recovering from the failure.
    assert!(server.stops.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn concurrent_starts_are_serialized() {
    let data = TempDir::new().unwrap();
    let config = test_config(&data, data.path().join("drive"));
    let server = Arc::new(StubServer::default());
    let controller = Arc::new(
        LifecycleController::with_platform(config, server, StubPlatform::new(true)).unwrap(),
    );

    let a = {
        let c = controller.clone();
        tokio::spawn(async move { c.start().await })
    };
    let b = {
        let c = controller.clone();
        tokio::spawn(async move { c.start().await })
    };

    // Both fail on the missing mount point; neither panics or deadlocks,
    // and the final state is Stopped.
    assert!(a.await.unwrap().is_err());
    assert!(b.await.unwrap().is_err());
    assert_eq!(controller.state().await, MountState::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn out_of_band_engine_death_is_detected_by_the_monitor() {
    init_logging();
    let data = TempDir::new().unwrap();
    let mount_point = data.path().join("drive");
    std::fs::create_dir(&mount_point).unwrap();
    let mut config = test_config(&data, mount_point);
    config.monitor_interval = Duration::from_millis(50);
    install_fake_engine(&data.path().join("state"));

    let server = Arc::new(StubServer::default());
    let supervisor = Arc::new(StubSupervisor::default());
    let readiness = StubReadiness::new(true);
    let controller = LifecycleController::with_components(
        config,
        server,
        StubPlatform::new(true),
        supervisor.clone(),
        readiness.clone(),
    )
    .unwrap();

    controller.start().await.unwrap();
    assert_eq!(controller.state().await, MountState::Active);
    let teardowns_after_start = supervisor.teardowns.load(Ordering::SeqCst);

    // The engine dies behind the controller's back; the next probe fails
    // and the monitor stops the session.
    readiness.ready.store(false, Ordering::SeqCst);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while controller.state().await != MountState::Stopped {
        assert!(
            tokio::time::Instant::now() < deadline,
            "monitor never stopped the session"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(supervisor.teardowns.load(Ordering::SeqCst) > teardowns_after_start);
}

#[cfg(unix)]
#[tokio::test]
async fn readiness_timeout_rolls_back_the_start() {
    init_logging();
    let data = TempDir::new().unwrap();
    let mount_point = data.path().join("drive");
    std::fs::create_dir(&mount_point).unwrap();
    let mut config = test_config(&data, mount_point);
    config.readiness_timeout = Duration::from_millis(100);
    install_fake_engine(&data.path().join("state"));

    let server = Arc::new(StubServer::default());
    let supervisor = Arc::new(StubSupervisor::default());
    let controller = LifecycleController::with_components(
        config,
        server.clone(),
        StubPlatform::new(true),
        supervisor.clone(),
        StubReadiness::new(false),
    )
    .unwrap();

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, MountError::ReadinessTimeout(_)));
    assert_eq!(controller.state().await, MountState::Stopped);
    // The engine was spawned and then torn back down.
    assert_eq!(supervisor.spawns.load(Ordering::SeqCst), 1);
    assert!(supervisor.teardowns.load(Ordering::SeqCst) >= 1);
    assert!(server.stops.load(Ordering::SeqCst) >= 2);
}

#[cfg(unix)]
#[tokio::test]
async fn second_start_issues_fresh_credentials() {
    init_logging();
    let data = TempDir::new().unwrap();
    let mount_point = data.path().join("drive");
    std::fs::create_dir(&mount_point).unwrap();
    let config = test_config(&data, mount_point);
    install_fake_engine(&data.path().join("state"));

    let server = Arc::new(StubServer::default());
    let controller = LifecycleController::with_components(
        config,
        server.clone(),
        StubPlatform::new(true),
        Arc::new(StubSupervisor::default()),
        StubReadiness::new(true),
    )
    .unwrap();

    controller.start().await.unwrap();
    controller.start().await.unwrap();
    assert_eq!(controller.state().await, MountState::Active);

    let seen = server.credentials_seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_ne!(seen[0], seen[1]);
    drop(seen);
    controller.stop().await;
    assert_eq!(controller.state().await, MountState::Stopped);
}
