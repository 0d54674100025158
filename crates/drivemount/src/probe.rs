//! Composite readiness probing
//!
//! "Mounted" means more than "process exists": the mount path must be
//! visible on the filesystem, the file-serving endpoint must answer with
//! its auth challenge, and the engine must list the remote on its rc
//! interface. The three checks run concurrently; any failure marks the
//! mount not active. During startup the rc listing is mandatory, since a
//! freshly spawned engine that has not mounted anything still has a live
//! pid and an empty (pre-validated) mount directory. Once a session is
//! established, steady-state re-probing accepts process liveness in place
//! of the rc listing so a momentarily busy rc interface does not tear a
//! healthy session down.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::rc::RcClient;
use crate::supervisor::pid_is_alive;

const HTTP_TIMEOUT: Duration = Duration::from_secs(2);

/// How often the startup wait re-probes.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Everything one readiness check needs to know about the session
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub mount_point: PathBuf,
    pub dav_port: u16,
    pub rc_port: u16,
    /// Remote name expected in the engine's vfs listing
    pub remote: String,
    /// Engine pid for the process-liveness fallback
    pub engine_pid: Option<u32>,
}

/// Readiness signal as seen by the lifecycle controller.
///
/// Implemented by [`ReadinessProbe`]; tests substitute their own.
#[async_trait]
pub trait Readiness: Send + Sync {
    /// Steady-state check for an established session.
    async fn is_active(&self, target: &ProbeTarget) -> bool;

    /// Startup wait: block until the mount is verifiably live or the
    /// deadline elapses.
    async fn wait_active(&self, target: &ProbeTarget, deadline: Duration) -> bool;
}

/// Polls the independent readiness signals
pub struct ReadinessProbe {
    client: reqwest::Client,
}

impl ReadinessProbe {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// One composite check. All signals must pass. The pid-alive fallback
    /// for the engine signal only applies when `allow_pid_fallback` is set.
    async fn check(&self, target: &ProbeTarget, allow_pid_fallback: bool) -> bool {
        let (path_ok, dav_ok, engine_ok) = tokio::join!(
            self.mount_path_visible(target),
            self.dav_answers(target),
            self.engine_active(target, allow_pid_fallback),
        );
        trace!(path_ok, dav_ok, engine_ok, "readiness probe");
        path_ok && dav_ok && engine_ok
    }

    async fn mount_path_visible(&self, target: &ProbeTarget) -> bool {
        tokio::fs::metadata(&target.mount_point).await.is_ok()
    }

    /// The endpoint is up when it challenges for credentials.
    async fn dav_answers(&self, target: &ProbeTarget) -> bool {
        let url = format!("http://127.0.0.1:{}/", target.dav_port);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status() == reqwest::StatusCode::UNAUTHORIZED,
            Err(_) => false,
        }
    }

    /// The rc listing is authoritative. Process liveness stands in only
    /// when allowed, for steady-state re-probing.
    async fn engine_active(&self, target: &ProbeTarget, allow_pid_fallback: bool) -> bool {
        let prefix = format!("{}:", target.remote);
        let listed = RcClient::new(target.rc_port)
            .vfs_list()
            .await
            .iter()
            .any(|name| name.starts_with(&prefix));
        if listed {
            return true;
        }
        allow_pid_fallback && target.engine_pid.is_some_and(pid_is_alive)
    }
}

#[async_trait]
impl Readiness for ReadinessProbe {
    async fn is_active(&self, target: &ProbeTarget) -> bool {
        self.check(target, true).await
    }

    /// Re-probe on a fixed interval until `deadline` elapses. A final
    /// probe runs after the deadline so an interval-boundary race cannot
    /// produce a false negative. The rc listing is required here: a live
    /// engine pid alone never satisfies the startup wait.
    async fn wait_active(&self, target: &ProbeTarget, deadline: Duration) -> bool {
        let wait = async {
            loop {
                if self.check(target, false).await {
                    return;
                }
                tokio::time::sleep(PROBE_INTERVAL).await;
            }
        };
        if tokio::time::timeout(deadline, wait).await.is_ok() {
            return true;
        }
        debug!(?deadline, "readiness deadline elapsed; final probe");
        self.check(target, false).await
    }
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self::new()
    }
}
