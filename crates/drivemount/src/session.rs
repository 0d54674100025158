//! The single mount session aggregate
//!
//! One `MountSession` exists per orchestrator. It is mutated only inside
//! `start`/`stop` under the controller's locks, and is never shared across
//! processes or persisted: every run begins with a fresh session.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::credentials::Credentials;

/// Lifecycle state of the mount session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountState {
    Stopped,
    Starting,
    Active,
    Stopping,
}

/// The mutable aggregate owned by the [`crate::LifecycleController`]
#[derive(Debug)]
pub struct MountSession {
    pub state: MountState,
    pub mount_point: PathBuf,
    pub read_only: bool,
    /// Port of the local file-serving endpoint
    pub dav_port: Option<u16>,
    /// Port of the engine's remote-control listener
    pub rc_port: Option<u16>,
    pub credentials: Option<Credentials>,
    pub cache_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub engine_pid: Option<u32>,
}

impl MountSession {
    pub fn new(mount_point: PathBuf, read_only: bool) -> Self {
        Self {
            state: MountState::Stopped,
            mount_point,
            read_only,
            dav_port: None,
            rc_port: None,
            credentials: None,
            cache_dir: None,
            log_file: None,
            engine_pid: None,
        }
    }

    /// Drop all per-session resources and return to `Stopped`. The mount
    /// point and read-only flag are configuration, not session state, and
    /// survive.
    pub fn clear(&mut self) {
        self.state = MountState::Stopped;
        self.dav_port = None;
        self.rc_port = None;
        self.credentials = None;
        self.cache_dir = None;
        self.log_file = None;
        self.engine_pid = None;
    }
}
