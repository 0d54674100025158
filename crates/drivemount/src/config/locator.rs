//! Platform data directory resolution
//!
//! All orchestrator state lives under one per-user directory: cached
//! binaries, the generated connection profile, watchdog scripts, the VFS
//! cache, and engine logs. The cache directory is owned by the current
//! session and is wiped on every start.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::error::{MountError, Result};

/// Resolved per-user directories for orchestrator state
#[derive(Debug, Clone)]
pub struct AppDirs {
    root: PathBuf,
}

impl AppDirs {
    /// Resolve the platform-conventional data directory and create the
    /// subdirectory layout.
    pub fn resolve() -> Result<Self> {
        let dirs = ProjectDirs::from("io", "drivemount", "drivemount")
            .ok_or(MountError::NoDataDir)?;
        Self::at(dirs.data_local_dir().to_path_buf())
    }

    /// Root all orchestrator state under an explicit directory.
    pub fn at(root: PathBuf) -> Result<Self> {
        let dirs = Self { root };
        for dir in [
            dirs.bin_dir(),
            dirs.scripts_dir(),
            dirs.cache_dir(),
            dirs.logs_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(dirs)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cached engine and installer binaries
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    /// Materialized watchdog scripts
    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("scripts")
    }

    /// Engine VFS cache; wiped and recreated on every start
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Engine log files
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Generated engine connection profile
    pub fn profile_path(&self) -> PathBuf {
        self.root.join("rclone.conf")
    }

    /// Clear and recreate the VFS cache directory.
    ///
    /// The cache belongs to exactly one session; stale entries from a prior
    /// run must not leak into a new mount.
    pub fn reset_cache_dir(&self) -> Result<PathBuf> {
        let cache = self.cache_dir();
        if cache.exists() {
            fs::remove_dir_all(&cache)?;
        }
        fs::create_dir_all(&cache)?;
        Ok(cache)
    }
}
