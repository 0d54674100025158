//! Error taxonomy for the mount orchestrator
//!
//! Every failure that can abort a `start` is a variant here. Cleanup is
//! deliberately infallible: teardown logs and swallows its own failures so
//! one dead component cannot block the rest (see `supervisor::teardown`).

use std::path::PathBuf;
use std::time::Duration;

/// Errors surfaced by the mount lifecycle
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    /// The platform mount driver (WinFsp, FUSE, macFUSE) is not installed
    #[error("mount driver not installed: {0}")]
    DriverMissing(String),

    /// Driver installation was attempted and failed
    #[error("mount driver installation failed: {0}")]
    DriverInstall(String),

    /// No engine binary is published for this OS/architecture pair
    #[error("no engine binary available for {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// The mount point does not exist
    #[error("mount point does not exist: {0}")]
    MountPointMissing(PathBuf),

    /// The mount point exists but is not a directory
    #[error("mount point is not a directory: {0}")]
    MountPointNotADirectory(PathBuf),

    /// The mount point directory is not empty
    #[error("mount point is not empty: {0}")]
    MountPointNotEmpty(PathBuf),

    /// The mount point escapes the user's home hierarchy
    #[error("mount point is outside the home directory: {0}")]
    MountPointOutsideHome(PathBuf),

    /// The requested drive letter is already in use
    #[error("drive letter already in use: {0}:")]
    DriveLetterTaken(char),

    /// The drive-letter mount target could not be parsed
    #[error("invalid drive specification: {0}")]
    InvalidDriveSpec(String),

    /// No per-user data directory could be resolved
    #[error("no usable application data directory on this system")]
    NoDataDir,

    /// Engine binary download failed
    #[error("engine download failed: {0}")]
    Download(#[from] reqwest::Error),

    /// Downloaded content did not match the pinned hash; nothing was installed
    #[error("hash mismatch for {name}: expected {expected}, got {actual}")]
    HashMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// The engine's credential obscure subcommand failed
    #[error("credential obscure failed: {0}")]
    Obscure(String),

    /// The engine or watchdog process could not be launched
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    /// The engine launched but exited before becoming ready
    #[error("engine process exited immediately after launch")]
    EngineExited,

    /// The engine never became verifiably active within the deadline
    #[error("mount did not become ready within {0:?}")]
    ReadinessTimeout(Duration),

    /// The embedder's file-serving endpoint failed to start or stop
    #[error("file server error: {0}")]
    FileServer(anyhow::Error),

    /// Filesystem or pipe I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MountError>;
