//! Platform adapter
//!
//! All platform-conditional behavior sits behind one trait: mount-point
//! validation, mount-driver probing and installation, unmount policy,
//! mounted-filesystem listing, junk-file exclusions, and the engine's
//! process image name. One implementation per platform family, selected
//! once at controller construction. Tests inject their own implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{MountError, Result};
use crate::provision::BinaryProvisioner;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(windows)]
mod windows;

/// Platform-specific capabilities consumed by the orchestrator
#[async_trait]
pub trait Platform: Send + Sync {
    /// Process image name of the engine binary, used for kill-by-name
    /// fallback and the watchdog.
    fn engine_image_name(&self) -> String;

    /// Glob patterns for OS junk files excluded from the mount.
    fn junk_exclusions(&self) -> &'static [&'static str];

    /// Validate the mount target before any resource is allocated.
    fn validate_mount_point(&self, path: &Path) -> Result<()>;

    /// Probe whether the platform mount driver is present. Unexpected I/O
    /// errors are reported as "not installed", never raised.
    async fn driver_installed(&self) -> bool;

    /// Attempt privileged installation of the mount driver.
    async fn install_driver(&self, provisioner: &BinaryProvisioner, bin_dir: &Path) -> Result<()>;

    /// Whether the path is currently listed among mounted filesystems of
    /// the expected type.
    async fn is_mounted(&self, path: &Path) -> bool;

    /// Force-unmount the path. Best-effort; failures are logged by the
    /// caller's teardown, never propagated.
    async fn unmount(&self, path: &Path);

    /// Kill any engine process by image name. Best-effort fallback for
    /// when the tracked handle is stale or absent.
    async fn kill_engine_by_name(&self);
}

/// The adapter for the platform this binary was compiled for.
pub fn current() -> Arc<dyn Platform> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(linux::Linux)
    }
    #[cfg(target_os = "macos")]
    {
        Arc::new(macos::MacOs)
    }
    #[cfg(windows)]
    {
        Arc::new(windows::Windows)
    }
}

/// POSIX mount-point rules: the directory must exist, be empty, and
/// resolve to somewhere under the user's home hierarchy. Canonicalization
/// defeats `..` and symlink escapes.
pub(crate) fn validate_posix_mount_point(path: &Path, home: &Path) -> Result<()> {
    if !path.exists() {
        return Err(MountError::MountPointMissing(path.to_path_buf()));
    }
    if !path.is_dir() {
        return Err(MountError::MountPointNotADirectory(path.to_path_buf()));
    }
    if std::fs::read_dir(path)?.next().is_some() {
        return Err(MountError::MountPointNotEmpty(path.to_path_buf()));
    }
    let canonical = path.canonicalize()?;
    let home = home.canonicalize().unwrap_or_else(|_| home.to_path_buf());
    if !canonical.starts_with(&home) {
        return Err(MountError::MountPointOutsideHome(path.to_path_buf()));
    }
    Ok(())
}

/// Parse a dotted version out of a FUSE library filename, e.g.
/// `libfuse.2.9.9.dylib` becomes `(2, 9, 9)`. Missing components default
/// to 0.
#[allow(dead_code)]
pub(crate) fn parse_fuse_library_version(filename: &str) -> Option<(u32, u32, u32)> {
    let re = regex::Regex::new(r"^libfuse(?:-t)?\.(\d+)(?:\.(\d+))?(?:\.(\d+))?\.dylib$")
        .expect("static regex");
    let caps = re.captures(filename)?;
    let part = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0)
    };
    Some((part(1), part(2), part(3)))
}

/// Pick the drive letter out of a Windows-style mount target (`X:` or
/// `X:\`), returning the letter and the root path to probe.
#[allow(dead_code)]
pub(crate) fn parse_drive_spec(path: &Path) -> Result<(char, PathBuf)> {
    let spec = path.to_string_lossy();
    let mut chars = spec.chars();
    let letter = chars
        .next()
        .filter(|c| c.is_ascii_alphabetic())
        .ok_or_else(|| MountError::InvalidDriveSpec(spec.to_string()))?;
    let rest: String = chars.collect();
    if rest != ":" && rest != ":\\" && rest != ":/" {
        return Err(MountError::InvalidDriveSpec(spec.to_string()));
    }
    Ok((
        letter.to_ascii_uppercase(),
        PathBuf::from(format!("{}:\\", letter.to_ascii_uppercase())),
    ))
}
