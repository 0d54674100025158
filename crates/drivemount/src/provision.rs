//! Hash-pinned binary provisioning
//!
//! The engine (and, on some platforms, the mount-driver installer) is
//! downloaded on first use, verified against a pinned SHA-256, and renamed
//! into place atomically. A mismatched download is discarded and never
//! reaches the install path. Concurrent callers serialize on one mutex so
//! first use triggers exactly one download.

use std::io::Write;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{MountError, Result};

/// Pinned engine release
pub const ENGINE_VERSION: &str = "1.67.0";

/// Base URL for published engine and installer binaries
const DOWNLOAD_BASE: &str = "https://cdn.drivemount.io/engine";

const SHA256_LINUX_AMD64: &str =
    "05980a1f29b3e20357e44ada9492d9cec95e825e28c9b23b860c85185a067d23";
const SHA256_LINUX_ARM64: &str =
    "5b24b8761f0afe1f11c45011eb9b4c1ffd027c14bbe9720c214ea34051c29942";
const SHA256_MACOS_AMD64: &str =
    "0e2066280c4ca586f50d3343c9ad64deb058dcd06667aca2fa7c2c8e60c184e4";
const SHA256_MACOS_ARM64: &str =
    "46ca0bb6d0fbdc7b88ae35846e505a9e83dd61e8fec1077d0c53e3517cf2220e";
const SHA256_WINDOWS_AMD64: &str =
    "76ff3a97df6690085ab4c09f3d03759f1a7e653e018909e1127c27c91ea634b1";

/// One downloadable, hash-pinned binary
#[derive(Debug, Clone)]
pub struct BinaryDescriptor {
    /// Platform-qualified binary name
    pub name: String,
    /// Source URL
    pub url: String,
    /// Expected SHA-256 of the full content, lowercase hex
    pub sha256: String,
    /// Final install path
    pub install_path: PathBuf,
}

impl BinaryDescriptor {
    pub fn new(name: &str, url: String, sha256: &str, install_dir: &Path) -> Self {
        Self {
            name: name.to_string(),
            url,
            sha256: sha256.to_ascii_lowercase(),
            install_path: install_dir.join(name),
        }
    }
}

/// Engine binary name for the current OS/architecture, if one is published.
pub fn engine_binary_name() -> Option<&'static str> {
    engine_entry().map(|(name, _)| name)
}

fn engine_entry() -> Option<(&'static str, &'static str)> {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("linux", "x86_64") => Some(("rclone-linux-amd64", SHA256_LINUX_AMD64)),
        ("linux", "aarch64") => Some(("rclone-linux-arm64", SHA256_LINUX_ARM64)),
        ("macos", "x86_64") => Some(("rclone-macos-amd64", SHA256_MACOS_AMD64)),
        ("macos", "aarch64") => Some(("rclone-macos-arm64", SHA256_MACOS_ARM64)),
        ("windows", "x86_64") => Some(("rclone-windows-amd64.exe", SHA256_WINDOWS_AMD64)),
        _ => None,
    }
}

/// Descriptor for the transfer engine on the current OS/architecture.
pub fn engine_descriptor(bin_dir: &Path) -> Result<BinaryDescriptor> {
    let (name, sha256) = engine_entry().ok_or_else(|| MountError::UnsupportedPlatform {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
    })?;
    let url = format!("{DOWNLOAD_BASE}/v{ENGINE_VERSION}/{name}");
    Ok(BinaryDescriptor::new(name, url, sha256, bin_dir))
}

/// Downloads and verifies binaries described by a [`BinaryDescriptor`]
pub struct BinaryProvisioner {
    client: reqwest::Client,
    lock: Mutex<()>,
}

impl BinaryProvisioner {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            lock: Mutex::new(()),
        }
    }

    /// Ensure the described binary exists at its install path, downloading
    /// and verifying it on first use. Returns the install path.
    pub async fn ensure(&self, descriptor: &BinaryDescriptor) -> Result<PathBuf> {
        let _guard = self.lock.lock().await;

        if descriptor.install_path.is_file() {
            debug!(binary = %descriptor.name, "binary already provisioned");
            return Ok(descriptor.install_path.clone());
        }

        let dir = descriptor.install_path.parent().ok_or_else(|| {
            MountError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "install path has no parent directory",
            ))
        })?;
        std::fs::create_dir_all(dir)?;

        info!(binary = %descriptor.name, url = %descriptor.url, "downloading binary");
        let response = self
            .client
            .get(&descriptor.url)
            .send()
            .await?
            .error_for_status()?;

        // Stream into a temp file beside the target so the final rename
        // stays on one filesystem.
        let mut tmp = NamedTempFile::new_in(dir)?;
        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            tmp.write_all(&chunk)?;
        }
        tmp.flush()?;

        let actual = hex::encode(hasher.finalize());
        if actual != descriptor.sha256 {
            // Dropping the temp file removes it; the install path was never
            // touched.
            return Err(MountError::HashMismatch {
                name: descriptor.name.clone(),
                expected: descriptor.sha256.clone(),
                actual,
            });
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o755))?;
        }

        tmp.persist(&descriptor.install_path)
            .map_err(|e| MountError::Io(e.error))?;
        info!(path = %descriptor.install_path.display(), "binary installed");
        Ok(descriptor.install_path.clone())
    }
}

impl Default for BinaryProvisioner {
    fn default() -> Self {
        Self::new()
    }
}
