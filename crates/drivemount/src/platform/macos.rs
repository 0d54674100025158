//! macOS platform adapter: macFUSE probing, diskutil unmount fallback

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{MountError, Result};
use crate::provision::{engine_binary_name, BinaryDescriptor, BinaryProvisioner};

use super::{parse_fuse_library_version, validate_posix_mount_point, Platform};

const JUNK_EXCLUSIONS: &[&str] = &[
    ".DS_Store",
    "._*",
    ".Spotlight-V100/**",
    ".Trashes/**",
    ".fseventsd/**",
    ".TemporaryItems/**",
];

/// Directory scanned for FUSE user-space libraries
const FUSE_LIB_DIR: &str = "/usr/local/lib";

/// Oldest macFUSE library version the engine is known to work with
const MIN_FUSE_VERSION: (u32, u32, u32) = (2, 9, 0);

const INSTALLER_NAME: &str = "macfuse.pkg";
const INSTALLER_SHA256: &str =
    "b8df6b5543ef09e1b0f0aaa723b66137b0b574eebf4fea67201c5c5bd28abb75";
const INSTALLER_URL: &str = "https://cdn.drivemount.io/engine/deps/macfuse-4.8.2.pkg";

pub struct MacOs;

#[async_trait]
impl Platform for MacOs {
    fn engine_image_name(&self) -> String {
        engine_binary_name().unwrap_or("rclone").to_string()
    }

    fn junk_exclusions(&self) -> &'static [&'static str] {
        JUNK_EXCLUSIONS
    }

    fn validate_mount_point(&self, path: &Path) -> Result<()> {
        let home = dirs::home_dir().ok_or(MountError::NoDataDir)?;
        validate_posix_mount_point(path, &home)
    }

    async fn driver_installed(&self) -> bool {
        // The installed library carries its version in the filename; take
        // the newest and compare numerically.
        let Ok(mut entries) = tokio::fs::read_dir(FUSE_LIB_DIR).await else {
            return false;
        };
        let mut newest: Option<(u32, u32, u32)> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if let Some(version) = parse_fuse_library_version(&name.to_string_lossy()) {
                newest = Some(newest.map_or(version, |v| v.max(version)));
            }
        }
        match newest {
            Some(version) => version >= MIN_FUSE_VERSION,
            None => false,
        }
    }

    async fn install_driver(&self, provisioner: &BinaryProvisioner, bin_dir: &Path) -> Result<()> {
        let descriptor = BinaryDescriptor::new(
            INSTALLER_NAME,
            INSTALLER_URL.to_string(),
            INSTALLER_SHA256,
            bin_dir,
        );
        let pkg = provisioner.ensure(&descriptor).await?;

        info!(pkg = %pkg.display(), "running macFUSE installer with elevation");
        let script = format!(
            "do shell script \"installer -pkg '{}' -target /\" with administrator privileges",
            pkg.display()
        );
        let output = Command::new("osascript")
            .args(["-e", &script])
            .output()
            .await
            .map_err(MountError::Spawn)?;

        // installer(8) prints "The install was successful." even when the
        // exit status is unreliable through osascript.
        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() || stdout.to_lowercase().contains("successful") {
            Ok(())
        } else {
            Err(MountError::DriverInstall(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn is_mounted(&self, path: &Path) -> bool {
        let Ok(output) = Command::new("mount").output().await else {
            return false;
        };
        mount_output_lists(&String::from_utf8_lossy(&output.stdout), path)
    }

    async fn unmount(&self, path: &Path) {
        let forced = Command::new("umount").arg("-f").arg(path).status().await;
        if matches!(forced, Ok(s) if s.success()) {
            debug!(path = %path.display(), "umount -f unmounted path");
            return;
        }
        if let Err(e) = Command::new("diskutil")
            .args(["unmount", "force"])
            .arg(path)
            .status()
            .await
        {
            warn!(path = %path.display(), error = %e, "diskutil unmount failed");
        }
    }

    async fn kill_engine_by_name(&self) {
        let image = self.engine_image_name();
        if let Err(e) = Command::new("pkill").args(["-f", &image]).status().await {
            warn!(image = %image, error = %e, "pkill failed");
        }
    }
}

/// Does `mount(8)` output list `path` as a fuse-type mount?
fn mount_output_lists(output: &str, path: &Path) -> bool {
    let needle = format!(" on {} (", path.to_string_lossy());
    output
        .lines()
        .any(|line| line.contains(&needle) && line.contains("fuse"))
}
