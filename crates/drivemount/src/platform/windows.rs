//! Windows platform adapter: WinFsp probing, drive-letter validation

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{MountError, Result};
use crate::provision::{engine_binary_name, BinaryDescriptor, BinaryProvisioner};

use super::{parse_drive_spec, Platform};

const JUNK_EXCLUSIONS: &[&str] = &[
    "Thumbs.db",
    "desktop.ini",
    "$RECYCLE.BIN/**",
    "System Volume Information/**",
];

/// Files whose presence marks a usable WinFsp installation
const WINFSP_MARKERS: &[&str] = &[
    "C:\\Program Files (x86)\\WinFsp\\bin\\winfsp-x64.dll",
    "C:\\Program Files\\WinFsp\\bin\\winfsp-x64.dll",
];

const INSTALLER_NAME: &str = "winfsp.msi";
const INSTALLER_SHA256: &str =
    "9ffdecbb90e9ca21151870588384a0f56f1a7c7ffea13af4e5516691da69e16b";
const INSTALLER_URL: &str = "https://cdn.drivemount.io/engine/deps/winfsp-2.0.23075.msi";

pub struct Windows;

#[async_trait]
impl Platform for Windows {
    fn engine_image_name(&self) -> String {
        engine_binary_name().unwrap_or("rclone.exe").to_string()
    }

    fn junk_exclusions(&self) -> &'static [&'static str] {
        JUNK_EXCLUSIONS
    }

    fn validate_mount_point(&self, path: &Path) -> Result<()> {
        let (letter, root) = parse_drive_spec(path)?;
        if root.exists() {
            return Err(MountError::DriveLetterTaken(letter));
        }
        Ok(())
    }

    async fn driver_installed(&self) -> bool {
        WINFSP_MARKERS.iter().any(|m| Path::new(m).is_file())
    }

    async fn install_driver(&self, provisioner: &BinaryProvisioner, bin_dir: &Path) -> Result<()> {
        let descriptor = BinaryDescriptor::new(
            INSTALLER_NAME,
            INSTALLER_URL.to_string(),
            INSTALLER_SHA256,
            bin_dir,
        );
        let msi = provisioner.ensure(&descriptor).await?;

        info!(msi = %msi.display(), "running WinFsp installer");
        let output = Command::new("msiexec")
            .arg("/i")
            .arg(&msi)
            .args(["/qn", "/norestart"])
            .output()
            .await
            .map_err(MountError::Spawn)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() || stdout.to_lowercase().contains("completed successfully") {
            Ok(())
        } else {
            Err(MountError::DriverInstall(format!(
                "msiexec exited with {}",
                output.status
            )))
        }
    }

    async fn is_mounted(&self, path: &Path) -> bool {
        // The drive letter exists exactly while the engine holds the mount.
        match parse_drive_spec(path) {
            Ok((_, root)) => root.exists(),
            Err(_) => false,
        }
    }

    async fn unmount(&self, _path: &Path) {
        // No unmount command: the drive letter disappears with the engine
        // process.
    }

    async fn kill_engine_by_name(&self) {
        let image = self.engine_image_name();
        if let Err(e) = Command::new("taskkill")
            .args(["/F", "/T", "/IM", &image])
            .status()
            .await
        {
            warn!(image = %image, error = %e, "taskkill failed");
        }
    }
}
