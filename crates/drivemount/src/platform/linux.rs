//! Linux platform adapter: FUSE via fusermount, /proc/mounts listing

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MountError, Result};
use crate::provision::{engine_binary_name, BinaryProvisioner};

use super::{validate_posix_mount_point, Platform};

const JUNK_EXCLUSIONS: &[&str] = &[".Trash*/**", "*.swp", ".directory"];

/// Unmount helpers in preference order. fuse3 systems often ship only
/// `fusermount3`, so it must be tried before the legacy name.
const FUSERMOUNT_TOOLS: [&str; 2] = ["fusermount3", "fusermount"];

pub struct Linux;

#[async_trait]
impl Platform for Linux {
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
        for tool in FUSERMOUNT_TOOLS {
            let found = Command::new("which")
                .arg(tool)
                .output()
                .await
                .map(|o| o.status.success())
                .unwrap_or(false);
            if found {
                return true;
            }
        }
        Path::new("/dev/fuse").exists()
    }

    async fn install_driver(&self, _provisioner: &BinaryProvisioner, _bin_dir: &Path) -> Result<()> {
        // FUSE comes from the distribution; there is no installer package
        // we could run with predictable elevation semantics.
        Err(MountError::DriverInstall(
            "install the fuse3 package with your distribution's package manager".into(),
        ))
    }

    async fn is_mounted(&self, path: &Path) -> bool {
        match tokio::fs::read_to_string("/proc/mounts").await {
            Ok(mounts) => proc_mounts_lists(&mounts, path),
            Err(e) => {
                warn!(error = %e, "could not read /proc/mounts");
                false
            }
        }
    }

    async fn unmount(&self, path: &Path) {
        // Forced-then-lazy: fusermount handles the common case, lazy umount
        // reaps a hung FUSE daemon.
        for tool in FUSERMOUNT_TOOLS {
            let forced = Command::new(tool).args(["-uz"]).arg(path).status().await;
            if matches!(forced, Ok(s) if s.success()) {
                debug!(path = %path.display(), tool, "unmounted path");
                return;
            }
        }
        if let Err(e) = Command::new("umount").arg("-l").arg(path).status().await {
            warn!(path = %path.display(), error = %e, "lazy umount failed");
        }
    }

    async fn kill_engine_by_name(&self) {
        let image = self.engine_image_name();
        if let Err(e) = Command::new("pkill").args(["-f", &image]).status().await {
            warn!(image = %image, error = %e, "pkill failed");
        }
    }
}

/// Does a `/proc/mounts` dump list `path` as a fuse-type mount?
fn proc_mounts_lists(mounts: &str, path: &Path) -> bool {
    let needle = path.to_string_lossy();
    mounts.lines().any(|line| {
        let mut fields = line.split_whitespace();
        let _device = fields.next();
        let target = fields.next().map(decode_mount_field);
        let fstype = fields.next();
        matches!((target, fstype), (Some(t), Some(f)) if t == needle && f.contains("fuse"))
    })
}

/// Decode the octal escapes `/proc/mounts` uses for whitespace in paths
/// (`\040` for a space, `\011` for a tab, and so on).
fn decode_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = String::with_capacity(field.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let code = u32::from(bytes[i + 1] - b'0') * 64
                + u32::from(bytes[i + 2] - b'0') * 8
                + u32::from(bytes[i + 3] - b'0');
            out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
            i += 4;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SAMPLE: &str = "\
proc /proc proc rw,nosuid,nodev,noexec 0 0
/dev/sda1 / ext4 rw,relatime 0 0
drivemount: /home/u/drive fuse.rclone rw,nosuid,nodev 0 0
drivemount: /home/u/my\\040drive fuse.rclone rw,nosuid,nodev 0 0
tmpfs /tmp tmpfs rw 0 0
";

    #[test]
    fn detects_fuse_mount_entry() {
        assert!(proc_mounts_lists(SAMPLE, &PathBuf::from("/home/u/drive")));
    }

    #[test]
    fn detects_mount_path_with_escaped_space() {
        assert!(proc_mounts_lists(SAMPLE, &PathBuf::from("/home/u/my drive")));
    }

    #[test]
    fn ignores_non_fuse_entries() {
        assert!(!proc_mounts_lists(SAMPLE, &PathBuf::from("/")));
        assert!(!proc_mounts_lists(SAMPLE, &PathBuf::from("/home/u/other")));
    }

    #[test]
    fn decode_handles_octal_and_literal_text() {
        assert_eq!(decode_mount_field("/a\\040b\\011c"), "/a b\tc");
        assert_eq!(decode_mount_field("/plain"), "/plain");
        // Non-octal digits after a backslash are left untouched.
        assert_eq!(decode_mount_field("/a\\089"), "/a\\089");
    }

    #[test]
    fn fusermount3_is_preferred() {
        assert_eq!(FUSERMOUNT_TOOLS[0], "fusermount3");
    }
}
