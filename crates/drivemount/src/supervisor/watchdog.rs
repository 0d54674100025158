//! Watchdog script materialization
//!
//! The watchdog is a tiny shell script spawned detached from the
//! orchestrator. It waits for the orchestrator's pid to disappear, then
//! force-kills any lingering engine process by name and unmounts the mount
//! path. It is the cleanup of last resort for when the orchestrator is
//! killed abruptly and never runs its own teardown.
//!
//! The script body is versioned through its filename; bumping
//! [`WATCHDOG_VERSION`] replaces stale copies on disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Bump when either script body changes.
pub const WATCHDOG_VERSION: u32 = 3;

/// Filename the current script version materializes to.
pub fn script_filename() -> String {
    if cfg!(windows) {
        format!("drivemount-watchdog-v{WATCHDOG_VERSION}.cmd")
    } else {
        format!("drivemount-watchdog-v{WATCHDOG_VERSION}.sh")
    }
}

/// Script body for the current platform family.
///
/// The POSIX variant takes three arguments: orchestrator pid, engine
/// image name, mount path. The Windows variant takes only the pid and
/// image name and performs no unmount; the mount driver releases the
/// drive letter once the engine is gone.
pub fn script_body() -> &'static str {
    if cfg!(windows) {
        WINDOWS_BODY
    } else {
        POSIX_BODY
    }
}

const POSIX_BODY: &str = r#"#!/bin/sh
# drivemount watchdog: reaps the engine if the orchestrator dies.
PARENT_PID="$1"
ENGINE="$2"
MOUNT_PATH="$3"
while kill -0 "$PARENT_PID" 2>/dev/null; do
    sleep 5
done
pkill -f "$ENGINE" 2>/dev/null
sleep 1
if [ "$(uname)" = "Darwin" ]; then
    umount -f "$MOUNT_PATH" 2>/dev/null || diskutil unmount force "$MOUNT_PATH" 2>/dev/null
else
    fusermount3 -uz "$MOUNT_PATH" 2>/dev/null || fusermount -uz "$MOUNT_PATH" 2>/dev/null || umount -l "$MOUNT_PATH" 2>/dev/null
fi
"#;

const WINDOWS_BODY: &str = "@echo off\r\n\
rem drivemount watchdog: reaps the engine if the orchestrator dies.\r\n\
:wait\r\n\
tasklist /FI \"PID eq %1\" /FO CSV /NH | findstr /C:\"\\\"%1\\\"\" >nul 2>&1 || goto reap\r\n\
timeout /T 5 /NOBREAK >nul\r\n\
goto wait\r\n\
:reap\r\n\
taskkill /F /T /IM %2 >nul 2>&1\r\n";

/// Write the current script version into `scripts_dir`, removing stale
/// versions, and return its path. Regenerates only when the version in the
/// filename changes.
pub fn materialize(scripts_dir: &Path) -> io::Result<PathBuf> {
    let path = scripts_dir.join(script_filename());
    if path.is_file() {
        return Ok(path);
    }

    // Drop scripts from older versions so the directory holds exactly one.
    if let Ok(entries) = fs::read_dir(scripts_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("drivemount-watchdog-v") {
                let _ = fs::remove_file(entry.path());
            }
        }
    }

    fs::write(&path, script_body())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    }
    debug!(path = %path.display(), "materialized watchdog script");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn filename_carries_version() {
        assert!(script_filename().contains(&format!("v{WATCHDOG_VERSION}")));
    }

    #[test]
    fn materialize_writes_script_once() {
        let tmp = TempDir::new().unwrap();
        let first = materialize(tmp.path()).unwrap();
        assert!(first.is_file());
        let before = fs::metadata(&first).unwrap().modified().unwrap();

        let second = materialize(tmp.path()).unwrap();
        assert_eq!(first, second);
        let after = fs::metadata(&second).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn materialize_replaces_stale_versions() {
        let tmp = TempDir::new().unwrap();
        let stale = tmp.path().join("drivemount-watchdog-v1.sh");
        fs::write(&stale, "#!/bin/sh\n").unwrap();

        let current = materialize(tmp.path()).unwrap();
        assert!(current.is_file());
        assert!(!stale.exists());
    }

    #[cfg(unix)]
    #[test]
    fn posix_body_waits_and_unmounts() {
        let body = script_body();
        assert!(body.contains("kill -0 \"$PARENT_PID\""));
        assert!(body.contains("pkill -f \"$ENGINE\""));
        // fuse3-only systems lack the legacy tool name, so both are tried.
        assert!(body.contains("fusermount3 -uz"));
        assert!(body.contains("|| fusermount -uz"));
    }

    #[cfg(unix)]
    #[test]
    fn materialized_script_is_executable() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let path = materialize(tmp.path()).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
