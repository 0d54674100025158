//! Structured engine argument construction
//!
//! Every recognized engine option lives on [`MountOptions`]; serialization
//! to the concrete argv happens in exactly one place so option validity is
//! decided before the process is spawned, not inside ad hoc string
//! concatenation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Engine VFS cache mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Off,
    Minimal,
    Writes,
    Full,
}

impl CacheMode {
    pub fn as_flag_value(self) -> &'static str {
        match self {
            CacheMode::Off => "off",
            CacheMode::Minimal => "minimal",
            CacheMode::Writes => "writes",
            CacheMode::Full => "full",
        }
    }
}

/// Recognized engine mount options, serialized to argv in [`MountOptions::to_args`]
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// Remote name as written in the connection profile
    pub remote: String,
    /// Local mount target
    pub mount_point: PathBuf,
    /// Connection profile path
    pub profile_path: PathBuf,
    /// VFS cache directory (session-owned)
    pub cache_dir: PathBuf,
    pub cache_mode: CacheMode,
    /// Upper bound for the VFS cache, before free-space derivation
    pub cache_ceiling_bytes: u64,
    /// Free space on the cache volume that must stay untouched
    pub reserved_bytes: u64,
    /// Engine duration string, e.g. `720h`
    pub cache_max_age: String,
    /// Engine duration string, e.g. `15s`
    pub poll_interval: String,
    /// Engine duration string, e.g. `60s`
    pub dir_cache_time: String,
    pub read_only: bool,
    /// Remote-control listener port on 127.0.0.1
    pub rc_port: u16,
    /// Volume label shown by the OS
    pub volume_name: String,
    pub log_file: Option<PathBuf>,
    /// Junk-file patterns excluded from the mount
    pub exclusions: Vec<String>,
}

impl MountOptions {
    /// Serialize to the engine's argv.
    ///
    /// `cache_size_bytes` is the already-derived effective cache bound
    /// (see [`effective_cache_size`]).
    pub fn to_args(&self, cache_size_bytes: u64) -> Vec<String> {
        let mut args = vec![
            "mount".to_string(),
            format!("{}:", self.remote),
            self.mount_point.to_string_lossy().to_string(),
            "--config".to_string(),
            self.profile_path.to_string_lossy().to_string(),
            "--cache-dir".to_string(),
            self.cache_dir.to_string_lossy().to_string(),
            "--vfs-cache-mode".to_string(),
            self.cache_mode.as_flag_value().to_string(),
            "--vfs-cache-max-size".to_string(),
            cache_size_bytes.to_string(),
            "--vfs-cache-min-free-space".to_string(),
            self.reserved_bytes.to_string(),
            "--vfs-cache-max-age".to_string(),
            self.cache_max_age.clone(),
            "--poll-interval".to_string(),
            self.poll_interval.clone(),
            "--dir-cache-time".to_string(),
            self.dir_cache_time.clone(),
            "--use-server-modtime".to_string(),
            "--devname".to_string(),
            self.volume_name.clone(),
            "--volname".to_string(),
            self.volume_name.clone(),
            "--rc".to_string(),
            "--rc-addr".to_string(),
            format!("127.0.0.1:{}", self.rc_port),
            "--rc-no-auth".to_string(),
        ];
        if self.read_only {
            args.push("--read-only".to_string());
        }
        if let Some(log) = &self.log_file {
            args.push("--log-file".to_string());
            args.push(log.to_string_lossy().to_string());
        }
        for pattern in &self.exclusions {
            args.push("--exclude".to_string());
            args.push(pattern.clone());
        }
        args
    }
}

/// Derive the effective cache bound: available free space minus the
/// reserved buffer, capped by the configured ceiling. With no free-space
/// reading the ceiling is used as-is.
pub fn effective_cache_size(free_bytes: Option<u64>, ceiling: u64, reserved: u64) -> u64 {
    match free_bytes {
        Some(free) => free.saturating_sub(reserved).min(ceiling),
        None => ceiling,
    }
}

/// Free space on the volume holding `path`, where the platform exposes it.
#[cfg(unix)]
pub fn free_space(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    Some((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
}

#[cfg(not(unix))]
pub fn free_space(_path: &Path) -> Option<u64> {
    None
}
