//! Public transfer and cache statistics types
//!
//! Shapes returned by [`crate::LifecycleController::stats`] and
//! [`crate::LifecycleController::cache_stats`]. All-zero defaults stand in
//! whenever the session is inactive or the engine cannot be queried.

use serde::{Deserialize, Serialize};

/// One in-flight transfer reported by the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveTransfer {
    /// Remote-relative file name
    pub name: String,
    /// Total size in bytes
    pub size: u64,
    /// Bytes transferred so far
    pub bytes_done: u64,
    /// Current speed in bytes per second
    pub speed: u64,
}

/// Aggregate transfer counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferStats {
    /// Transfers currently moving bytes
    pub in_progress: u64,
    /// Transfers accepted but not yet moving bytes
    pub queued: u64,
    /// Transfers that ended in an error
    pub errored: u64,
    /// Bytes transferred in this session
    pub bytes_transferred: u64,
    /// Total bytes expected for known transfers
    pub bytes_total: u64,
    /// Aggregate speed in bytes per second
    pub speed: u64,
    /// Descriptors for the in-flight transfers
    pub transfers: Vec<ActiveTransfer>,
}

/// VFS cache counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Files currently held in the cache
    pub files_in_cache: u64,
    /// Bytes used by the cache
    pub bytes_used: u64,
    /// Cache uploads currently running
    pub uploads_in_progress: u64,
    /// Cache uploads waiting to run
    pub uploads_queued: u64,
    /// Cached files in an errored state
    pub errored_files: u64,
}
