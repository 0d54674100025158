//! Engine remote-control client
//!
//! Consumes the engine's HTTP control plane on `127.0.0.1:<rc-port>`:
//! `POST /core/stats`, `POST /vfs/stats`, `POST /vfs/list`. The response
//! shapes are not under our control, so every field is type-checked at the
//! boundary and anything unexpected degrades to a zeroed default rather
//! than an error.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::stats::{ActiveTransfer, CacheStats, TransferStats};

const RC_TIMEOUT: Duration = Duration::from_secs(2);

/// Client for one session's rc port
pub struct RcClient {
    client: reqwest::Client,
    base: String,
}

impl RcClient {
    pub fn new(rc_port: u16) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RC_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base: format!("http://127.0.0.1:{rc_port}"),
        }
    }

    async fn post(&self, path: &str) -> Option<Value> {
        let url = format!("{}/{path}", self.base);
        match self.client.post(&url).send().await {
            Ok(resp) => resp.json::<Value>().await.ok(),
            Err(e) => {
                debug!(url = %url, error = %e, "rc request failed");
                None
            }
        }
    }

    /// Aggregate transfer counters; zeroed on any failure.
    pub async fn core_stats(&self) -> TransferStats {
        match self.post("core/stats").await {
            Some(value) => parse_core_stats(&value),
            None => TransferStats::default(),
        }
    }

    /// VFS cache counters; zeroed on any failure.
    pub async fn vfs_stats(&self) -> CacheStats {
        match self.post("vfs/stats").await {
            Some(value) => parse_vfs_stats(&value),
            None => CacheStats::default(),
        }
    }

    /// Names of currently mounted remotes; empty on any failure.
    pub async fn vfs_list(&self) -> Vec<String> {
        match self.post("vfs/list").await {
            Some(value) => parse_vfs_list(&value),
            None => Vec::new(),
        }
    }
}

fn u64_field(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Speed comes back as a float; clamp instead of trusting it.
fn speed_field(value: &Value, key: &str) -> u64 {
    value
        .get(key)
        .and_then(Value::as_f64)
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(|s| s as u64)
        .unwrap_or(0)
}

fn parse_core_stats(value: &Value) -> TransferStats {
    let transferring: Vec<ActiveTransfer> = value
        .get("transferring")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|entry| ActiveTransfer {
                    name: str_field(entry, "name"),
                    size: u64_field(entry, "size"),
                    bytes_done: u64_field(entry, "bytes"),
                    speed: speed_field(entry, "speed"),
                })
                .collect()
        })
        .unwrap_or_default();

    // Entries with no bytes moved yet are queued rather than in progress.
    let queued = transferring.iter().filter(|t| t.bytes_done == 0).count() as u64;
    let in_progress = (transferring.len() as u64).saturating_sub(queued);

    TransferStats {
        in_progress,
        queued,
        errored: u64_field(value, "errors"),
        bytes_transferred: u64_field(value, "bytes"),
        bytes_total: u64_field(value, "totalBytes"),
        speed: speed_field(value, "speed"),
        transfers: transferring,
    }
}

fn parse_vfs_stats(value: &Value) -> CacheStats {
    let disk = value.get("diskCache").unwrap_or(&Value::Null);
    CacheStats {
        files_in_cache: u64_field(disk, "files"),
        bytes_used: u64_field(disk, "bytesUsed"),
        uploads_in_progress: u64_field(disk, "uploadsInProgress"),
        uploads_queued: u64_field(disk, "uploadsQueued"),
        errored_files: u64_field(disk, "erroredFiles"),
    }
}

fn parse_vfs_list(value: &Value) -> Vec<String> {
    value
        .get("vfses")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
