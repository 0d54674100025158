//! Mount lifecycle orchestration for remote storage drives
//!
//! This crate turns a remote storage account into a locally mounted drive
//! by coordinating two external collaborators: a transfer engine binary
//! (rclone, consumed as-is) that presents a WebDAV endpoint through the
//! platform mount driver, and an embedder-supplied local file-serving
//! endpoint that authenticates and streams account content.
//!
//! # Architecture
//!
//! - [`LifecycleController`]: the state machine exposing `start`/`stop`,
//!   serialized against concurrent callers, with a self-healing monitor
//! - [`supervisor`]: engine and watchdog process supervision
//! - [`provision`]: hash-pinned engine binary download
//! - [`platform`]: per-platform mount validation, driver probing, unmount
//! - [`probe`]: composite readiness checks beyond "process exists"
//! - [`rc`]: client for the engine's remote-control HTTP interface
//!
//! # Crash safety
//!
//! A detached watchdog process waits on the orchestrator's pid and reaps
//! the engine plus the mount point if the orchestrator dies without
//! running its own teardown. Teardown itself is idempotent and never
//! raises: every cleanup step swallows its own failure.

pub mod config;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod platform;
pub mod ports;
pub mod probe;
pub mod provision;
pub mod rc;
pub mod server;
pub mod session;
pub mod stats;
pub mod supervisor;

pub use config::AppDirs;
pub use controller::{LifecycleController, MountConfig};
pub use credentials::Credentials;
pub use error::{MountError, Result};
pub use platform::Platform;
pub use probe::{ProbeTarget, Readiness, ReadinessProbe};
pub use provision::{BinaryDescriptor, BinaryProvisioner};
pub use server::FileServer;
pub use session::MountState;
pub use stats::{ActiveTransfer, CacheStats, TransferStats};
pub use supervisor::{CacheMode, EngineSupervisor, MountOptions, ProcessSupervisor};
