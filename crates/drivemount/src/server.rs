//! File-serving endpoint boundary
//!
//! The local WebDAV endpoint that streams account content is supplied by
//! the embedding application; the orchestrator only starts and stops it
//! and points the engine at it.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::credentials::Credentials;

/// The embedder-supplied local file-serving endpoint
///
/// `start` must bind exactly the given loopback address and require the
/// given credentials; the readiness probe expects an unauthenticated
/// request to be answered with `401 Unauthorized`. `stop` is invoked
/// unconditionally during teardown and should tolerate not being started.
#[async_trait]
pub trait FileServer: Send + Sync {
    async fn start(&self, addr: SocketAddr, credentials: &Credentials) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
}
