//! Engine connection profile
//!
//! The engine reads its remote definition from an INI-style config file.
//! The profile is rewritten on every start with freshly issued credentials;
//! the password is obscured by the engine's own `obscure` subcommand so the
//! plaintext never touches disk. Writes go through a temp file in the same
//! directory and an atomic rename.

use std::path::Path;
use std::process::Stdio;

use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::credentials::Credentials;
use crate::error::{MountError, Result};

/// Remote name used in the profile and as the mount source prefix
pub const REMOTE_NAME: &str = "drivemount";

/// Render the WebDAV remote profile section.
pub fn render_profile(remote: &str, url: &str, user: &str, obscured_pass: &str) -> String {
    format!(
        "[{remote}]\n\
         type = webdav\n\
         url = {url}\n\
         vendor = other\n\
         user = {user}\n\
         pass = {obscured_pass}\n"
    )
}

/// Obscure a plaintext credential with the engine binary.
///
/// Runs `<engine> obscure -` and pipes the plaintext through stdin; passing
/// it as an argument would leak it into the process table.
pub async fn obscure_password(engine: &Path, credentials: &Credentials) -> Result<String> {
    let mut child = Command::new(engine)
        .args(["obscure", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(MountError::Spawn)?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| MountError::Obscure("no stdin pipe".into()))?;
    stdin.write_all(credentials.password().as_bytes()).await?;
    drop(stdin);

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(MountError::Obscure(format!(
            "obscure exited with {}",
            output.status
        )));
    }
    let obscured = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if obscured.is_empty() {
        return Err(MountError::Obscure("obscure produced no output".into()));
    }
    Ok(obscured)
}

/// Atomically persist the rendered profile.
pub fn write_profile(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        MountError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "profile path has no parent directory",
        ))
    })?;
    let tmp = NamedTempFile::new_in(dir)?;
    std::fs::write(tmp.path(), contents)?;
    tmp.persist(path).map_err(|e| MountError::Io(e.error))?;
    debug!(path = %path.display(), "wrote engine connection profile");
    Ok(())
}
