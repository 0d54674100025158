//! Ephemeral session credentials
//!
//! A fresh user/password pair is issued for every start and handed to both
//! the local file-serving endpoint and the engine profile. Credentials are
//! never persisted in plaintext and never reused across sessions.

use rand::distr::Alphanumeric;
use rand::Rng;

const USER_SUFFIX_LEN: usize = 8;
const PASSWORD_LEN: usize = 32;

/// One session's WebDAV credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    /// Generate a fresh random pair.
    pub fn issue() -> Self {
        Self {
            user: format!("drivemount-{}", random_string(USER_SUFFIX_LEN)),
            password: random_string(PASSWORD_LEN),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

// Keep the password out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn random_string(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
