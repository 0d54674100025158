//! Generated configuration: data directories and the engine connection profile

mod locator;
mod profile;

pub use locator::AppDirs;
pub use profile::{obscure_password, render_profile, write_profile, REMOTE_NAME};
