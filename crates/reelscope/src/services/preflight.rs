//! Process-level checks run before any job starts.

use std::path::PathBuf;

use crate::config::Config;
use crate::error::ReelscopeError;

/// Resolves a binary name (or path) to an executable.
pub fn check_binary(binary: &str) -> Result<PathBuf, ReelscopeError> {
    which::which(binary)
        .map_err(|e| ReelscopeError::Preflight(format!("'{}' not found: {}", binary, e)))
}

/// Verifies the external tools the pipeline shells out to.
pub fn check_tools(config: &Config) -> Result<(), ReelscopeError> {
    for binary in [&config.download.binary, &config.transcoder.binary] {
        let path = check_binary(binary)?;
        log::debug!("Using {} at {}", binary, path.display());
    }

    if let Some(cookies) = &config.download.cookies_file {
        if !std::path::Path::new(cookies).is_file() {
            log::warn!("Cookies file '{}' does not exist, downloading without it", cookies);
        }
    }

    Ok(())
}
