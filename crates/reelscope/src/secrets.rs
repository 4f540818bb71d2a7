//! API key resolution.
//!
//! Keys are looked up in priority order: a direct value in the config, a
//! file (Docker secrets style), then an environment variable.

use secrecy::{ExposeSecret, SecretString};
use std::fs;

use crate::config::ProviderConfig;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Secret from {source_name} is empty")]
    Empty { source_name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
            path: expanded.clone(),
            source: e,
        })?;
        return non_empty(content.trim(), &expanded);
    }

    if let Some(var_name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(var_name) {
            Ok(value) => non_empty(value.trim(), var_name),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: var_name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: var_name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Resolves the provider API key, falling back to the provider's
/// conventional environment variable.
pub fn resolve_api_key(provider: &ProviderConfig) -> Result<SecretString> {
    let key = resolve_secret(
        provider.api_key.as_deref(),
        provider.api_key_file.as_deref(),
        Some(provider.api_key_env_name()),
    )?;
    log::debug!(
        "Resolved {:?} API key ({} chars)",
        provider.kind,
        key.expose_secret().len()
    );
    Ok(key)
}

fn non_empty(value: &str, source_name: &str) -> Result<SecretString> {
    if value.is_empty() {
        return Err(SecretError::Empty {
            source_name: source_name.to_string(),
        });
    }
    Ok(SecretString::from(value.to_string()))
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_direct_value_takes_priority() {
        let secret = resolve_secret(Some("direct"), Some("/nonexistent"), Some("NOPE")).unwrap();
        assert_eq!(secret.expose_secret(), "direct");
    }

    #[test]
    fn test_file_value_is_trimmed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key");
        std::fs::write(&path, "  abc123\n").unwrap();

        let secret = resolve_secret(None, path.to_str(), None).unwrap();
        assert_eq!(secret.expose_secret(), "abc123");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = resolve_secret(None, Some("/nonexistent/key"), Some("IGNORED"));
        assert!(matches!(result, Err(SecretError::FileReadError { .. })));
    }

    #[test]
    fn test_empty_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key");
        std::fs::write(&path, "\n").unwrap();
        let result = resolve_secret(None, path.to_str(), None);
        assert!(matches!(result, Err(SecretError::Empty { .. })));
    }

    #[test]
    #[serial]
    fn test_env_var_fallback() {
        std::env::set_var("REELSCOPE_TEST_KEY", "from-env\n");
        let secret = resolve_secret(None, None, Some("REELSCOPE_TEST_KEY")).unwrap();
        assert_eq!(secret.expose_secret(), "from-env");
        std::env::remove_var("REELSCOPE_TEST_KEY");
    }

    #[test]
    #[serial]
    fn test_env_var_not_set() {
        std::env::remove_var("REELSCOPE_TEST_MISSING");
        let result = resolve_secret(None, None, Some("REELSCOPE_TEST_MISSING"));
        assert!(matches!(result, Err(SecretError::EnvVarNotSet { .. })));
    }

    #[test]
    fn test_no_source() {
        assert!(matches!(
            resolve_secret(None, None, None),
            Err(SecretError::NoSourceProvided)
        ));
    }

    #[test]
    #[serial]
    fn test_resolve_api_key_uses_provider_default_env() {
        std::env::set_var("GEMINI_API_KEY", "gem-key");
        let provider = ProviderConfig::default();
        let key = resolve_api_key(&provider).unwrap();
        assert_eq!(key.expose_secret(), "gem-key");
        std::env::remove_var("GEMINI_API_KEY");
    }
}
