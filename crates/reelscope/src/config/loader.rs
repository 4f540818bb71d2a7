use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.input_file.trim().is_empty() {
        return Err(invalid("input_file must not be empty"));
    }
    if config.output_directory.trim().is_empty() {
        return Err(invalid("output_directory must not be empty"));
    }
    if config.worker_count == 0 {
        return Err(invalid("worker_count must be at least 1"));
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts must be at least 1"));
    }
    if retry.multiplier < 1.0 {
        return Err(invalid("retry.multiplier must be >= 1.0"));
    }
    if !(0.0..=1.0).contains(&retry.jitter) {
        return Err(invalid("retry.jitter must be between 0.0 and 1.0"));
    }
    if retry.max_delay_ms < retry.base_delay_ms {
        return Err(invalid("retry.max_delay_ms must be >= retry.base_delay_ms"));
    }

    if config.provider.max_concurrent == 0 {
        return Err(invalid("provider.max_concurrent must be at least 1"));
    }

    for (alias, canonical) in &config.provider.prompt.field_aliases {
        if alias.trim().is_empty() || canonical.trim().is_empty() {
            return Err(invalid("provider.prompt.field_aliases entries must not be empty"));
        }
    }

    if config.frames.interval_secs == 0 {
        return Err(invalid("frames.interval_secs must be at least 1"));
    }
    if config.frames.max_frames == 0 {
        return Err(invalid("frames.max_frames must be at least 1"));
    }

    let mut report_names = vec![&config.report.csv_filename];
    report_names.extend(config.report.json_filename.iter());
    report_names.extend(config.report.xlsx_filename.iter());
    for (i, name) in report_names.iter().enumerate() {
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(invalid(format!(
                "Report filename '{}' must be a plain file name",
                name
            )));
        }
        if report_names[..i].contains(name) {
            return Err(invalid(format!(
                "Report filename '{}' is used by more than one report",
                name
            )));
        }
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}
