pub mod gemini;
pub mod normalize;
pub mod openai;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use secrecy::SecretString;

use crate::config::{ProviderConfig, ProviderKind};

use super::{AiProvider, ProviderError};

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// Structured output of the analysis stage, identical in shape for every
/// provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub provider: String,
    pub model: String,
    pub fields: BTreeMap<String, Value>,
}

impl AnalysisResult {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        fields: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// A field rendered as text: strings as-is, arrays of strings joined
    /// with spaces, anything else as JSON.
    pub fn text(&self, field: &str) -> Option<String> {
        self.fields.get(field).map(value_to_text)
    }

    pub fn summary(&self) -> Option<String> {
        self.text("summary")
    }

    pub fn transcript(&self) -> Option<String> {
        self.text("transcript")
    }

    pub fn tags(&self) -> Vec<String> {
        match self.fields.get("tags") {
            Some(Value::Array(items)) => items.iter().map(value_to_text).collect(),
            Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
            _ => Vec::new(),
        }
    }
}

pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) if items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

/// Base64 payload of a media file plus its MIME type.
pub(crate) struct InlineMedia {
    pub mime_type: String,
    pub data: String,
}

pub(crate) fn inline_media(path: &Path) -> Result<InlineMedia, ProviderError> {
    let bytes = std::fs::read(path).map_err(|e| {
        ProviderError::permanent(format!("cannot read media '{}': {}", path.display(), e))
    })?;
    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    Ok(InlineMedia {
        mime_type,
        data: BASE64.encode(bytes),
    })
}

/// Maps a non-success HTTP status to a provider error.
pub(crate) fn classify_status(status: u16, body: &str) -> ProviderError {
    let snippet: String = body.chars().take(300).collect();
    let lower = body.to_lowercase();

    if status == 429 || lower.contains("quota") || lower.contains("rate limit") {
        return ProviderError::RateLimited(format!("HTTP {}: {}", status, snippet));
    }
    if status >= 500 || status == 408 {
        return ProviderError::transient(format!("HTTP {}: {}", status, snippet));
    }
    ProviderError::permanent(format!("HTTP {}: {}", status, snippet))
}

pub(crate) fn classify_transport(err: &reqwest::Error) -> ProviderError {
    if err.is_decode() {
        ProviderError::InvalidResponse(err.to_string())
    } else {
        ProviderError::transient(err.to_string())
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client, ProviderError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::permanent(format!("cannot build HTTP client: {}", e)))
}

/// Builds the configured provider.
pub fn build_provider(
    config: &ProviderConfig,
    api_key: SecretString,
) -> Result<Arc<dyn AiProvider>, ProviderError> {
    let provider: Arc<dyn AiProvider> = match config.kind {
        ProviderKind::Gemini => Arc::new(GeminiProvider::from_config(config, api_key)?),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::from_config(config, api_key)?),
    };
    Ok(provider)
}
