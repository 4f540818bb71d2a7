//! Gemini `generateContent` client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{PromptConfig, ProviderConfig};
use crate::services::{AiProvider, ProviderError};

use super::normalize::normalize_response;
use super::{classify_status, classify_transport, http_client, inline_media, AnalysisResult};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiProvider {
    client: Client,
    api_key: SecretString,
    model: String,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback", default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason", default)]
    block_reason: Option<String>,
}

impl GeminiProvider {
    pub fn new(
        api_key: SecretString,
        model: impl Into<String>,
        endpoint: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            model: model.into(),
            endpoint: endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    pub fn from_config(config: &ProviderConfig, api_key: SecretString) -> Result<Self, ProviderError> {
        Self::new(
            api_key,
            config.model_name(),
            config.endpoint.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        )
    }

    fn build_request(
        &self,
        audio: &Path,
        frames: &[PathBuf],
        prompt: &PromptConfig,
    ) -> Result<GeminiRequest, ProviderError> {
        let mut parts = Vec::with_capacity(frames.len() + 2);
        for path in std::iter::once(audio).chain(frames.iter().map(PathBuf::as_path)) {
            let media = inline_media(path)?;
            parts.push(Part::Inline {
                inline_data: InlineData {
                    mime_type: media.mime_type,
                    data: media.data,
                },
            });
        }
        parts.push(Part::Text {
            text: prompt.text.clone(),
        });

        Ok(GeminiRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: prompt.temperature,
                top_p: prompt.top_p,
                top_k: prompt.top_k,
                max_output_tokens: prompt.max_output_tokens,
                response_mime_type: "application/json".to_string(),
            },
        })
    }
}

fn extract_text(response: GeminiResponse) -> Result<String, ProviderError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if !text.trim().is_empty() {
        return Ok(text);
    }

    match response.prompt_feedback.and_then(|f| f.block_reason) {
        Some(reason) => Err(ProviderError::InvalidResponse(format!(
            "prompt blocked: {}",
            reason
        ))),
        None => Err(ProviderError::InvalidResponse(
            "no content in Gemini response".to_string(),
        )),
    }
}

impl AiProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn analyze(
        &self,
        audio: &Path,
        frames: &[PathBuf],
        prompt: &PromptConfig,
    ) -> Result<AnalysisResult, ProviderError> {
        let request = self.build_request(audio, frames, prompt)?;
        debug!(model = %self.model, frames = frames.len(), "Sending Gemini request");

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let parsed: GeminiResponse = response
            .json()
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let text = extract_text(parsed)?;
        let fields = normalize_response(&text, prompt)?;

        Ok(AnalysisResult::new(self.name(), &self.model, fields))
    }
}
