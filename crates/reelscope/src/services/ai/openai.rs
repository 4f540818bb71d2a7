//! OpenAI chat-completions client.

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

const DEFAULT_ENDPOINT: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    client: Client,
    api_key: SecretString,
    model: String,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    InputAudio { input_audio: InputAudio },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct InputAudio {
    data: String,
    format: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

impl OpenAiProvider {
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

    /// Only the audio-capable chat models take an audio part.
    fn accepts_audio(&self) -> bool {
        self.model.contains("audio")
    }

    fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.endpoint)
    }

    fn build_request(
        &self,
        audio: &Path,
        frames: &[PathBuf],
        prompt: &PromptConfig,
    ) -> Result<ChatRequest, ProviderError> {
        let mut content = vec![ContentPart::Text {
            text: prompt.text.clone(),
        }];

        if self.accepts_audio() {
            let media = inline_media(audio)?;
            content.push(ContentPart::InputAudio {
                input_audio: InputAudio {
                    data: media.data,
                    format: "mp3".to_string(),
                },
            });
        }

        for frame in frames {
            let media = inline_media(frame)?;
            content.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{};base64,{}", media.mime_type, media.data),
                },
            });
        }

        Ok(ChatRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content,
            }],
            temperature: prompt.temperature,
            top_p: prompt.top_p,
            max_tokens: prompt.max_output_tokens,
            response_format: ResponseFormat {
                kind: "json_object".to_string(),
            },
        })
    }
}

fn extract_text(response: ChatResponse) -> Result<String, ProviderError> {
    let choice = response.choices.into_iter().next().ok_or_else(|| {
        ProviderError::InvalidResponse("no choices in OpenAI response".to_string())
    })?;

    if let Some(refusal) = choice.message.refusal {
        return Err(ProviderError::InvalidResponse(format!("model refused: {}", refusal)));
    }

    match choice.message.content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(ProviderError::InvalidResponse(format!(
            "empty completion (finish_reason: {})",
            choice.finish_reason.as_deref().unwrap_or("unknown")
        ))),
    }
}

impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
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
        debug!(model = %self.model, frames = frames.len(), "Sending OpenAI request");

        let response = self
            .client
            .post(self.url())
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let text = extract_text(parsed)?;
        let fields = normalize_response(&text, prompt)?;

        Ok(AnalysisResult::new(self.name(), &self.model, fields))
    }
}
