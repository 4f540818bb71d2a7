use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub input_file: String,
    pub output_directory: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub force_refresh: bool,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub frames: FramesConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub normalization: NormalizationConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// A config with every section at its default.
    pub fn new(input_file: impl Into<String>, output_directory: impl Into<String>) -> Self {
        Self {
            version: "1.0".to_string(),
            input_file: input_file.into(),
            output_directory: output_directory.into(),
            worker_count: default_worker_count(),
            force_refresh: false,
            retry: RetryConfig::default(),
            provider: ProviderConfig::default(),
            frames: FramesConfig::default(),
            download: DownloadConfig::default(),
            transcoder: TranscoderConfig::default(),
            normalization: NormalizationConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fraction of the delay added or removed at random, 0.0 to 1.0.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    OpenAi,
}

impl ProviderKind {
    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-2.0-flash",
            ProviderKind::OpenAi => "gpt-4o-mini",
        }
    }

    pub fn default_api_key_env(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL override, e.g. for a proxy.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub prompt: PromptConfig,
}

fn default_max_concurrent() -> usize {
    2
}

fn default_min_interval_ms() -> u64 {
    1_000
}

fn default_timeout_secs() -> u64 {
    120
}

impl ProviderConfig {
    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.kind.default_model())
    }

    pub fn api_key_env_name(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| self.kind.default_api_key_env())
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            model: None,
            endpoint: None,
            max_concurrent: default_max_concurrent(),
            min_interval_ms: default_min_interval_ms(),
            timeout_secs: default_timeout_secs(),
            api_key: None,
            api_key_file: None,
            api_key_env: None,
            prompt: PromptConfig::default(),
        }
    }
}

/// Prompt and generation settings handed to the AI provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_prompt_text")]
    pub text: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Fields every analysis result must carry; missing ones are filled empty.
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<String>,
    /// Provider field name → canonical field name.
    #[serde(default)]
    pub field_aliases: BTreeMap<String, String>,
}

fn default_prompt_text() -> String {
    "Analyze this short-form video using its audio track and the attached frames. \
     Respond with a single JSON object with the keys \"summary\", \"transcript\" \
     and \"tags\" (an array of strings)."
        .to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.95
}

fn default_top_k() -> u32 {
    40
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_required_fields() -> Vec<String> {
    vec![
        "summary".to_string(),
        "transcript".to_string(),
        "tags".to_string(),
    ]
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            text: default_prompt_text(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_output_tokens: default_max_output_tokens(),
            required_fields: default_required_fields(),
            field_aliases: BTreeMap::new(),
        }
    }
}

/// Frame sampling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramesConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u32,
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,
}

fn default_interval_secs() -> u32 {
    3
}

fn default_max_frames() -> usize {
    20
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_frames: default_max_frames(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_downloader_binary")]
    pub binary: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub cookies_file: Option<String>,
    /// yt-dlp format selector.
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_downloader_binary() -> String {
    "yt-dlp".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}

fn default_format() -> String {
    "b".to_string()
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            binary: default_downloader_binary(),
            user_agent: default_user_agent(),
            cookies_file: None,
            format: default_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    #[serde(default = "default_transcoder_binary")]
    pub binary: String,
    /// ffmpeg VBR quality for MP3 output (0 best, 9 worst).
    #[serde(default = "default_audio_quality")]
    pub audio_quality: u8,
}

fn default_transcoder_binary() -> String {
    "ffmpeg".to_string()
}

fn default_audio_quality() -> u8 {
    2
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            binary: default_transcoder_binary(),
            audio_quality: default_audio_quality(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationConfig {
    #[serde(default = "default_true")]
    pub strip_www: bool,
    #[serde(default = "default_true")]
    pub strip_query: bool,
    #[serde(default = "default_true")]
    pub strip_fragment: bool,
    /// Query parameters that identify the video and survive `strip_query`.
    #[serde(default = "default_keep_query_params")]
    pub keep_query_params: Vec<String>,
}

fn default_keep_query_params() -> Vec<String> {
    vec!["v".to_string()]
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            strip_www: true,
            strip_query: true,
            strip_fragment: true,
            keep_query_params: default_keep_query_params(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_csv_filename")]
    pub csv_filename: String,
    #[serde(default = "default_json_filename")]
    pub json_filename: Option<String>,
    #[serde(default = "default_xlsx_filename")]
    pub xlsx_filename: Option<String>,
}

fn default_csv_filename() -> String {
    "report.csv".to_string()
}

fn default_json_filename() -> Option<String> {
    Some("report.json".to_string())
}

fn default_xlsx_filename() -> Option<String> {
    Some("report.xlsx".to_string())
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            csv_filename: default_csv_filename(),
            json_filename: default_json_filename(),
            xlsx_filename: default_xlsx_filename(),
        }
    }
}
