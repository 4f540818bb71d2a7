use std::path::PathBuf;

use crate::config::{Config, FramesConfig, PromptConfig};

use super::retry::RetryPolicy;

pub struct PipelineConfig {
    pub output_directory: PathBuf,
    pub force_refresh: bool,
    pub retry: RetryPolicy,
    pub frames: FramesConfig,
    pub prompt: PromptConfig,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_directory: PathBuf::from(&config.output_directory),
            force_refresh: config.force_refresh,
            retry: RetryPolicy::from_config(&config.retry),
            frames: config.frames.clone(),
            prompt: config.provider.prompt.clone(),
        }
    }
}
