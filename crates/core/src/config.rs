//! inSTead configuration
//!
//! YAML config file plus `INSTEAD_*` environment overrides.

use crate::llm::{GenerationSettings, SamplingParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Main config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsteadConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub revision: RevisionConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// LLM config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name (openai, openrouter, ollama, local)
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// API root URL
    pub base_url: Option<String>,

    /// API key; env vars take precedence
    pub api_key: Option<String>,

    pub organization: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max generated tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout (seconds)
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Stream revisions instead of one batch result
    #[serde(default)]
    pub streaming: bool,

    /// System / character prompt sent ahead of the history
    pub system_prompt: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    300
}

fn default_timeout() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            organization: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout: default_timeout(),
            streaming: false,
            system_prompt: None,
        }
    }
}

impl LlmConfig {
    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

impl GenerationSettings for LlmConfig {
    fn streaming(&self) -> bool {
        self.streaming
    }
}

/// Revision prompt config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevisionConfig {
    /// Replaces the default task statement of the revision instruction
    pub instruction_preamble: Option<String>,
}

/// Storage config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for conversation files
    #[serde(default = "default_chat_dir")]
    pub chat_dir: PathBuf,
}

fn default_chat_dir() -> PathBuf {
    PathBuf::from(".instead/chats")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chat_dir: default_chat_dir(),
        }
    }
}

/// Loads `InsteadConfig` from the first config file found
#[derive(Debug, Default)]
pub struct ConfigLoader {
    explicit: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this file instead of searching
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            explicit: Some(path.into()),
        }
    }

    /// Candidate files, highest priority first
    pub fn search_paths(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.explicit {
            return vec![path.clone()];
        }
        let mut paths = vec![PathBuf::from(".instead/config.yaml")];
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(".config/instead/config.yaml"));
        }
        paths
    }

    /// Load config; defaults when no file exists (an explicit path must exist)
    pub fn load(&self) -> Result<InsteadConfig, ConfigError> {
        let mut config = match self.search_paths().into_iter().find(|p| p.exists()) {
            Some(path) => Self::load_file(&path)?,
            None => match &self.explicit {
                Some(path) => {
                    return Err(ConfigError::Io {
                        path: path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "config file not found",
                        ),
                    });
                }
                None => InsteadConfig::default(),
            },
        };
        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse one YAML file
    pub fn load_file(path: &Path) -> Result<InsteadConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }
}

/// Apply `INSTEAD_LLM_*` overrides
pub fn apply_env_overrides<F>(config: &mut InsteadConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(provider) = lookup("INSTEAD_LLM_PROVIDER") {
        config.llm.provider = provider;
    }
    if let Some(model) = lookup("INSTEAD_LLM_MODEL") {
        config.llm.model = model;
    }
    if let Some(base_url) = lookup("INSTEAD_LLM_BASE_URL") {
        config.llm.base_url = Some(base_url);
    }
    if let Some(streaming) = lookup("INSTEAD_LLM_STREAMING") {
        config.llm.streaming = matches!(streaming.to_lowercase().as_str(), "1" | "true" | "yes");
    }
}
