//! Sidecar configuration.
//!
//! Every knob can come from the command line or the environment. Only the
//! backend URL and the AI credential matter in normal use; the rest exist for
//! tests and slow networks.

use std::time::Duration;

use clap::Parser;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid backend url {url}: {reason}")]
    BackendUrl { url: String, reason: String },
    #[error("invalid ai url {url}: {reason}")]
    AiUrl { url: String, reason: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, Parser)]
#[command(name = "programd")]
#[command(version, about = "Curriculum program planning sidecar")]
pub struct Config {
    /// Base URL of the content backend (without the /api suffix)
    #[arg(long, env = "PROGRAMD_BACKEND_URL", default_value = "http://localhost:1337")]
    pub backend_url: String,

    /// Credential for the idea-generation provider
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub ai_api_key: Option<String>,

    #[arg(
        long,
        env = "PROGRAMD_AI_URL",
        default_value = "https://generativelanguage.googleapis.com"
    )]
    pub ai_url: String,

    #[arg(long, env = "PROGRAMD_AI_MODEL", default_value = "gemini-1.5-pro")]
    pub ai_model: String,

    /// Quiet period after the last edit of a field before it is saved
    #[arg(long, env = "PROGRAMD_AUTOSAVE_DEBOUNCE_MS", default_value_t = 1000)]
    pub autosave_debounce_ms: u64,

    #[arg(long, env = "PROGRAMD_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "PROGRAMD_OUTCOME_PAGE_SIZE", default_value_t = 100)]
    pub outcome_page_size: u32,

    /// Emit logs as JSON lines on stderr
    #[arg(long, env = "PROGRAMD_LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        reqwest::Url::parse(&self.backend_url).map_err(|e| ConfigError::BackendUrl {
            url: self.backend_url.clone(),
            reason: e.to_string(),
        })?;
        reqwest::Url::parse(&self.ai_url).map_err(|e| ConfigError::AiUrl {
            url: self.ai_url.clone(),
            reason: e.to_string(),
        })?;
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Zero("request timeout"));
        }
        if self.outcome_page_size == 0 {
            return Err(ConfigError::Zero("outcome page size"));
        }
        Ok(())
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn ai_configured(&self) -> bool {
        self.ai_api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }
}
