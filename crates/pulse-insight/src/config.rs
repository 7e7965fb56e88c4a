//! Runtime configuration
//!
//! Loaded from the environment with the same provider precedence as the model
//! clients expect: `OPENAI_API_KEY`, then `ANTHROPIC_API_KEY`, then
//! `LOCAL_LLM_URL`. `PULSE_*` variables override the numeric knobs.

use crate::orchestrator::RetryPolicy;
use pulse_model::{BehaviorWindow, PulseError, PulseResult};
use pulse_storage::SourceConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Highest sampling temperature accepted for any template.
pub const MAX_TEMPERATURE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Anthropic,
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: Option<Provider>,
    #[serde(skip_serializing, default)]
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    /// Hard deadline per attempt.
    pub timeout_ms: u64,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: None,
            api_key: String::new(),
            model: "gpt-4o".to_string(),
            base_url: None,
            temperature: 0.2,
            timeout_ms: 30_000,
            max_tokens: 1024,
            retry: RetryPolicy::default(),
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptLimits {
    /// Upper bound on the rendered prompt, in bytes.
    pub max_input_bytes: usize,
    /// Recent transactions included in vibe and receipt prompts.
    pub recent_transactions: usize,
    /// Campaign bodies quoted as exemplars in the brand-voice prompt.
    pub exemplars: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: 12_000,
            recent_transactions: 20,
            exemplars: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseConfig {
    pub source: SourceConfig,
    pub model: ModelConfig,
    pub prompt: PromptLimits,
    pub window_months: u32,
    /// Base image the vibe card is composited onto.
    pub card_template: Option<PathBuf>,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            model: ModelConfig::default(),
            prompt: PromptLimits::default(),
            window_months: BehaviorWindow::DEFAULT_MONTHS,
            card_template: None,
        }
    }
}

impl PulseConfig {
    /// Load from process environment variables.
    pub fn from_env() -> PulseResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PulseResult<Self> {
        let mut config = Self::default();
        let model = &mut config.model;

        if let Some(key) = lookup("OPENAI_API_KEY") {
            model.provider = Some(Provider::OpenAI);
            model.api_key = key;
            model.model = lookup("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o".to_string());
            model.base_url = lookup("OPENAI_BASE_URL");
        } else if let Some(key) = lookup("ANTHROPIC_API_KEY") {
            model.provider = Some(Provider::Anthropic);
            model.api_key = key;
            model.model =
                lookup("ANTHROPIC_MODEL").unwrap_or_else(|| "claude-3-5-sonnet-latest".to_string());
            model.base_url = lookup("ANTHROPIC_BASE_URL");
        } else if let Some(url) = lookup("LOCAL_LLM_URL") {
            model.provider = Some(Provider::Local);
            model.model = lookup("LOCAL_LLM_MODEL").unwrap_or_else(|| "default".to_string());
            model.base_url = Some(url);
            model.timeout_ms = 120_000;
        }

        if let Some(path) = lookup("PULSE_DB_PATH") {
            config.source.database_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("PULSE_DDL_PATH") {
            config.source.ddl_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("PULSE_CARD_TEMPLATE") {
            config.card_template = Some(PathBuf::from(path));
        }

        override_num(&lookup, "PULSE_POOL_SIZE", &mut config.source.pool_size)?;
        override_num(&lookup, "PULSE_TEMPERATURE", &mut config.model.temperature)?;
        override_num(&lookup, "PULSE_TIMEOUT_MS", &mut config.model.timeout_ms)?;
        override_num(&lookup, "PULSE_MAX_TOKENS", &mut config.model.max_tokens)?;
        override_num(&lookup, "PULSE_MAX_ATTEMPTS", &mut config.model.retry.max_attempts)?;
        override_num(&lookup, "PULSE_INITIAL_BACKOFF_MS", &mut config.model.retry.initial_backoff_ms)?;
        override_num(&lookup, "PULSE_MAX_BACKOFF_MS", &mut config.model.retry.max_backoff_ms)?;
        override_num(&lookup, "PULSE_MAX_INPUT_BYTES", &mut config.prompt.max_input_bytes)?;
        override_num(&lookup, "PULSE_RECENT_TRANSACTIONS", &mut config.prompt.recent_transactions)?;
        override_num(&lookup, "PULSE_EXEMPLARS", &mut config.prompt.exemplars)?;
        override_num(&lookup, "PULSE_WINDOW_MONTHS", &mut config.window_months)?;

        Ok(config)
    }

    /// Reject out-of-range knobs before anything is started.
    pub fn validate(&self) -> PulseResult<()> {
        let model = &self.model;
        if !(0.0..=MAX_TEMPERATURE).contains(&model.temperature) {
            return Err(config_error(format!(
                "temperature {} is outside 0.0..={MAX_TEMPERATURE}",
                model.temperature
            )));
        }
        if model.timeout_ms == 0 {
            return Err(config_error("per-attempt timeout must be positive"));
        }
        if model.max_tokens == 0 {
            return Err(config_error("max_tokens must be positive"));
        }
        if !(1..=10).contains(&model.retry.max_attempts) {
            return Err(config_error(format!(
                "max_attempts {} is outside 1..=10",
                model.retry.max_attempts
            )));
        }
        if model.retry.initial_backoff_ms > model.retry.max_backoff_ms {
            return Err(config_error("initial backoff exceeds max backoff"));
        }
        if self.source.pool_size == 0 {
            return Err(config_error("pool_size must be at least 1"));
        }
        if self.prompt.max_input_bytes == 0 {
            return Err(config_error("max_input_bytes must be positive"));
        }
        if self.window_months == 0 || self.window_months > BehaviorWindow::MAX_MONTHS {
            return Err(config_error(format!(
                "window_months {} is outside 1..={}",
                self.window_months,
                BehaviorWindow::MAX_MONTHS
            )));
        }
        Ok(())
    }
}

fn override_num<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> PulseResult<()> {
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| config_error(format!("{key}={raw:?} is not a valid number")))?;
    }
    Ok(())
}

fn config_error(message: impl Into<String>) -> PulseError {
    PulseError::Configuration(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_provider_precedence() {
        let config = PulseConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "a-key"),
            ("OPENAI_API_KEY", "o-key"),
        ]))
        .unwrap();
        assert_eq!(config.model.provider, Some(Provider::OpenAI));
        assert_eq!(config.model.api_key, "o-key");

        let config = PulseConfig::from_lookup(lookup(&[("LOCAL_LLM_URL", "http://localhost:8000")])).unwrap();
        assert_eq!(config.model.provider, Some(Provider::Local));
        assert_eq!(config.model.timeout_ms, 120_000);

        let config = PulseConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.model.provider, None);
        config.validate().unwrap();
    }

    #[test]
    fn test_numeric_overrides() {
        let config = PulseConfig::from_lookup(lookup(&[
            ("PULSE_MAX_ATTEMPTS", "5"),
            ("PULSE_MAX_INPUT_BYTES", "4096"),
            ("PULSE_DB_PATH", "/tmp/retail.db"),
        ]))
        .unwrap();
        assert_eq!(config.model.retry.max_attempts, 5);
        assert_eq!(config.prompt.max_input_bytes, 4096);
        assert_eq!(config.source.database_path, PathBuf::from("/tmp/retail.db"));

        let err = PulseConfig::from_lookup(lookup(&[("PULSE_POOL_SIZE", "many")])).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_high_temperature_rejected() {
        let config = PulseConfig::from_lookup(lookup(&[("PULSE_TEMPERATURE", "0.9")])).unwrap();
        assert!(matches!(config.validate(), Err(PulseError::Configuration(_))));

        let mut config = PulseConfig::default();
        config.model.temperature = MAX_TEMPERATURE;
        config.validate().unwrap();
    }

    #[test]
    fn test_api_key_not_serialized() {
        let config = PulseConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "secret")])).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
