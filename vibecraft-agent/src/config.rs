//! Configuration
//!
//! Read from TOML; every section and field has a default so an empty file
//! (or no file) is a working configuration. Secrets never live in the file:
//! the model and sandbox API keys are read from the environment variables the
//! file names.

use crate::agent::ModelBinding;
use crate::network::DEFAULT_MAX_ITER;
use crate::orchestrator::{RunSettings, DEFAULT_HISTORY_LIMIT, DEFAULT_TEMPLATE};
use crate::prompt::Prompts;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vibecraft_runtime::provider::OPENROUTER_BASE_URL;
use vibecraft_runtime::steps::RetryPolicy;
use vibecraft_runtime::{Error, ProviderConfig, QuotaPolicy, Result, DEFAULT_PREVIEW_PORT};

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "vibecraft.toml";

pub const DEFAULT_MODEL: &str = "deepseek/deepseek-r1-distill-llama-70b:free";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VibecraftConfig {
    pub model: ModelConfig,
    pub sandbox: SandboxConfig,
    pub network: NetworkConfig,
    pub steps: StepsConfig,
    pub store: StoreConfig,
    pub quota: QuotaConfig,
    pub prompts: Prompts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub model: String,
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: OPENROUTER_BASE_URL.to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 120,
            temperature: None,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub backend: SandboxBackend,
    pub template: String,
    pub preview_port: u16,
    pub local_root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    pub api_key_env: String,
    /// Domain preview hosts are served under (`{port}-{id}.{domain}`)
    pub domain: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::Local,
            template: DEFAULT_TEMPLATE.to_string(),
            preview_port: DEFAULT_PREVIEW_PORT,
            local_root: PathBuf::from(".vibecraft/sandboxes"),
            remote_url: None,
            api_key_env: "SANDBOX_API_KEY".to_string(),
            domain: "e2b.app".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub max_iter: usize,
    pub history_limit: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_iter: DEFAULT_MAX_ITER,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepsConfig {
    pub journal_dir: PathBuf,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for StepsConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            journal_dir: PathBuf::from(".vibecraft/steps"),
            max_attempts: policy.max_attempts,
            backoff_ms: policy.backoff.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".vibecraft/messages"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub free_points: u32,
    pub pro_points: u32,
    pub duration_secs: u64,
    pub generation_cost: u32,
    pub dir: PathBuf,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        let policy = QuotaPolicy::default();
        Self {
            free_points: policy.free_points,
            pro_points: policy.pro_points,
            duration_secs: policy.duration_secs,
            generation_cost: policy.generation_cost,
            dir: PathBuf::from(".vibecraft/usage"),
        }
    }
}

impl VibecraftConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config_invalid(format!("cannot read {}: {}", path.display(), e))
                .with_operation("config::from_file")
        })?;
        Self::from_toml(&content).map_err(|e| e.with_context("path", path.display().to_string()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| {
            Error::config_invalid(format!("invalid configuration: {}", e)).with_operation("config::parse")
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else `vibecraft.toml` in the working directory
    /// if present, else the defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(DEFAULT_CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::serialization_failed(e.to_string()).with_operation("config::to_toml"))
    }

    fn validate(&self) -> Result<()> {
        if self.network.max_iter == 0 {
            return Err(Error::config_invalid("network.max_iter must be at least 1"));
        }
        if self.steps.max_attempts == 0 {
            return Err(Error::config_invalid("steps.max_attempts must be at least 1"));
        }
        if self.sandbox.backend == SandboxBackend::Remote && self.sandbox.remote_url.is_none() {
            return Err(Error::config_invalid("sandbox.remote_url is required for the remote backend"));
        }
        Ok(())
    }

    /// Provider settings, with the API key taken from the environment
    pub fn provider_config(&self) -> ProviderConfig {
        let api_key = std::env::var(&self.model.api_key_env).ok().filter(|k| !k.is_empty());
        let config = if self.model.base_url == OPENROUTER_BASE_URL {
            ProviderConfig::openrouter(api_key.clone().unwrap_or_default(), &self.model.model)
        } else {
            ProviderConfig::local(&self.model.base_url, &self.model.model)
        };
        ProviderConfig { api_key, ..config }.with_timeout(self.model.timeout_secs)
    }

    pub fn sandbox_api_key(&self) -> Option<String> {
        std::env::var(&self.sandbox.api_key_env).ok().filter(|k| !k.is_empty())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.steps.max_attempts,
            backoff: Duration::from_millis(self.steps.backoff_ms),
        }
    }

    pub fn quota_policy(&self) -> QuotaPolicy {
        QuotaPolicy {
            free_points: self.quota.free_points,
            pro_points: self.quota.pro_points,
            duration_secs: self.quota.duration_secs,
            generation_cost: self.quota.generation_cost,
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            template: self.sandbox.template.clone(),
            preview_port: self.sandbox.preview_port,
            max_iter: self.network.max_iter,
            history_limit: self.network.history_limit,
            binding: ModelBinding {
                model: Some(self.model.model.clone()),
                temperature: self.model.temperature,
                max_tokens: self.model.max_tokens,
            },
            prompts: self.prompts.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vibecraft_runtime::ErrorKind;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = VibecraftConfig::from_toml("").unwrap();
        assert_eq!(config, VibecraftConfig::default());
        assert_eq!(config.network.max_iter, 15);
        assert_eq!(config.network.history_limit, 5);
        assert_eq!(config.sandbox.preview_port, 3000);
        assert_eq!(config.sandbox.template, "vibegourab");
        assert_eq!(config.quota.free_points, 5);
    }

    #[test]
    fn test_partial_sections() {
        let config = VibecraftConfig::from_toml(
            r#"
            [model]
            model = "openai/gpt-4o-mini"
            temperature = 0.2

            [sandbox]
            backend = "remote"
            remote_url = "https://api.sandbox.test"
            "#,
        )
        .unwrap();

        assert_eq!(config.model.model, "openai/gpt-4o-mini");
        assert_eq!(config.model.base_url, OPENROUTER_BASE_URL);
        assert_eq!(config.sandbox.backend, SandboxBackend::Remote);
        assert_eq!(config.sandbox.template, "vibegourab");

        let settings = config.run_settings();
        assert_eq!(settings.binding.model.as_deref(), Some("openai/gpt-4o-mini"));
        assert_eq!(settings.binding.temperature, Some(0.2));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = VibecraftConfig::from_toml("[network]\nmax_iter = 0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        let err = VibecraftConfig::from_toml("[sandbox]\nbackend = \"remote\"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        let err = VibecraftConfig::from_toml("network = 3").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vibecraft.toml");

        let mut config = VibecraftConfig::default();
        config.steps.max_attempts = 5;
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = VibecraftConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.retry_policy().max_attempts, 5);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = VibecraftConfig::from_file("/nonexistent/vibecraft.toml").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_custom_endpoint_uses_local_provider() {
        let mut config = VibecraftConfig::default();
        config.model.base_url = "http://localhost:11434/v1".into();
        config.model.api_key_env = "VIBECRAFT_TEST_UNSET_KEY".into();

        let provider = config.provider_config();
        assert_eq!(provider.name, "local");
        assert_eq!(provider.base_url, "http://localhost:11434/v1");
        assert!(provider.api_key.is_none());
        assert_eq!(provider.timeout_secs, 120);
    }
}
