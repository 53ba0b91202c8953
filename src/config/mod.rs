//! Service configuration.
//!
//! Precedence, lowest first: built-in defaults, the optional JSON file named
//! by `DASHFORGE_CONFIG`, then individual environment variables. A `.env`
//! file in the working directory is loaded into the environment first.
//!
//! Recognised variables:
//! - `DASHFORGE_HOST`, `DASHFORGE_PORT`
//! - `OPENROUTER_API_KEY`, `OPENROUTER_ENDPOINT`
//! - `DASHFORGE_MAX_RETRIES`, `DASHFORGE_MAX_RETRIES_LIMIT`
//! - `DASHFORGE_USE_AUGMENTATION`
//! - `DASHFORGE_RETRY_BACKOFF` (`none` | `fixed` | `exponential`),
//!   `DASHFORGE_RETRY_DELAY_MS`, `DASHFORGE_RETRY_MAX_DELAY_MS`
//! - `DASHFORGE_BACKEND_TIMEOUT_SECS`
//! - `DASHFORGE_REVALIDATE_FEEDBACK`

mod models;

pub use models::{ModelProvider, ModelRegistry, ModelSpec, UnknownProvider};

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::{FeedbackPolicy, RetryBackoff};

const DEFAULT_RETRY_DELAY_MS: u64 = 500;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Defaults and limits of the generation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Retry budget used when a request does not name one.
    pub max_retries: u32,
    /// Largest retry budget a caller may ask for.
    pub max_retries_limit: u32,
    /// Augmentation toggle used when a request does not name one.
    pub use_augmentation: bool,
    /// Delay policy between automated attempts.
    pub retry_backoff: RetryBackoff,
    /// Longest single retry delay, for the default policy and for callers'.
    pub max_retry_delay_ms: u64,
    /// Upper bound for any single back-end call.
    pub backend_timeout_secs: u64,
    /// What to do with a reviewer's document.
    pub feedback_policy: FeedbackPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retries_limit: 10,
            use_augmentation: true,
            retry_backoff: RetryBackoff::None,
            max_retry_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            backend_timeout_secs: 120,
            feedback_policy: FeedbackPolicy::Trust,
        }
    }
}

impl PipelineConfig {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}

/// Shape of the optional JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    host: Option<String>,
    port: Option<u16>,
    pipeline: Option<PipelineConfig>,
    models: Option<ModelRegistry>,
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// OpenRouter API key. Only the server binary requires it.
    pub api_key: Option<String>,
    /// Override of the chat-completions endpoint.
    pub llm_endpoint: Option<String>,
    pub pipeline: PipelineConfig,
    pub models: ModelRegistry,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            api_key: None,
            llm_endpoint: None,
            pipeline: PipelineConfig::default(),
            models: ModelRegistry::default(),
        }
    }
}

impl Config {
    /// Load configuration from `.env`, the process environment, and the
    /// optional config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Config::default();

        if let Some(path) = var("DASHFORGE_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }

        if let Some(host) = var("DASHFORGE_HOST") {
            config.host = host;
        }
        if let Some(port) = var("DASHFORGE_PORT") {
            config.port = parse("DASHFORGE_PORT", &port)?;
        }
        config.api_key = var("OPENROUTER_API_KEY");
        config.llm_endpoint = var("OPENROUTER_ENDPOINT");

        let pipeline = &mut config.pipeline;
        if let Some(v) = var("DASHFORGE_MAX_RETRIES") {
            pipeline.max_retries = parse("DASHFORGE_MAX_RETRIES", &v)?;
        }
        if let Some(v) = var("DASHFORGE_MAX_RETRIES_LIMIT") {
            pipeline.max_retries_limit = parse("DASHFORGE_MAX_RETRIES_LIMIT", &v)?;
        }
        if let Some(v) = var("DASHFORGE_USE_AUGMENTATION") {
            pipeline.use_augmentation = parse_bool("DASHFORGE_USE_AUGMENTATION", &v)?;
        }
        if let Some(v) = var("DASHFORGE_BACKEND_TIMEOUT_SECS") {
            pipeline.backend_timeout_secs = parse("DASHFORGE_BACKEND_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("DASHFORGE_REVALIDATE_FEEDBACK") {
            pipeline.feedback_policy = if parse_bool("DASHFORGE_REVALIDATE_FEEDBACK", &v)? {
                FeedbackPolicy::Revalidate
            } else {
                FeedbackPolicy::Trust
            };
        }
        if let Some(v) = var("DASHFORGE_RETRY_MAX_DELAY_MS") {
            pipeline.max_retry_delay_ms = parse("DASHFORGE_RETRY_MAX_DELAY_MS", &v)?;
        }
        if let Some(kind) = var("DASHFORGE_RETRY_BACKOFF") {
            let delay_ms = match var("DASHFORGE_RETRY_DELAY_MS") {
                Some(v) => parse("DASHFORGE_RETRY_DELAY_MS", &v)?,
                None => DEFAULT_RETRY_DELAY_MS,
            };
            let max_ms = pipeline.max_retry_delay_ms;
            pipeline.retry_backoff = match kind.trim().to_ascii_lowercase().as_str() {
                "none" => RetryBackoff::None,
                "fixed" => RetryBackoff::Fixed { delay_ms },
                "exponential" => RetryBackoff::Exponential {
                    base_ms: delay_ms,
                    max_ms,
                },
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "DASHFORGE_RETRY_BACKOFF",
                        value: kind,
                        reason: "expected none, fixed or exponential".to_string(),
                    })
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(host) = file.host {
            self.host = host;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(pipeline) = file.pipeline {
            self.pipeline = pipeline;
        }
        if let Some(models) = file.models {
            self.models = std::mem::take(&mut self.models).merge(models);
        }
        tracing::info!("Loaded configuration file {}", path.display());
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.max_retries > self.pipeline.max_retries_limit {
            return Err(ConfigError::Invalid {
                key: "DASHFORGE_MAX_RETRIES",
                value: self.pipeline.max_retries.to_string(),
                reason: format!(
                    "exceeds the retry limit of {}",
                    self.pipeline.max_retries_limit
                ),
            });
        }
        if self.pipeline.retry_backoff.longest_delay() > self.pipeline.max_retry_delay() {
            return Err(ConfigError::Invalid {
                key: "DASHFORGE_RETRY_DELAY_MS",
                value: format!("{:?}", self.pipeline.retry_backoff),
                reason: format!(
                    "retry delay exceeds the maximum of {} ms",
                    self.pipeline.max_retry_delay_ms
                ),
            });
        }
        if self.pipeline.backend_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "DASHFORGE_BACKEND_TIMEOUT_SECS",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if !self.models.contains(ModelProvider::default()) {
            return Err(ConfigError::Invalid {
                key: "DASHFORGE_CONFIG",
                value: "models".to_string(),
                reason: format!("no model registered for {}", ModelProvider::default()),
            });
        }
        Ok(())
    }

    /// The API key, or an error naming the missing variable.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or(ConfigError::Missing("OPENROUTER_API_KEY"))
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.pipeline.max_retries, 3);
        assert!(config.pipeline.use_augmentation);
        assert_eq!(config.pipeline.retry_backoff, RetryBackoff::None);
        assert_eq!(config.pipeline.feedback_policy, FeedbackPolicy::Trust);
        assert!(config.require_api_key().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DASHFORGE_PORT", "9100"),
            ("OPENROUTER_API_KEY", "sk-test"),
            ("DASHFORGE_MAX_RETRIES", "5"),
            ("DASHFORGE_USE_AUGMENTATION", "false"),
            ("DASHFORGE_RETRY_BACKOFF", "exponential"),
            ("DASHFORGE_RETRY_DELAY_MS", "250"),
            ("DASHFORGE_REVALIDATE_FEEDBACK", "yes"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.require_api_key().unwrap(), "sk-test");
        assert_eq!(config.pipeline.max_retries, 5);
        assert!(!config.pipeline.use_augmentation);
        assert_eq!(
            config.pipeline.retry_backoff,
            RetryBackoff::Exponential {
                base_ms: 250,
                max_ms: DEFAULT_RETRY_MAX_DELAY_MS
            }
        );
        assert_eq!(config.pipeline.feedback_policy, FeedbackPolicy::Revalidate);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = Config::from_lookup(lookup(&[("DASHFORGE_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DASHFORGE_PORT", .. }));

        let err = Config::from_lookup(lookup(&[("DASHFORGE_RETRY_BACKOFF", "jitter")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DASHFORGE_RETRY_BACKOFF", .. }));

        let err = Config::from_lookup(lookup(&[("DASHFORGE_MAX_RETRIES", "50")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DASHFORGE_MAX_RETRIES", .. }));

        let err = Config::from_lookup(lookup(&[
            ("DASHFORGE_RETRY_BACKOFF", "fixed"),
            ("DASHFORGE_RETRY_DELAY_MS", "60000"),
            ("DASHFORGE_RETRY_MAX_DELAY_MS", "10000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DASHFORGE_RETRY_DELAY_MS", .. }));
    }

    #[test]
    fn test_config_file_is_overlaid_by_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "port": 7000,
                "pipeline": {{"max_retries": 1, "retry_backoff": {{"kind": "fixed", "delay_ms": 100}}}},
                "models": {{"o3-mini": {{"model_id": "openai/o3-mini-high", "display_name": "o3-mini high"}}}}
            }}"#
        )
        .unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = Config::from_lookup(lookup(&[
            ("DASHFORGE_CONFIG", path.as_str()),
            ("DASHFORGE_PORT", "7001"),
        ]))
        .unwrap();
        assert_eq!(config.port, 7001);
        assert_eq!(config.pipeline.max_retries, 1);
        assert_eq!(config.pipeline.max_retries_limit, 10);
        assert_eq!(config.pipeline.retry_backoff, RetryBackoff::Fixed { delay_ms: 100 });
        assert_eq!(
            config.models.get(ModelProvider::O3Mini).unwrap().model_id,
            "openai/o3-mini-high"
        );
        assert!(config.models.contains(ModelProvider::Anthropic));
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::from_lookup(lookup(&[("DASHFORGE_CONFIG", "/nonexistent/dashforge.json")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
