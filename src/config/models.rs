//! Provider selectors and the model registry.
//!
//! Callers pick a provider selector; the registry turns it into a concrete
//! model id plus sampling options. The registry is built once at startup and
//! handed to the back-ends explicitly.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::llm::ChatOptions;

/// Provider selector accepted from callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelProvider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    #[serde(rename = "o3-mini")]
    O3Mini,
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl ModelProvider {
    pub const ALL: [ModelProvider; 4] = [
        ModelProvider::OpenAi,
        ModelProvider::Gpt4o,
        ModelProvider::O3Mini,
        ModelProvider::Anthropic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gpt4o => "gpt-4o",
            Self::O3Mini => "o3-mini",
            Self::Anthropic => "anthropic",
        }
    }
}

impl Default for ModelProvider {
    fn default() -> Self {
        Self::Gpt4o
    }
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unknown provider selector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported model provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ModelProvider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}

/// Concrete model behind a provider selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Upstream model id (e.g. "openai/gpt-4o").
    pub model_id: String,
    /// Human-readable label for listings.
    pub display_name: String,
    #[serde(default)]
    pub options: ChatOptions,
}

/// Immutable mapping from provider selectors to models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelRegistry {
    models: BTreeMap<ModelProvider, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        models.insert(
            ModelProvider::OpenAi,
            ModelSpec {
                model_id: "openai/gpt-4-turbo".to_string(),
                display_name: "OpenAI GPT-4 Turbo".to_string(),
                options: ChatOptions {
                    temperature: Some(0.1),
                    ..ChatOptions::default()
                },
            },
        );
        models.insert(
            ModelProvider::Gpt4o,
            ModelSpec {
                model_id: "openai/gpt-4o".to_string(),
                display_name: "OpenAI GPT-4o (Default)".to_string(),
                options: ChatOptions {
                    temperature: Some(0.1),
                    top_p: Some(0.1),
                    max_tokens: Some(4096),
                },
            },
        );
        models.insert(
            ModelProvider::O3Mini,
            ModelSpec {
                model_id: "openai/o3-mini".to_string(),
                display_name: "OpenAI o3-mini".to_string(),
                options: ChatOptions {
                    temperature: Some(0.1),
                    top_p: Some(0.2),
                    max_tokens: Some(2048),
                },
            },
        );
        models.insert(
            ModelProvider::Anthropic,
            ModelSpec {
                model_id: "anthropic/claude-3-opus".to_string(),
                display_name: "Anthropic Claude 3 Opus".to_string(),
                options: ChatOptions {
                    temperature: Some(0.1),
                    ..ChatOptions::default()
                },
            },
        );
        Self { models }
    }
}

impl ModelRegistry {
    pub fn empty() -> Self {
        Self {
            models: BTreeMap::new(),
        }
    }

    pub fn with_model(mut self, provider: ModelProvider, spec: ModelSpec) -> Self {
        self.models.insert(provider, spec);
        self
    }

    pub fn get(&self, provider: ModelProvider) -> Option<&ModelSpec> {
        self.models.get(&provider)
    }

    pub fn contains(&self, provider: ModelProvider) -> bool {
        self.models.contains_key(&provider)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModelProvider, &ModelSpec)> {
        self.models.iter().map(|(p, s)| (*p, s))
    }

    /// Entries of `other` replace ours; providers it omits are kept.
    pub fn merge(mut self, other: ModelRegistry) -> Self {
        self.models.extend(other.models);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provider() {
        assert_eq!("gpt-4o".parse::<ModelProvider>().unwrap(), ModelProvider::Gpt4o);
        assert_eq!(" Anthropic ".parse::<ModelProvider>().unwrap(), ModelProvider::Anthropic);
        assert!("llama".parse::<ModelProvider>().is_err());
    }

    #[test]
    fn test_provider_serde_names_match_selectors() {
        for provider in ModelProvider::ALL {
            let json = serde_json::to_value(provider).unwrap();
            assert_eq!(json, serde_json::Value::String(provider.as_str().to_string()));
        }
    }

    #[test]
    fn test_default_registry_covers_every_provider() {
        let registry = ModelRegistry::default();
        for provider in ModelProvider::ALL {
            assert!(registry.contains(provider), "missing {}", provider);
        }
        let gpt4o = registry.get(ModelProvider::Gpt4o).unwrap();
        assert_eq!(gpt4o.options.max_tokens, Some(4096));
    }

    #[test]
    fn test_merge_overrides_single_entry() {
        let overlay: ModelRegistry = serde_json::from_value(serde_json::json!({
            "anthropic": {"model_id": "anthropic/claude-3.5-sonnet", "display_name": "Sonnet"}
        }))
        .unwrap();
        let merged = ModelRegistry::default().merge(overlay);
        assert_eq!(
            merged.get(ModelProvider::Anthropic).unwrap().model_id,
            "anthropic/claude-3.5-sonnet"
        );
        assert_eq!(merged.get(ModelProvider::Gpt4o).unwrap().model_id, "openai/gpt-4o");
    }
}
