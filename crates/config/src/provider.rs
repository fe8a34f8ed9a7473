//! Upstream LLM provider configuration.

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::headers::HeaderRule;

/// The wire protocol an upstream provider speaks.
///
/// `OpenAi` covers both genuine OpenAI and OpenAI-compatible aggregators such
/// as OpenRouter: the adapter only cares about the wire shape, and the two
/// are told apart solely by `base_url`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    /// Anthropic Messages API, used as-is (pass-through adapter).
    Anthropic,
    /// OpenAI Chat Completions wire format.
    OpenAi,
    /// Google Gemini `generateContent` / `streamGenerateContent` wire format.
    Google,
}

/// Configuration for a single configured upstream provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Which adapter handles requests routed to this provider.
    pub provider_type: ProviderType,

    /// API key used when no `${PROVIDER_NAME}_API_KEY` environment variable is set.
    pub api_key: Option<SecretString>,

    /// Override for the provider's default API base URL.
    pub base_url: Option<String>,

    /// Model-name prefixes this provider owns. The dispatcher selects the
    /// provider whose longest prefix matches the request's `model` string.
    pub models: Vec<String>,

    /// Static headers attached to every request sent to this provider.
    pub headers: Vec<HeaderRule>,
}

impl<'de> Deserialize<'de> for ProviderConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "snake_case")]
        struct Raw {
            r#type: ProviderType,
            #[serde(default)]
            api_key: Option<SecretString>,
            #[serde(default)]
            base_url: Option<String>,
            #[serde(default)]
            models: Vec<String>,
            #[serde(default)]
            headers: Vec<HeaderRule>,
        }

        let raw = Raw::deserialize(deserializer)?;

        Ok(Self {
            provider_type: raw.r#type,
            api_key: raw.api_key,
            base_url: raw.base_url,
            models: raw.models,
            headers: raw.headers,
        })
    }
}

/// The full set of configured upstream providers, keyed by provider name.
///
/// Provider name doubles as the credential-resolution key: a provider named
/// `openai` is checked against the `OPENAI_API_KEY` environment variable
/// before falling back to its configured `api_key`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ProvidersConfig {
    /// The underlying map of provider name to provider configuration.
    #[serde(flatten)]
    pub providers: IndexMap<String, ProviderConfig>,
}

impl ProvidersConfig {
    /// Find the provider whose configured model prefix is the longest match
    /// for `model`, returning its name and configuration.
    pub fn resolve(&self, model: &str) -> Option<(&str, &ProviderConfig)> {
        self.providers
            .iter()
            .filter_map(|(name, provider)| {
                provider
                    .models
                    .iter()
                    .filter(|prefix| model.starts_with(prefix.as_str()))
                    .map(|prefix| prefix.len())
                    .max()
                    .map(|len| (len, name.as_str(), provider))
            })
            .max_by_key(|(len, ..)| *len)
            .map(|(_, name, provider)| (name, provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use insta::assert_debug_snapshot;

    #[test]
    fn longest_prefix_wins() {
        let toml = indoc! {r#"
            [claude]
            type = "anthropic"
            models = ["claude-"]

            [claude-opus]
            type = "anthropic"
            models = ["claude-3-opus"]
        "#};

        let config: ProvidersConfig = toml::from_str(toml).unwrap();

        let (name, _) = config.resolve("claude-3-opus-20240229").unwrap();
        assert_eq!(name, "claude-opus");

        let (name, _) = config.resolve("claude-3-sonnet").unwrap();
        assert_eq!(name, "claude");
    }

    #[test]
    fn no_match_returns_none() {
        let config = ProvidersConfig::default();
        assert!(config.resolve("gpt-4").is_none());
    }

    #[test]
    fn deserializes_provider_kinds() {
        let toml = indoc! {r#"
            [openai]
            type = "open-ai"
            api_key = "sk-test"
            models = ["gpt-"]

            [openrouter]
            type = "open-ai"
            base_url = "https://openrouter.ai/api/v1"
            models = ["openrouter/"]

            [gemini]
            type = "google"
            models = ["gemini-"]
        "#};

        let config: ProvidersConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.providers["openai"].provider_type, ProviderType::OpenAi);
        assert_eq!(config.providers["gemini"].provider_type, ProviderType::Google);
        assert_debug_snapshot!(config.providers["openrouter"].base_url, @r#"
        Some(
            "https://openrouter.ai/api/v1",
        )
        "#);
    }
}
