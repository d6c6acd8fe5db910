//! Model profile resolution.
//!
//! A [`ModelProfile`] is the fully resolved LLM binding for one task run:
//! provider, endpoint, credentials, model id, and sampling knobs.  Profiles
//! are resolved once at run start (config first, `<PROVIDER>_*` environment
//! variables as fallback) and validated before the first request is sent.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AgentError, Result};

/// Default request timeout for LLM calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Providers with well-known endpoint defaults.
const PROVIDER_DEFAULTS: &[(&str, &str, bool)] = &[
    // (provider, default base_url, requires api key)
    ("openai", "https://api.openai.com/v1", true),
    ("ollama", "http://localhost:11434/v1", false),
];

/// The resolved LLM binding used for every request in one task run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Provider name, e.g. `"openai"` or `"ollama"`.
    pub provider: String,
    /// Chat-completions endpoint base, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// API key (may be empty for local providers).
    #[serde(default)]
    pub api_key: String,
    /// Model identifier, e.g. `"gpt-4o"` or `"qwen2.5-coder"`.
    pub model_id: String,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens per response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Per-request timeout.
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl ModelProfile {
    /// Create a profile for an OpenAI-compatible endpoint.
    pub fn openai_compatible(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model_id: model_id.into(),
            temperature: Some(0.0),
            max_tokens: Some(4096),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Resolve a profile from `<PROVIDER>_API_KEY`, `<PROVIDER>_BASE_URL`,
    /// and `<PROVIDER>_MODEL`, falling back to provider defaults.
    pub fn from_env(provider: &str) -> Result<Self> {
        let prefix = provider.to_uppercase();
        let api_key = std::env::var(format!("{prefix}_API_KEY")).unwrap_or_default();
        let base_url = std::env::var(format!("{prefix}_BASE_URL"))
            .ok()
            .or_else(|| {
                PROVIDER_DEFAULTS
                    .iter()
                    .find(|(p, ..)| *p == provider)
                    .map(|(_, url, _)| (*url).to_owned())
            })
            .ok_or_else(|| AgentError::InvalidProfile {
                reason: format!("no base url configured for provider `{provider}`"),
            })?;
        let model_id =
            std::env::var(format!("{prefix}_MODEL")).map_err(|_| AgentError::InvalidProfile {
                reason: format!("{prefix}_MODEL is not set"),
            })?;

        let profile = Self::openai_compatible(provider, base_url, api_key, model_id);
        profile.validate()?;
        Ok(profile)
    }

    /// Check internal consistency; fails fast so a bad binding never reaches
    /// the first LLM call.
    pub fn validate(&self) -> Result<()> {
        if self.model_id.is_empty() {
            return Err(AgentError::InvalidProfile {
                reason: "model id is empty".into(),
            });
        }

        let url = Url::parse(&self.base_url).map_err(|e| AgentError::InvalidProfile {
            reason: format!("base url `{}` is invalid: {e}", self.base_url),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(AgentError::InvalidProfile {
                reason: format!("base url scheme `{}` is not http(s)", url.scheme()),
            });
        }

        if let Some((_, _, requires_key)) = PROVIDER_DEFAULTS
            .iter()
            .find(|(p, ..)| *p == self.provider)
        {
            if *requires_key && self.api_key.is_empty() {
                return Err(AgentError::MissingApiKey {
                    provider: self.provider.clone(),
                });
            }
        }

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(AgentError::InvalidProfile {
                    reason: format!("temperature {t} outside [0, 2]"),
                });
            }
        }

        Ok(())
    }

    /// The chat-completions endpoint for this profile.
    pub fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ModelProfile {
        ModelProfile::openai_compatible("openai", "https://api.openai.com/v1", "sk-test", "gpt-4o")
    }

    #[test]
    fn valid_profile_passes() {
        assert!(profile().validate().is_ok());
    }

    #[test]
    fn openai_without_key_fails_fast() {
        let mut p = profile();
        p.api_key.clear();
        assert!(matches!(
            p.validate(),
            Err(AgentError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn ollama_without_key_is_fine() {
        let p = ModelProfile::openai_compatible("ollama", "http://localhost:11434/v1", "", "qwen");
        assert!(p.validate().is_ok());
    }

    #[test]
    fn bad_base_url_fails() {
        let mut p = profile();
        p.base_url = "not a url".into();
        assert!(matches!(
            p.validate(),
            Err(AgentError::InvalidProfile { .. })
        ));
    }

    #[test]
    fn chat_url_joins_without_double_slash() {
        let mut p = profile();
        p.base_url = "https://api.openai.com/v1/".into();
        assert_eq!(p.chat_url(), "https://api.openai.com/v1/chat/completions");
    }
}
