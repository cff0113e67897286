// LLM provider adapters
//
// Every provider speaks the same capability set through [`LlmAdapter`]:
// batch translation plus a credentials health check. The concrete adapter is
// a single HTTP chat client ([`chat::ChatAdapter`]) parameterized by a wire
// profile; providers differ only in endpoint, auth header shape, body key
// names, and the response path to the assistant content.

pub mod chat;
pub mod prompt;

use async_trait::async_trait;
use std::fmt;

pub use chat::{ChatAdapter, WireProfile};

use crate::config::Settings;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Claude,
    DeepSeek,
    Glm,
}

impl LlmProvider {
    pub fn parse(id: &str) -> Option<Self> {
        match id.to_lowercase().as_str() {
            "openai" => Some(LlmProvider::OpenAi),
            "claude" => Some(LlmProvider::Claude),
            "deepseek" => Some(LlmProvider::DeepSeek),
            "glm" => Some(LlmProvider::Glm),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Claude => "claude",
            LlmProvider::DeepSeek => "deepseek",
            LlmProvider::Glm => "glm",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Uniform chat capability over all configured providers.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Translate a batch of texts, preserving count and order.
    async fn translate_batch(
        &self,
        texts: &[String],
        source_language: &str,
        target_language: &str,
    ) -> Result<Vec<String>>;

    /// Verify the credentials with a trivial request.
    async fn healthcheck(&self) -> Result<()>;
}

/// Connection parameters resolved for one provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub profile: WireProfile,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

/// Resolve a provider's connection parameters from settings, applying the
/// built-in endpoint defaults.
pub fn provider_config(provider: LlmProvider, settings: &Settings) -> ProviderConfig {
    match provider {
        LlmProvider::OpenAi => ProviderConfig {
            profile: WireProfile::OpenAi,
            base_url: settings
                .openai_base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: settings.openai_api_key.clone(),
            model: settings.openai_model.clone(),
        },
        LlmProvider::Claude => ProviderConfig {
            profile: WireProfile::Anthropic,
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_key: settings.claude_api_key.clone(),
            model: settings.claude_model.clone(),
        },
        LlmProvider::DeepSeek => ProviderConfig {
            profile: WireProfile::OpenAi,
            base_url: settings
                .deepseek_base_url
                .clone()
                .unwrap_or_else(|| "https://api.deepseek.com".to_string()),
            api_key: settings.deepseek_api_key.clone(),
            model: settings.deepseek_model.clone(),
        },
        LlmProvider::Glm => ProviderConfig {
            profile: WireProfile::OpenAi,
            base_url: settings
                .glm_base_url
                .clone()
                .unwrap_or_else(|| "https://open.bigmodel.cn/api/paas/v4".to_string()),
            api_key: settings.glm_api_key.clone(),
            model: settings.glm_model.clone(),
        },
    }
}

/// Build the adapter for a provider id using the current settings.
pub fn adapter_for(provider_id: &str, settings: &Settings) -> Result<Box<dyn LlmAdapter>> {
    let provider = LlmProvider::parse(provider_id)
        .ok_or_else(|| AppError::User(format!("Unknown LLM provider: {provider_id}")))?;
    let config = provider_config(provider, settings);
    if config.api_key.is_empty() {
        return Err(AppError::Auth(format!(
            "{provider} API key not configured"
        )));
    }
    Ok(Box::new(ChatAdapter::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!(LlmProvider::parse("openai"), Some(LlmProvider::OpenAi));
        assert_eq!(LlmProvider::parse("Claude"), Some(LlmProvider::Claude));
        assert_eq!(LlmProvider::parse("ollama"), None);
    }

    #[test]
    fn test_provider_config_defaults() {
        let settings = Settings::default();
        let openai = provider_config(LlmProvider::OpenAi, &settings);
        assert_eq!(openai.base_url, "https://api.openai.com/v1");
        assert_eq!(openai.model, "gpt-4o-mini");
        assert_eq!(openai.profile, WireProfile::OpenAi);

        let claude = provider_config(LlmProvider::Claude, &settings);
        assert_eq!(claude.profile, WireProfile::Anthropic);
        assert_eq!(claude.model, "claude-sonnet-4-20250514");

        let deepseek = provider_config(LlmProvider::DeepSeek, &settings);
        assert_eq!(deepseek.base_url, "https://api.deepseek.com");
    }

    #[test]
    fn test_provider_config_honors_overrides() {
        let mut settings = Settings::default();
        settings.openai_base_url = Some("http://localhost:11434/v1".to_string());
        let config = provider_config(LlmProvider::OpenAi, &settings);
        assert_eq!(config.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_adapter_for_requires_key() {
        let settings = Settings::default();
        match adapter_for("openai", &settings) {
            Err(AppError::Auth(_)) => {}
            Err(e) => panic!("expected auth error, got Err({e:?})"),
            Ok(_) => panic!("expected auth error, got Ok"),
        }
        match adapter_for("nonsense", &settings) {
            Err(AppError::User(_)) => {}
            Err(e) => panic!("expected user error, got Err({e:?})"),
            Ok(_) => panic!("expected user error, got Ok"),
        }
    }
}
