//! Settings endpoints: the persisted singleton, provider catalog, language
//! catalog, and LLM connectivity test.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ApiError, ApiResult, AppState};
use crate::config::Settings;
use crate::lang;
use crate::llm::{self, ChatAdapter, LlmAdapter, LlmProvider};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/settings", get(get_settings).put(update_settings))
        .route("/api/settings/llm-providers", get(llm_providers))
        .route("/api/settings/languages", get(languages))
        .route("/api/settings/test-llm", post(test_llm))
}

/// Settings as presented to clients: API keys are masked.
#[derive(Debug, Serialize)]
pub struct SettingsView {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub claude_api_key: Option<String>,
    pub claude_model: String,
    pub deepseek_api_key: Option<String>,
    pub deepseek_model: String,
    pub deepseek_base_url: Option<String>,
    pub glm_api_key: Option<String>,
    pub glm_model: String,
    pub glm_base_url: Option<String>,
    pub default_llm: String,
    pub target_language: String,
    pub source_language: String,
    pub bilingual_output: bool,
    pub subtitle_output_format: String,
    pub overwrite_mkv: bool,
    pub max_concurrent_tasks: usize,
}

impl SettingsView {
    fn from_settings(settings: &Settings) -> Self {
        Self {
            openai_api_key: mask_key(&settings.openai_api_key),
            openai_model: settings.openai_model.clone(),
            openai_base_url: settings.openai_base_url.clone(),
            claude_api_key: mask_key(&settings.claude_api_key),
            claude_model: settings.claude_model.clone(),
            deepseek_api_key: mask_key(&settings.deepseek_api_key),
            deepseek_model: settings.deepseek_model.clone(),
            deepseek_base_url: settings.deepseek_base_url.clone(),
            glm_api_key: mask_key(&settings.glm_api_key),
            glm_model: settings.glm_model.clone(),
            glm_base_url: settings.glm_base_url.clone(),
            default_llm: settings.default_llm.clone(),
            target_language: settings.target_language.clone(),
            source_language: settings.source_language.clone(),
            bilingual_output: settings.bilingual_output,
            subtitle_output_format: settings.subtitle_output_format.clone(),
            overwrite_mkv: settings.overwrite_mkv,
            max_concurrent_tasks: settings.max_concurrent_tasks,
        }
    }
}

/// Mask an API key for display: short keys collapse entirely, longer keys
/// keep a recognizable prefix and suffix.
fn mask_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return None;
    }
    if key.len() <= 8 {
        return Some("***".to_string());
    }
    Some(format!("{}...{}", &key[..3], &key[key.len() - 4..]))
}

/// A client echoing back a masked key means "keep what you have".
fn is_masked(value: &str) -> bool {
    value == "***" || value.contains("...")
}

async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<SettingsView>> {
    let settings = state.settings.snapshot();
    Ok(Json(SettingsView::from_settings(&settings)))
}

#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub claude_api_key: Option<String>,
    pub claude_model: Option<String>,
    pub deepseek_api_key: Option<String>,
    pub deepseek_model: Option<String>,
    pub deepseek_base_url: Option<String>,
    pub glm_api_key: Option<String>,
    pub glm_model: Option<String>,
    pub glm_base_url: Option<String>,
    pub default_llm: Option<String>,
    pub target_language: Option<String>,
    pub source_language: Option<String>,
    pub bilingual_output: Option<bool>,
    pub subtitle_output_format: Option<String>,
    pub overwrite_mkv: Option<bool>,
    pub max_concurrent_tasks: Option<usize>,
}

impl SettingsUpdate {
    fn into_entries(self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = Vec::new();
        let mut push = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                // Masked keys echoed back from the UI are not real values.
                if key.ends_with("_api_key") && is_masked(&value) {
                    return;
                }
                entries.push((key.to_string(), value));
            }
        };

        push("openai_api_key", self.openai_api_key);
        push("openai_model", self.openai_model);
        push("openai_base_url", self.openai_base_url);
        push("claude_api_key", self.claude_api_key);
        push("claude_model", self.claude_model);
        push("deepseek_api_key", self.deepseek_api_key);
        push("deepseek_model", self.deepseek_model);
        push("deepseek_base_url", self.deepseek_base_url);
        push("glm_api_key", self.glm_api_key);
        push("glm_model", self.glm_model);
        push("glm_base_url", self.glm_base_url);
        push("default_llm", self.default_llm);
        push("target_language", self.target_language);
        push("source_language", self.source_language);
        push("bilingual_output", self.bilingual_output.map(|v| v.to_string()));
        push("subtitle_output_format", self.subtitle_output_format);
        push("overwrite_mkv", self.overwrite_mkv.map(|v| v.to_string()));
        push(
            "max_concurrent_tasks",
            self.max_concurrent_tasks.map(|v| v.to_string()),
        );
        entries
    }
}

async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<Json<SettingsView>> {
    let entries = update.into_entries();
    let settings = state.settings.update(&entries).await?;
    state
        .scheduler
        .set_max_concurrent(settings.max_concurrent_tasks);
    Ok(Json(SettingsView::from_settings(&settings)))
}

async fn llm_providers() -> Json<Value> {
    Json(json!({
        "providers": [
            {
                "id": "openai",
                "name": "OpenAI",
                "models": ["gpt-4o-mini", "gpt-4o", "gpt-4-turbo"],
            },
            {
                "id": "claude",
                "name": "Claude",
                "models": [
                    "claude-sonnet-4-20250514",
                    "claude-opus-4-20250514",
                    "claude-3-5-haiku-20241022",
                ],
            },
            {
                "id": "deepseek",
                "name": "DeepSeek",
                "models": ["deepseek-chat", "deepseek-reasoner"],
            },
            {
                "id": "glm",
                "name": "GLM",
                "models": ["glm-4-flash", "glm-4-plus"],
            },
        ]
    }))
}

async fn languages() -> Json<Value> {
    let languages: Vec<Value> = lang::LANGUAGES
        .iter()
        .map(|(code, name)| json!({"code": code, "name": name}))
        .collect();
    Json(json!({"languages": languages}))
}

#[derive(Debug, Deserialize)]
pub struct LlmTestRequest {
    pub provider: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

async fn test_llm(
    State(state): State<AppState>,
    Json(request): Json<LlmTestRequest>,
) -> ApiResult<Json<Value>> {
    let provider = LlmProvider::parse(&request.provider)
        .ok_or_else(|| ApiError::BadRequest("Unknown provider".to_string()))?;

    let settings = state.settings.snapshot();
    let mut config = llm::provider_config(provider, &settings);

    if let Some(api_key) = request.api_key.as_deref() {
        if !api_key.is_empty() && !is_masked(api_key) {
            config.api_key = api_key.to_string();
        }
    }
    if let Some(model) = request.model {
        if !model.is_empty() {
            config.model = model;
        }
    }
    if provider != LlmProvider::Claude {
        if let Some(base_url) = request.base_url {
            if !base_url.is_empty() {
                config.base_url = base_url;
            }
        }
    }

    if config.api_key.is_empty() {
        return Err(ApiError::BadRequest("API key is required".to_string()));
    }

    let adapter = ChatAdapter::new(config).map_err(ApiError::from)?;
    adapter.healthcheck().await.map_err(ApiError::from)?;
    Ok(Json(json!({"status": "ok"})))
}
