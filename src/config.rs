use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::db;
use crate::error::{AppError, Result};

/// Server-level configuration: where to listen and where data lives.
/// Loaded from an optional TOML file and overridden by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    pub bind: String,
    /// Directory holding the database and per-task scratch space
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("app.db")
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.data_dir.join("scratch")
    }
}

/// Application settings singleton.
///
/// Defaults are seeded from environment variables (keys uppercased), then
/// overlaid with whatever has been persisted to the `app_settings` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: Option<String>,

    pub claude_api_key: String,
    pub claude_model: String,

    pub deepseek_api_key: String,
    pub deepseek_model: String,
    pub deepseek_base_url: Option<String>,

    pub glm_api_key: String,
    pub glm_model: String,
    pub glm_base_url: Option<String>,

    pub default_llm: String,

    pub target_language: String,
    pub source_language: String,
    pub bilingual_output: bool,
    /// Output placement: "mkv" (mux), "srt" or "ass" (sibling file)
    pub subtitle_output_format: String,
    pub overwrite_mkv: bool,

    pub max_concurrent_tasks: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_model: "gpt-4o-mini".to_string(),
            openai_base_url: None,
            claude_api_key: String::new(),
            claude_model: "claude-sonnet-4-20250514".to_string(),
            deepseek_api_key: String::new(),
            deepseek_model: "deepseek-chat".to_string(),
            deepseek_base_url: Some("https://api.deepseek.com".to_string()),
            glm_api_key: String::new(),
            glm_model: "glm-4-flash".to_string(),
            glm_base_url: Some("https://open.bigmodel.cn/api/paas/v4".to_string()),
            default_llm: "openai".to_string(),
            target_language: "Chinese".to_string(),
            source_language: "auto".to_string(),
            bilingual_output: false,
            subtitle_output_format: "mkv".to_string(),
            overwrite_mkv: false,
            max_concurrent_tasks: 2,
        }
    }
}

/// Keys accepted by [`Settings::apply_kv`] and mirrored by env variables.
pub const SETTING_KEYS: &[&str] = &[
    "openai_api_key",
    "openai_model",
    "openai_base_url",
    "claude_api_key",
    "claude_model",
    "deepseek_api_key",
    "deepseek_model",
    "deepseek_base_url",
    "glm_api_key",
    "glm_model",
    "glm_base_url",
    "default_llm",
    "target_language",
    "source_language",
    "bilingual_output",
    "subtitle_output_format",
    "overwrite_mkv",
    "max_concurrent_tasks",
];

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

impl Settings {
    /// Defaults with environment overrides (`OPENAI_API_KEY`, ...).
    pub fn from_env() -> Self {
        let mut settings = Settings::default();
        for key in SETTING_KEYS {
            if let Ok(value) = std::env::var(key.to_uppercase()) {
                settings.apply_kv(key, &value);
            }
        }
        settings
    }

    /// Apply one persisted key/value pair. Unknown keys are ignored.
    pub fn apply_kv(&mut self, key: &str, value: &str) {
        match key {
            "openai_api_key" => self.openai_api_key = value.to_string(),
            "openai_model" => self.openai_model = value.to_string(),
            "openai_base_url" => self.openai_base_url = non_empty(value),
            "claude_api_key" => self.claude_api_key = value.to_string(),
            "claude_model" => self.claude_model = value.to_string(),
            "deepseek_api_key" => self.deepseek_api_key = value.to_string(),
            "deepseek_model" => self.deepseek_model = value.to_string(),
            "deepseek_base_url" => self.deepseek_base_url = non_empty(value),
            "glm_api_key" => self.glm_api_key = value.to_string(),
            "glm_model" => self.glm_model = value.to_string(),
            "glm_base_url" => self.glm_base_url = non_empty(value),
            "default_llm" => self.default_llm = value.to_string(),
            "target_language" => self.target_language = value.to_string(),
            "source_language" => self.source_language = value.to_string(),
            "bilingual_output" => self.bilingual_output = parse_bool(value),
            "subtitle_output_format" => self.subtitle_output_format = value.to_string(),
            "overwrite_mkv" => self.overwrite_mkv = parse_bool(value),
            "max_concurrent_tasks" => {
                if let Ok(n) = value.parse::<usize>() {
                    self.max_concurrent_tasks = n;
                }
            }
            _ => {}
        }
    }

    /// Enforce the mutual constraints between output settings:
    /// overwriting an MKV implies MKV output, and a subtitle-file output
    /// format implies no in-place overwrite. Also clamps worker count.
    pub fn normalize(&mut self) {
        if !matches!(self.subtitle_output_format.as_str(), "mkv" | "srt" | "ass") {
            self.subtitle_output_format = "mkv".to_string();
        }
        if self.overwrite_mkv {
            self.subtitle_output_format = "mkv".to_string();
        } else if self.subtitle_output_format != "mkv" {
            self.overwrite_mkv = false;
        }
        self.max_concurrent_tasks = self.max_concurrent_tasks.clamp(1, 10);
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Database-backed settings singleton with a cheap shared snapshot.
///
/// Readers clone an `Arc<Settings>`; writers persist to `app_settings`,
/// rebuild the merged view, and swap the snapshot under a write lock.
pub struct SettingsStore {
    db: SqlitePool,
    current: RwLock<Arc<Settings>>,
}

impl SettingsStore {
    pub async fn load(db: SqlitePool) -> Result<Self> {
        let settings = Self::merged(&db).await?;
        info!(
            default_llm = %settings.default_llm,
            target_language = %settings.target_language,
            max_concurrent_tasks = settings.max_concurrent_tasks,
            "Settings loaded"
        );
        Ok(Self {
            db,
            current: RwLock::new(Arc::new(settings)),
        })
    }

    async fn merged(db: &SqlitePool) -> Result<Settings> {
        let mut settings = Settings::from_env();
        for (key, value) in db::settings::load_all(db).await? {
            settings.apply_kv(&key, &value);
        }
        settings.normalize();
        Ok(settings)
    }

    /// Current settings snapshot. Never blocks on I/O.
    pub fn snapshot(&self) -> Arc<Settings> {
        self.current.read().expect("settings lock poisoned").clone()
    }

    /// Persist the given key/value pairs, then refresh the snapshot.
    /// The normalized output constraint is written back so the stored state
    /// never contradicts itself.
    pub async fn update(&self, entries: &[(String, String)]) -> Result<Arc<Settings>> {
        for (key, value) in entries {
            db::settings::set(&self.db, key, value).await?;
        }

        let settings = Self::merged(&self.db).await?;
        db::settings::set(
            &self.db,
            "subtitle_output_format",
            &settings.subtitle_output_format,
        )
        .await?;
        db::settings::set(&self.db, "overwrite_mkv", &settings.overwrite_mkv.to_string()).await?;

        let arc = Arc::new(settings);
        *self.current.write().expect("settings lock poisoned") = arc.clone();
        Ok(arc)
    }

    /// Raw stored value for a key, bypassing env defaults. Used to resolve
    /// masked API keys on the settings endpoints.
    pub async fn stored_value(&self, key: &str) -> Result<Option<String>> {
        db::settings::get(&self.db, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.openai_model, "gpt-4o-mini");
        assert_eq!(s.target_language, "Chinese");
        assert_eq!(s.max_concurrent_tasks, 2);
        assert!(!s.bilingual_output);
    }

    #[test]
    fn test_normalize_overwrite_forces_mkv() {
        let mut s = Settings::default();
        s.subtitle_output_format = "srt".to_string();
        s.overwrite_mkv = true;
        s.normalize();
        assert_eq!(s.subtitle_output_format, "mkv");
        assert!(s.overwrite_mkv);
    }

    #[test]
    fn test_normalize_subtitle_format_clears_overwrite() {
        let mut s = Settings::default();
        s.overwrite_mkv = false;
        s.subtitle_output_format = "ass".to_string();
        s.normalize();
        assert_eq!(s.subtitle_output_format, "ass");
        assert!(!s.overwrite_mkv);
    }

    #[test]
    fn test_normalize_rejects_unknown_format_and_clamps_workers() {
        let mut s = Settings::default();
        s.subtitle_output_format = "vtt".to_string();
        s.max_concurrent_tasks = 99;
        s.normalize();
        assert_eq!(s.subtitle_output_format, "mkv");
        assert_eq!(s.max_concurrent_tasks, 10);
    }

    #[test]
    fn test_apply_kv_parses_types() {
        let mut s = Settings::default();
        s.apply_kv("bilingual_output", "true");
        s.apply_kv("max_concurrent_tasks", "5");
        s.apply_kv("openai_base_url", "");
        s.apply_kv("nonsense_key", "ignored");
        assert!(s.bilingual_output);
        assert_eq!(s.max_concurrent_tasks, 5);
        assert_eq!(s.openai_base_url, None);
    }

    #[tokio::test]
    async fn test_store_update_and_snapshot() {
        let pool = crate::db::test_pool().await;
        let store = SettingsStore::load(pool).await.unwrap();
        assert_eq!(store.snapshot().subtitle_output_format, "mkv");

        store
            .update(&[
                ("subtitle_output_format".to_string(), "srt".to_string()),
                ("target_language".to_string(), "Japanese".to_string()),
            ])
            .await
            .unwrap();

        let snap = store.snapshot();
        assert_eq!(snap.subtitle_output_format, "srt");
        assert_eq!(snap.target_language, "Japanese");
        assert!(!snap.overwrite_mkv);

        // The normalized constraint is persisted, not just in memory.
        let stored = store.stored_value("overwrite_mkv").await.unwrap();
        assert_eq!(stored.as_deref(), Some("false"));
    }
}
