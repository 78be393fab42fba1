use anyhow::Result;
use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::services::conversation::RetentionPolicy;

/// Plain environment variable holding the upstream API key.
pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";
/// Plain environment variable naming the deployment environment.
pub const ENVIRONMENT_VAR: &str = "ENVIRONMENT";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful customer service assistant. Your job is to:
1. Answer questions about products and services
2. Help troubleshoot issues
3. Process returns and exchanges
4. Provide information about orders
5. Be friendly, professional, and concise
6. Escalate to a human agent when necessary

Always maintain a helpful and friendly tone. If you don't know the answer to a question,
admit it rather than making up information.";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub conversation: ConversationConfig,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Static page served on `GET /`
    pub index_path: String,
    pub body_limit_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
    pub api_version: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConversationConfig {
    /// 0 keeps every conversation for the life of the process
    pub max_conversations: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptsConfig {
    pub system_prompt: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let bases = search_bases();
        let config_file = resolve_path("config/settings.toml", &bases);

        let config = Self::defaults()?
            .add_source(File::from(config_file).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings = Self::from_config(config)?;
        settings.server.index_path = resolve_path(&settings.server.index_path, &bases)
            .to_string_lossy()
            .into_owned();
        Ok(settings.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Built-in defaults, layered under the file and environment sources.
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("environment", "development")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.index_path", "static/index.html")?
            .set_default("server.body_limit_bytes", 1024 * 1024)?
            .set_default("llm.base_url", "https://api.anthropic.com")?
            .set_default("llm.model", "claude-3-sonnet-20240229")?
            .set_default("llm.max_tokens", 1000)?
            .set_default("llm.temperature", 0.7)?
            .set_default("llm.timeout_seconds", 60)?
            .set_default("llm.api_version", "2023-06-01")?
            .set_default("conversation.max_conversations", 0)?
            .set_default("prompts.system_prompt", DEFAULT_SYSTEM_PROMPT)
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Applies `ANTHROPIC_API_KEY` and `ENVIRONMENT`. Blank values count as unset.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |value: String| {
            let trimmed = value.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        };

        if let Some(key) = lookup(API_KEY_VAR).and_then(non_blank) {
            self.llm.api_key = Some(key);
        }
        self.llm.api_key = self.llm.api_key.take().and_then(non_blank);

        if let Some(environment) = lookup(ENVIRONMENT_VAR).and_then(non_blank) {
            self.environment = environment;
        }

        self
    }

    pub fn has_api_key(&self) -> bool {
        self.llm.api_key.is_some()
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }
}

/// Directories relative paths are tried against: the working directory,
/// then the crate directory (so `cargo run -p chat-relay` works from the
/// workspace root).
fn search_bases() -> Vec<PathBuf> {
    vec![PathBuf::from("."), PathBuf::from(env!("CARGO_MANIFEST_DIR"))]
}

/// First existing `base/path`. Absolute or unresolvable paths come back unchanged.
pub fn resolve_path(path: &str, bases: &[PathBuf]) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return candidate.to_path_buf();
    }

    bases
        .iter()
        .map(|base| base.join(candidate))
        .find(|resolved| resolved.exists())
        .unwrap_or_else(|| candidate.to_path_buf())
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl ConversationConfig {
    pub fn retention(&self) -> RetentionPolicy {
        match self.max_conversations {
            0 => RetentionPolicy::Unbounded,
            n => RetentionPolicy::MaxConversations(n),
        }
    }
}
