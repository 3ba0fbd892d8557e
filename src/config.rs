//! Layered configuration for issue2pr.
//!
//! Precedence, lowest first: built-in defaults, the TOML file
//! (`issue2pr.toml` or `--config <path>`), environment variables (a `.env`
//! file is loaded by the binary first), then CLI flags.
//!
//! ```toml
//! [github]
//! repository = "owner/repo"
//! api_url = "https://api.github.com"
//!
//! [webhook]
//! trigger_token = "@issue2pr"
//! trigger_label = "autofix"
//!
//! [pipeline]
//! branch_prefix = "issue2pr-"
//! success_label = "issue2pr:done"
//! failure_label = "issue2pr:failed"
//! partial_apply = "keep_branch"
//!
//! [generator]
//! engine = "openai"
//! model = "gpt-4"
//!
//! [idempotency]
//! store = "sqlite"
//! db_path = ".issue2pr/idempotency.db"
//! ```
//!
//! Secrets (`GITHUB_TOKEN`, `WEBHOOK_SECRET`, `OPENAI_API_KEY`) are normally
//! supplied through the environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::generator::Engine;
use crate::models::is_owner_repo;
use crate::pipeline::PartialApplyPolicy;
use crate::webhook::DEFAULT_TRIGGER_TOKEN;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "issue2pr.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub github: GitHubConfig,
    pub webhook: WebhookConfig,
    pub pipeline: PipelineConfig,
    pub generator: GeneratorConfig,
    pub context: ContextConfig,
    pub server: ServerSettings,
    pub idempotency: IdempotencyConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub token: Option<String>,
    pub api_url: String,
    /// Default `owner/repo` for CLI commands.
    pub repository: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: "https://api.github.com".to_string(),
            repository: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub secret: Option<String>,
    pub trigger_token: String,
    pub trigger_label: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            trigger_token: DEFAULT_TRIGGER_TOKEN.to_string(),
            trigger_label: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub branch_prefix: String,
    /// Target branch for pull requests; the repository default when unset.
    pub base_branch: Option<String>,
    pub success_label: Option<String>,
    pub failure_label: Option<String>,
    pub partial_apply: PartialApplyPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            branch_prefix: "issue2pr-".to_string(),
            base_branch: None,
            success_label: None,
            failure_label: None,
            partial_apply: PartialApplyPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub engine: Engine,
    pub openai_api_key: Option<String>,
    pub openai_api_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub claude_cmd: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            engine: Engine::OpenAi,
            openai_api_key: None,
            openai_api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout_secs: 120,
            claude_cmd: "claude".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub enabled: bool,
    /// Per-file cap for excerpts handed to the generator.
    pub max_excerpt_bytes: usize,
    pub max_related_issues: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_excerpt_bytes: 8 * 1024,
            max_related_issues: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Sqlite,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "sqlite" => Ok(StoreKind::Sqlite),
            _ => Err(format!("'{}' (valid values: memory, sqlite)", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub store: StoreKind,
    pub db_path: PathBuf,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::Memory,
            db_path: PathBuf::from(".issue2pr/idempotency.db"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("'{}' (valid values: text, json)", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────

impl Config {
    /// Parse configuration from a TOML string.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Load `explicit` if given (it must exist), else `issue2pr.toml` in the
    /// working directory when present, else defaults. Environment overrides
    /// are applied on top.
    pub fn load_layered(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`. Empty values are
    /// treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GITHUB_TOKEN") {
            self.github.token = Some(v);
        }
        if let Some(v) = get("GITHUB_API_URL") {
            self.github.api_url = v;
        }
        if let Some(v) = get("REPOSITORY") {
            self.github.repository = Some(v);
        }
        if let Some(v) = get("BRANCH_PREFIX") {
            self.pipeline.branch_prefix = v;
        }
        if let Some(v) = get("BASE_BRANCH") {
            self.pipeline.base_branch = Some(v);
        }
        if let Some(v) = get("WEBHOOK_SECRET") {
            self.webhook.secret = Some(v);
        }
        if let Some(v) = get("TRIGGER_TOKEN") {
            self.webhook.trigger_token = v;
        }
        if let Some(v) = get("TRIGGER_LABEL") {
            self.webhook.trigger_label = Some(v);
        }
        if let Some(v) = get("AI_ENGINE") {
            self.generator.engine = v.parse().map_err(|e: crate::errors::GenerationError| {
                ConfigError::Invalid {
                    key: "AI_ENGINE",
                    message: e.to_string(),
                }
            })?;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.generator.openai_api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.generator.model = v;
        }
        if let Some(v) = get("CLAUDE_CMD") {
            self.generator.claude_cmd = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }
        if let Some(v) = get("LOG_FORMAT") {
            self.logging.format = v.parse().map_err(|message| ConfigError::Invalid {
                key: "LOG_FORMAT",
                message,
            })?;
        }
        if let Some(v) = get("ISSUE2PR_PORT") {
            self.server.port = v.parse().map_err(|_| ConfigError::Invalid {
                key: "ISSUE2PR_PORT",
                message: format!("'{}' is not a valid port", v),
            })?;
        }
        if let Some(v) = get("IDEMPOTENCY_STORE") {
            self.idempotency.store = v.parse().map_err(|message| ConfigError::Invalid {
                key: "IDEMPOTENCY_STORE",
                message,
            })?;
        }
        if let Some(v) = get("IDEMPOTENCY_DB") {
            self.idempotency.db_path = PathBuf::from(v);
        }
        Ok(())
    }

    /// Settings every command needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.github.token.as_deref().is_none_or(|t| t.trim().is_empty()) {
            return Err(ConfigError::Missing("GITHUB_TOKEN"));
        }
        if let Some(repo) = &self.github.repository
            && !is_owner_repo(repo)
        {
            return Err(ConfigError::Invalid {
                key: "REPOSITORY",
                message: format!("'{}' is not in owner/repo form", repo),
            });
        }
        if self.generator.engine == Engine::OpenAi && self.generator.openai_api_key.is_none() {
            return Err(ConfigError::Missing("OPENAI_API_KEY"));
        }
        if self.webhook.trigger_token.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "TRIGGER_TOKEN",
                message: "must not be empty".to_string(),
            });
        }
        if self.pipeline.branch_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "BRANCH_PREFIX",
                message: "must not be empty".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.generator.temperature) {
            return Err(ConfigError::Invalid {
                key: "generator.temperature",
                message: format!("{} is outside 0.0..=2.0", self.generator.temperature),
            });
        }
        Ok(())
    }
}
