//! Configuration loading, validation, and management for opsdesk.
//!
//! Loads configuration from `~/.opsdesk/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.opsdesk/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API credential for the hosted LLM. `None` means no remote tiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible endpoint root
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-request timeout for a single remote attempt
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Model tiers; order in the file is irrelevant, `rank` decides.
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierConfig>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub history: HistoryConfig,
}

fn default_api_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".into()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_request_timeout_secs() -> u64 {
    30
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_base_url", &self.api_base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("tiers", &self.tiers)
            .field("retry", &self.retry)
            .field("context", &self.context)
            .field("history", &self.history)
            .finish()
    }
}

/// Capability class of a model tier. Informational; never reorders tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Advanced,
    Standard,
    Lite,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Advanced => "advanced",
            Self::Standard => "standard",
            Self::Lite => "lite",
        })
    }
}

/// One remote model option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,

    pub model: String,

    /// Lower rank = tried first.
    pub rank: u32,

    #[serde(default = "default_capability")]
    pub capability: Capability,

    /// Tiers sharing a quota group cool down together. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_group: Option<String>,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl TierConfig {
    pub fn quota_group(&self) -> &str {
        self.quota_group.as_deref().unwrap_or(&self.name)
    }
}

fn default_capability() -> Capability {
    Capability::Standard
}
fn default_cooldown_secs() -> u64 {
    60
}

fn default_tiers() -> Vec<TierConfig> {
    vec![
        TierConfig {
            name: "pro".into(),
            model: "gemini-2.5-pro".into(),
            rank: 0,
            capability: Capability::Advanced,
            quota_group: None,
            cooldown_secs: 300,
        },
        TierConfig {
            name: "flash".into(),
            model: "gemini-2.5-flash".into(),
            rank: 1,
            capability: Capability::Standard,
            quota_group: None,
            cooldown_secs: 120,
        },
        TierConfig {
            name: "flash-lite".into(),
            model: "gemini-2.5-flash-lite".into(),
            rank: 2,
            capability: Capability::Lite,
            quota_group: None,
            cooldown_secs: 60,
        },
    ]
}

/// Bounded retry for transient failures on a single tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per tier, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    250
}
fn default_max_backoff_ms() -> u64 {
    2000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Context bundle budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Hard ceiling on the serialized bundle, in characters
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Most recent records requested per table
    #[serde(default = "default_recent_records")]
    pub recent_records: usize,

    /// Per-field cap on free text in full mode
    #[serde(default = "default_field_char_cap")]
    pub field_char_cap: usize,

    /// How many prior chat messages accompany a remote request
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

/// Smallest ceiling accepted; the empty bundle skeleton always fits under it.
pub const MIN_CONTEXT_CHARS: usize = 256;

fn default_max_chars() -> usize {
    6000
}
fn default_recent_records() -> usize {
    5
}
fn default_field_char_cap() -> usize {
    160
}
fn default_history_window() -> usize {
    6
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            recent_records: default_recent_records(),
            field_char_cap: default_field_char_cap(),
            history_window: default_history_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Directory for per-user history files. Defaults to `~/.opsdesk/history`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

fn default_max_message_chars() -> usize {
    4000
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_message_chars: default_max_message_chars(),
        }
    }
}

impl HistoryConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| AppConfig::config_dir().join("history"))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.opsdesk/config.toml).
    ///
    /// Also checks environment variables:
    /// - `OPSDESK_API_KEY` (highest priority), `GEMINI_API_KEY`, `OPENAI_API_KEY`
    /// - `OPSDESK_API_BASE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let present = |v: &String| !v.trim().is_empty();
        self.api_key = self.api_key.take().filter(present);
        if self.api_key.is_none() {
            self.api_key = ["OPSDESK_API_KEY", "GEMINI_API_KEY", "OPENAI_API_KEY"]
                .iter()
                .find_map(|k| lookup(k).filter(present));
        }

        if let Some(base) = lookup("OPSDESK_API_BASE") {
            self.api_base_url = base;
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".opsdesk")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.context.max_chars < MIN_CONTEXT_CHARS {
            return Err(ConfigError::ValidationError(format!(
                "context.max_chars must be at least {MIN_CONTEXT_CHARS}"
            )));
        }

        let mut names: Vec<&str> = self.tiers.iter().map(|t| t.name.as_str()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate tier name '{}'",
                pair[0]
            )));
        }

        if self.tiers.iter().any(|t| t.model.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "every tier needs a model".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Tiers in priority order (rank, then name for equal ranks).
    pub fn tiers_by_rank(&self) -> Vec<&TierConfig> {
        let mut tiers: Vec<&TierConfig> = self.tiers.iter().collect();
        tiers.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.name.cmp(&b.name)));
        tiers
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: default_api_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            tiers: default_tiers(),
            retry: RetryConfig::default(),
            context: ContextConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tiers.len(), 3);
        assert!(!config.has_api_key());
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.tiers.len(), config.tiers.len());
        assert_eq!(parsed.context.max_chars, config.context.max_chars);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn tiny_context_ceiling_rejected() {
        let mut config = AppConfig::default();
        config.context.max_chars = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_tier_names_rejected() {
        let mut config = AppConfig::default();
        config.tiers[1].name = "pro".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate tier name 'pro'"));
    }

    #[test]
    fn zero_tiers_is_valid() {
        let config = AppConfig {
            tiers: vec![],
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.tiers.len(), 3);
    }

    #[test]
    fn tiers_sorted_by_rank_not_file_order() {
        let toml_str = r#"
[[tiers]]
name = "backup"
model = "small-model"
rank = 5

[[tiers]]
name = "primary"
model = "big-model"
rank = 1
capability = "advanced"
quota_group = "shared"
cooldown_secs = 600
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let ordered: Vec<&str> = config.tiers_by_rank().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(ordered, vec!["primary", "backup"]);
        assert_eq!(config.tiers[0].quota_group(), "backup");
        assert_eq!(config.tiers[1].quota_group(), "shared");
        assert_eq!(config.tiers[0].cooldown_secs, 60);
    }

    #[test]
    fn env_overrides_api_key_priority() {
        let env: HashMap<&str, &str> = [
            ("GEMINI_API_KEY", "gem-key"),
            ("OPENAI_API_KEY", "oai-key"),
            ("OPSDESK_API_BASE", "http://localhost:9999/v1"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("gem-key"));
        assert_eq!(config.api_base_url, "http://localhost:9999/v1");
    }

    #[test]
    fn blank_env_key_counts_as_missing() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|k| (k == "OPSDESK_API_KEY").then(|| "  ".to_string()));
        assert!(!config.has_api_key());

        // A blank higher-priority key does not hide a real one further down.
        let env: HashMap<&str, &str> = [("OPSDESK_API_KEY", ""), ("GEMINI_API_KEY", "real-key")]
            .into_iter()
            .collect();
        let mut config = AppConfig {
            api_key: Some("   ".into()),
            ..AppConfig::default()
        };
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("real-key"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret-value".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn load_from_file_validates() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "temperature = 9.0").unwrap();
        assert!(AppConfig::load_from(tmp.path()).is_err());
    }

    #[test]
    fn history_dir_override() {
        let history = HistoryConfig {
            dir: Some("/var/lib/opsdesk/history".into()),
            max_message_chars: 100,
        };
        assert_eq!(history.resolved_dir(), PathBuf::from("/var/lib/opsdesk/history"));
    }
}
