use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TandemError};

/// Top-level Tandem configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub shop: ShopConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Inference backend. Absent means model-backed steps are unavailable.
    #[serde(default)]
    pub model: Option<ModelConfig>,
}

/// What a parallel group does when one branch fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutPolicy {
    /// Let every started sibling finish, then report the aggregate failure.
    #[default]
    RunToCompletion,
    /// Cancel the remaining siblings as soon as one branch fails.
    CancelOnFailure,
}

/// How a parallel group resolves two branches writing the same state key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Fail the group with a `Conflict`.
    #[default]
    FailOnConflict,
    /// Keep the value from the branch that completed last.
    LastWriterWins,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum concurrently running branches per parallel group (0 = unbounded).
    #[serde(default)]
    pub max_parallel: usize,
    #[serde(default)]
    pub fan_out: FanOutPolicy,
    #[serde(default)]
    pub merge: MergePolicy,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    /// Channel capacity between a composite step and its consumer.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: 0,
            fan_out: FanOutPolicy::default(),
            merge: MergePolicy::default(),
            tool_timeout_secs: default_tool_timeout(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_tool_timeout() -> u64 { 30 }
fn default_event_buffer() -> usize { 64 }

/// Parameters of the shop workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopConfig {
    /// Subtotal at or above which shipping is free.
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold: f64,
    #[serde(default = "default_shipping_type")]
    pub default_shipping_type: String,
    /// Fraction of searches routed to broad (any-word) matching.
    #[serde(default = "default_search_broad_rate")]
    pub search_broad_rate: f64,
    /// Stock count below which a reorder is triggered.
    #[serde(default = "default_reorder_threshold")]
    pub reorder_threshold: u32,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            free_shipping_threshold: default_free_shipping_threshold(),
            default_shipping_type: default_shipping_type(),
            search_broad_rate: default_search_broad_rate(),
            reorder_threshold: default_reorder_threshold(),
        }
    }
}

fn default_free_shipping_threshold() -> f64 { 100.0 }
fn default_shipping_type() -> String { "standard".to_string() }
fn default_search_broad_rate() -> f64 { 0.5 }
fn default_reorder_threshold() -> u32 { 5 }

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

impl StoreBackend {
    /// Whether orders outlive the process that created them.
    pub fn is_persistent(&self) -> bool {
        matches!(self, StoreBackend::Sqlite)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String { "~/.tandem/orders.db".to_string() }

impl StoreConfig {
    /// SQLite at the default path.
    pub fn sqlite() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: default_store_path(),
        }
    }

    /// Resolve the database path (expand ~).
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(rest) = self.path.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 1024 }
fn default_temperature() -> f32 { 0.2 }
fn default_request_timeout() -> u64 { 60 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 500 }
fn default_max_backoff() -> u64 { 8000 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| TandemError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| TandemError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no workflow can run with.
    pub fn validate(&self) -> Result<()> {
        let rate = self.shop.search_broad_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(TandemError::Config(format!(
                "shop.search_broad_rate must be within [0, 1], got {}",
                rate
            )));
        }
        if self.shop.free_shipping_threshold < 0.0 {
            return Err(TandemError::Config(
                "shop.free_shipping_threshold must not be negative".into(),
            ));
        }
        if self.engine.event_buffer == 0 {
            return Err(TandemError::Config("engine.event_buffer must be at least 1".into()));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.engine.max_parallel, 0);
        assert_eq!(config.engine.fan_out, FanOutPolicy::RunToCompletion);
        assert_eq!(config.engine.merge, MergePolicy::FailOnConflict);
        assert_eq!(config.shop.free_shipping_threshold, 100.0);
        assert_eq!(config.shop.default_shipping_type, "standard");
        assert_eq!(config.shop.reorder_threshold, 5);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.model.is_none());
    }

    #[test]
    fn test_policies_parse() {
        let config = AppConfig::parse(
            r#"
[engine]
fan_out = "cancel_on_failure"
merge = "last_writer_wins"
max_parallel = 2
"#,
        )
        .unwrap();
        assert_eq!(config.engine.fan_out, FanOutPolicy::CancelOnFailure);
        assert_eq!(config.engine.merge, MergePolicy::LastWriterWins);
        assert_eq!(config.engine.max_parallel, 2);
    }

    #[test]
    fn test_rate_out_of_range_rejected() {
        let err = AppConfig::parse("[shop]\nsearch_broad_rate = 1.5\n").unwrap_err();
        assert!(matches!(err, TandemError::Config(_)));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        assert!(AppConfig::parse("[engine]\nmerge = \"coin_flip\"\n").is_err());
    }

    #[test]
    fn test_expand_env_vars_keeps_unset() {
        let out = expand_env_vars("key = \"${TANDEM_SURELY_UNSET_VAR}\"");
        assert_eq!(out, "key = \"${TANDEM_SURELY_UNSET_VAR}\"");
    }

    #[test]
    fn test_store_path_absolute_untouched() {
        let store = StoreConfig {
            backend: StoreBackend::Sqlite,
            path: "/var/lib/tandem/orders.db".into(),
        };
        assert_eq!(store.resolved_path(), PathBuf::from("/var/lib/tandem/orders.db"));
    }

    #[test]
    fn test_only_sqlite_persists() {
        assert!(!StoreBackend::Memory.is_persistent());
        assert!(StoreBackend::Sqlite.is_persistent());

        let store = StoreConfig::sqlite();
        assert!(store.backend.is_persistent());
        assert_eq!(store.path, "~/.tandem/orders.db");
    }
}
