//! Configuration management for Kwami memory.
//!
//! Memory settings are resolved from three layers, highest precedence last:
//! built-in defaults, environment variables, then per-agent overrides.
//!
//! Environment variables:
//! - `ZEP_API_KEY` - Optional. API key for the memory service. Memory stays off without it.
//! - `ZEP_BASE_URL` - Optional. Memory service base URL. Defaults to `https://api.getzep.com/api/v2`.
//! - `KWAMI_MEMORY_ENABLED` - Optional. `true`/`false`. Defaults to `true`.
//! - `KWAMI_MEMORY_USER_ID` - Optional. Overrides the memory user key.
//! - `KWAMI_MEMORY_SESSION_ID` - Optional. Overrides the generated session id.
//! - `KWAMI_MEMORY_AUTO_INJECT` - Optional. Inject context into the system prompt. Defaults to `true`.
//! - `KWAMI_MEMORY_MAX_CONTEXT_MESSAGES` - Optional. Defaults to `10`.
//! - `KWAMI_MEMORY_INCLUDE_FACTS` - Optional. Defaults to `true`.
//! - `KWAMI_MEMORY_INCLUDE_ENTITIES` - Optional. Defaults to `true`.
//! - `KWAMI_MEMORY_MIN_FACT_RELEVANCE` - Optional. Defaults to `0.5`.
//! - `KWAMI_MEMORY_FETCH_TIMEOUT_MS` - Optional. Context fetch deadline. Defaults to `200`.
//! - `KWAMI_MEMORY_FLUSH_GRACE_MS` - Optional. Close-time flush window. Defaults to `2000`.
//! - `KWAMI_MEMORY_OVERRIDES_FILE` - Optional. JSON file with per-agent overrides.
//! - `KWAMI_NAME` - Optional. Assistant display name. Defaults to `Kwami`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8080`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.getzep.com/api/v2";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to read overrides file {0}: {1}")]
    OverridesFile(String, String),
}

/// Validated memory settings.
///
/// Built once at startup and shared read-only across sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    pub enabled: bool,

    /// Memory service API key
    pub api_key: Option<String>,

    /// Memory service base URL
    pub base_url: String,

    /// Overrides the `kwami_{id}` user key
    pub user_id: Option<String>,

    /// Overrides the generated session id
    pub session_id: Option<String>,

    /// Whether assembled context is added to the system prompt
    pub auto_inject_context: bool,

    pub max_context_messages: usize,

    pub include_facts: bool,

    pub include_entities: bool,

    /// Facts scoring below this are never injected
    pub min_fact_relevance: f64,

    /// Assistant display name, used to drop facts about the assistant itself
    pub kwami_name: String,

    /// Hard deadline for the session-start context fetch
    pub fetch_timeout: Duration,

    /// Per-request timeout for the HTTP client
    pub request_timeout: Duration,

    /// How long a closing session waits for queued turns to flush
    pub flush_grace: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            user_id: None,
            session_id: None,
            auto_inject_context: true,
            max_context_messages: 10,
            include_facts: true,
            include_entities: true,
            min_fact_relevance: 0.5,
            kwami_name: "Kwami".to_string(),
            fetch_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_secs(10),
            flush_grace: Duration::from_secs(2),
        }
    }
}

impl MemoryConfig {
    /// Memory is active only when enabled and an API key is present.
    pub fn is_enabled(&self) -> bool {
        self.enabled
            && self
                .api_key
                .as_deref()
                .map(|k| !k.trim().is_empty())
                .unwrap_or(false)
    }

    /// Memory-service user key for a Kwami identity.
    pub fn user_key(&self, kwami_id: &str) -> String {
        self.user_id
            .clone()
            .unwrap_or_else(|| format!("kwami_{}", kwami_id))
    }

    /// Session id for a new session of `user_key`.
    pub fn new_session_id(&self, user_key: &str) -> String {
        self.session_id.clone().unwrap_or_else(|| {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            format!("session_{}_{}", user_key, &suffix[..8])
        })
    }
}

/// One partial layer of memory settings.
///
/// Every field is optional; `None` means "inherit from the layer below".
/// Per-agent overrides deserialize straight into this type.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryOverrides {
    pub enabled: Option<bool>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub auto_inject_context: Option<bool>,
    /// Signed so that non-positive values reach validation instead of failing to parse
    pub max_context_messages: Option<i64>,
    pub include_facts: Option<bool>,
    pub include_entities: Option<bool>,
    pub min_fact_relevance: Option<f64>,
    pub kwami_name: Option<String>,
    pub fetch_timeout_ms: Option<u64>,
    pub flush_grace_ms: Option<u64>,
}

impl MemoryOverrides {
    /// Read the environment layer from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Read the environment layer from arbitrary key/value pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        let get = |key: &str| vars.get(key).map(|v| v.trim().to_string());

        Ok(Self {
            enabled: parse_opt(&vars, "KWAMI_MEMORY_ENABLED", parse_bool)?,
            api_key: get("ZEP_API_KEY"),
            base_url: get("ZEP_BASE_URL"),
            user_id: get("KWAMI_MEMORY_USER_ID"),
            session_id: get("KWAMI_MEMORY_SESSION_ID"),
            auto_inject_context: parse_opt(&vars, "KWAMI_MEMORY_AUTO_INJECT", parse_bool)?,
            max_context_messages: parse_opt(&vars, "KWAMI_MEMORY_MAX_CONTEXT_MESSAGES", |s| {
                s.parse::<i64>().map_err(|e| e.to_string())
            })?,
            include_facts: parse_opt(&vars, "KWAMI_MEMORY_INCLUDE_FACTS", parse_bool)?,
            include_entities: parse_opt(&vars, "KWAMI_MEMORY_INCLUDE_ENTITIES", parse_bool)?,
            min_fact_relevance: parse_opt(&vars, "KWAMI_MEMORY_MIN_FACT_RELEVANCE", |s| {
                s.parse::<f64>().map_err(|e| e.to_string())
            })?,
            kwami_name: get("KWAMI_NAME"),
            fetch_timeout_ms: parse_opt(&vars, "KWAMI_MEMORY_FETCH_TIMEOUT_MS", |s| {
                s.parse::<u64>().map_err(|e| e.to_string())
            })?,
            flush_grace_ms: parse_opt(&vars, "KWAMI_MEMORY_FLUSH_GRACE_MS", |s| {
                s.parse::<u64>().map_err(|e| e.to_string())
            })?,
        })
    }

    /// Parse per-agent overrides from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json)
            .map_err(|e| ConfigError::InvalidValue("memory overrides".to_string(), e.to_string()))
    }

    /// Load per-agent overrides from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::OverridesFile(path.display().to_string(), e.to_string())
        })?;
        Self::from_json(&raw)
    }

    fn apply(&self, base: &mut MemoryConfig, max_context_messages: &mut i64) {
        if let Some(v) = self.enabled {
            base.enabled = v;
        }
        if let Some(v) = &self.api_key {
            base.api_key = Some(v.clone());
        }
        if let Some(v) = &self.base_url {
            base.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = &self.user_id {
            base.user_id = Some(v.clone());
        }
        if let Some(v) = &self.session_id {
            base.session_id = Some(v.clone());
        }
        if let Some(v) = self.auto_inject_context {
            base.auto_inject_context = v;
        }
        if let Some(v) = self.max_context_messages {
            *max_context_messages = v;
        }
        if let Some(v) = self.include_facts {
            base.include_facts = v;
        }
        if let Some(v) = self.include_entities {
            base.include_entities = v;
        }
        if let Some(v) = self.min_fact_relevance {
            base.min_fact_relevance = v;
        }
        if let Some(v) = &self.kwami_name {
            base.kwami_name = v.clone();
        }
        if let Some(v) = self.fetch_timeout_ms {
            base.fetch_timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.flush_grace_ms {
            base.flush_grace = Duration::from_millis(v);
        }
    }
}

/// Merge defaults, environment and overrides into a validated [`MemoryConfig`].
///
/// Overrides take precedence over environment, which takes precedence over defaults.
pub fn resolve(
    defaults: MemoryConfig,
    environment: &MemoryOverrides,
    overrides: &MemoryOverrides,
) -> Result<MemoryConfig, ConfigError> {
    let mut config = defaults;
    // Signed until every layer is merged, so a higher layer can replace a bad value
    let mut max_context_messages = i64::try_from(config.max_context_messages).unwrap_or(i64::MAX);
    environment.apply(&mut config, &mut max_context_messages);
    overrides.apply(&mut config, &mut max_context_messages);

    if max_context_messages <= 0 {
        return Err(ConfigError::InvalidConfig {
            field: "max_context_messages",
            reason: format!("must be greater than 0, got {}", max_context_messages),
        });
    }
    config.max_context_messages = usize::try_from(max_context_messages).unwrap_or(usize::MAX);

    validate(&config)?;
    Ok(config)
}

/// Check the invariants every resolved config must satisfy.
pub fn validate(config: &MemoryConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&config.min_fact_relevance) {
        return Err(ConfigError::InvalidConfig {
            field: "min_fact_relevance",
            reason: format!("must be within [0, 1], got {}", config.min_fact_relevance),
        });
    }
    if config.max_context_messages == 0 {
        return Err(ConfigError::InvalidConfig {
            field: "max_context_messages",
            reason: "must be greater than 0".to_string(),
        });
    }
    if config.fetch_timeout.is_zero() {
        return Err(ConfigError::InvalidConfig {
            field: "fetch_timeout",
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(())
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Memory configuration
    pub memory: MemoryConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidConfig` when the resolved memory settings are out of range,
    /// and `ConfigError::InvalidValue` when a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let environment = MemoryOverrides::from_env()?;
        let overrides = match std::env::var("KWAMI_MEMORY_OVERRIDES_FILE") {
            Ok(path) if !path.trim().is_empty() => MemoryOverrides::from_file(Path::new(&path))?,
            _ => MemoryOverrides::default(),
        };
        let memory = resolve(MemoryConfig::default(), &environment, &overrides)?;

        Ok(Self { host, port, memory })
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got '{}'", other)),
    }
}

fn parse_opt<T>(
    vars: &HashMap<String, String>,
    key: &str,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<Option<T>, ConfigError> {
    match vars.get(key) {
        Some(raw) => parse(raw.trim())
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e)),
        None => Ok(None),
    }
}
