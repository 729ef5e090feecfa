//! Gateway client configuration
//!
//! Loads configuration from environment variables (and a `.env` file when present).

use chord_core::Intents;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main client configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub token: String,
    /// Base websocket URL, without query string
    pub url: String,
    pub api_version: u8,
    pub env: Environment,
    pub shard: Option<ShardConfig>,
    pub intents: Intents,
    /// Member count above which offline members are omitted from guild payloads
    pub large_threshold: u16,
    pub hello_timeout: Duration,
    pub retry: RetryConfig,
}

/// Shard assignment sent with Identify
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardConfig {
    pub id: u32,
    pub count: u32,
}

impl ShardConfig {
    #[must_use]
    pub fn as_pair(&self) -> [u32; 2] {
        [self.id, self.count]
    }
}

/// Reconnect policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Consecutive failed connection attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Consecutive failed resumes before falling back to a fresh identify
    pub max_resume_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            max_resume_attempts: default_max_resume_attempts(),
            backoff_base: Duration::from_millis(default_backoff_base_ms()),
            backoff_max: Duration::from_millis(default_backoff_max_ms()),
        }
    }
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

// Default value functions
fn default_gateway_url() -> String {
    "wss://gateway.discord.gg".to_string()
}

fn default_api_version() -> u8 {
    6
}

fn default_large_threshold() -> u16 {
    250
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_max_resume_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_hello_timeout_ms() -> u64 {
    30_000
}

impl GatewayConfig {
    /// Create a configuration with defaults for everything but the token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            url: default_gateway_url(),
            api_version: default_api_version(),
            env: Environment::default(),
            shard: None,
            intents: Intents::default(),
            large_threshold: default_large_threshold(),
            hello_timeout: Duration::from_millis(default_hello_timeout_ms()),
            retry: RetryConfig::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `CHORD_TOKEN` is missing or a value fails to parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// # Errors
    /// Returns an error if `CHORD_TOKEN` is missing or a value fails to parse
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("CHORD_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingVar("CHORD_TOKEN"))?;

        let env = match lookup("CHORD_ENV") {
            Some(raw) => {
                Environment::parse(&raw).ok_or(ConfigError::InvalidValue("CHORD_ENV", raw))?
            }
            None => Environment::default(),
        };

        let shard_id: Option<u32> = parse_opt(&lookup, "CHORD_SHARD_ID")?;
        let shard_count: Option<u32> = parse_opt(&lookup, "CHORD_SHARD_COUNT")?;
        let shard = match (shard_id, shard_count) {
            (None, None) => None,
            (Some(id), Some(count)) if id < count => Some(ShardConfig { id, count }),
            (Some(id), Some(count)) => {
                return Err(ConfigError::InvalidValue(
                    "CHORD_SHARD_ID",
                    format!("{id} is not below shard count {count}"),
                ))
            }
            (None, Some(_)) => return Err(ConfigError::MissingVar("CHORD_SHARD_ID")),
            (Some(_), None) => return Err(ConfigError::MissingVar("CHORD_SHARD_COUNT")),
        };

        let intents = match lookup("CHORD_INTENTS") {
            Some(raw) => {
                Intents::parse(&raw).map_err(|_| ConfigError::InvalidValue("CHORD_INTENTS", raw))?
            }
            None => Intents::default(),
        };

        let backoff_base_ms =
            parse_opt(&lookup, "CHORD_BACKOFF_BASE_MS")?.unwrap_or_else(default_backoff_base_ms);
        let backoff_max_ms =
            parse_opt(&lookup, "CHORD_BACKOFF_MAX_MS")?.unwrap_or_else(default_backoff_max_ms);
        if backoff_max_ms < backoff_base_ms {
            return Err(ConfigError::InvalidValue(
                "CHORD_BACKOFF_MAX_MS",
                format!("{backoff_max_ms} is below base {backoff_base_ms}"),
            ));
        }

        Ok(Self {
            token,
            url: lookup("CHORD_GATEWAY_URL").unwrap_or_else(default_gateway_url),
            api_version: parse_opt(&lookup, "CHORD_API_VERSION")?
                .unwrap_or_else(default_api_version),
            env,
            shard,
            intents,
            large_threshold: parse_opt(&lookup, "CHORD_LARGE_THRESHOLD")?
                .unwrap_or_else(default_large_threshold),
            hello_timeout: Duration::from_millis(
                parse_opt(&lookup, "CHORD_HELLO_TIMEOUT_MS")?
                    .unwrap_or_else(default_hello_timeout_ms),
            ),
            retry: RetryConfig {
                max_reconnect_attempts: parse_opt(&lookup, "CHORD_MAX_RECONNECT_ATTEMPTS")?
                    .unwrap_or_else(default_max_reconnect_attempts),
                max_resume_attempts: parse_opt(&lookup, "CHORD_MAX_RESUME_ATTEMPTS")?
                    .unwrap_or_else(default_max_resume_attempts),
                backoff_base: Duration::from_millis(backoff_base_ms),
                backoff_max: Duration::from_millis(backoff_max_ms),
            },
        })
    }

    /// Full connection URL including version and encoding
    #[must_use]
    pub fn connect_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        format!("{base}/?v={}&encoding=json", self.api_version)
    }

    #[must_use]
    pub fn shard_id(&self) -> Option<u32> {
        self.shard.map(|s| s.id)
    }
}

fn parse_opt<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key, raw)),
        None => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
