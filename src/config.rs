//! Configuration management for Quotagate.
//!
//! Configuration comes from an optional YAML file, overridden by environment
//! variables of the form `QUOTAGATE__SECTION__FIELD` (for example
//! `QUOTAGATE__SERVER__LISTEN_ADDR=0.0.0.0:8080`).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{QuotaGateError, Result};
use crate::ratelimit::{DEFAULT_PURGE_HIT_COUNT, DEFAULT_PURGE_INTERVAL};

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "QUOTAGATE";

/// Main configuration for the Quotagate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// When stale counters are purged
    #[serde(default)]
    pub purge: PurgeConfig,

    /// Rules, evaluated in the order listed
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Requests matching any of these bypass every rule
    #[serde(default)]
    pub exclude: Vec<PathMatcher>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Purge thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeConfig {
    /// Hits between purge passes
    #[serde(default = "default_purge_hit_count")]
    pub hit_count: u64,

    /// Maximum time between purge passes, e.g. `"60s"`
    #[serde(default = "default_purge_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            hit_count: default_purge_hit_count(),
            interval: default_purge_interval(),
        }
    }
}

fn default_purge_hit_count() -> u64 {
    DEFAULT_PURGE_HIT_COUNT
}

fn default_purge_interval() -> Duration {
    DEFAULT_PURGE_INTERVAL
}

/// One rate limit rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Optional name/description for this rule
    #[serde(default)]
    pub name: Option<String>,
    /// Requests allowed per window for each key
    pub limit: u64,
    /// Window length, e.g. `"60s"` or `"1h"`
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Where the per-request key comes from
    pub key: KeySource,
}

/// Where a rule takes its key from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeySource {
    /// Client address from `X-Forwarded-For`, `X-Real-IP` or the socket peer
    ClientIp,
    /// Value of a request header; requests without it are not counted
    Header { name: String },
    /// The request path
    Path,
    /// One bucket shared by every request
    Fixed { value: String },
}

/// A request path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PathMatcher {
    PathPrefix(String),
    PathSuffix(String),
    PathExact(String),
}

impl PathMatcher {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathMatcher::PathPrefix(prefix) => path.starts_with(prefix.as_str()),
            PathMatcher::PathSuffix(suffix) => path.ends_with(suffix.as_str()),
            PathMatcher::PathExact(exact) => path == exact,
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Yaml));
        }
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(yaml)
            .map_err(|e| QuotaGateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would fail later at limiter setup.
    pub fn validate(&self) -> Result<()> {
        if self.purge.hit_count == 0 || self.purge.interval.is_zero() {
            return Err(QuotaGateError::InvalidPurgeThreshold(
                "purge.hit_count and purge.interval must be greater than zero".to_string(),
            ));
        }
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.window.is_zero() {
                return Err(QuotaGateError::InvalidWindow {
                    rule: rule.name.clone().unwrap_or_else(|| format!("rules[{}]", index)),
                });
            }
            if let KeySource::Header { name } = &rule.key {
                if axum::http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                    return Err(QuotaGateError::Config(format!(
                        "rules[{}]: invalid header name {:?}",
                        index, name
                    )));
                }
            }
        }
        Ok(())
    }
}
