//! Startup configuration.
//!
//! Read once, then threaded into the dispatcher, resolver and worker pool.
//! Nothing in the request path looks at the environment.

use crate::assembler::DeprecationNotice;
use crate::error::{Error, Result};
use crate::fingerprint::{FingerprintResolver, DEFAULT_BYPASS_HEADER};
use crate::policy::{PolicyTable, DEFAULT_TTL};
use ::config::{Config, Environment, Map};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_MICRO_CACHE_TTL_SECS: u64 = 5;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 15;
const DEFAULT_QUEUE_WORKERS: usize = 2;
const DEFAULT_MARKER_LEASE_SECS: u64 = 300;

/// Default Redis connection pool size.
pub const DEFAULT_REDIS_POOL_SIZE: u32 = 16;

/// Store backend selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheDriver {
    #[default]
    #[serde(alias = "array", alias = "inmemory")]
    Memory,
    Redis,
}

/// How stale entries are refreshed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMethod {
    /// Queueable types are refreshed in the background.
    #[default]
    Queue,
    /// Every type is refreshed in the request path.
    Legacy,
}

/// Controller configuration.
///
/// Field names are the serde keys; the aliases are the (lower-cased)
/// environment variable names read by [`CacheConfig::from_env`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(alias = "cache_driver")]
    pub driver: CacheDriver,
    /// Default TTL in seconds for types without their own.
    #[serde(alias = "cache_default_expire")]
    pub default_ttl: u64,
    #[serde(alias = "cache_method")]
    pub method: CacheMethod,
    #[serde(alias = "microcaching")]
    pub micro_caching: bool,
    #[serde(alias = "microcaching_expire")]
    pub micro_caching_ttl: u64,
    #[serde(alias = "cache_bypass_header")]
    pub bypass_header: String,
    #[serde(alias = "cache_bypass_token")]
    pub bypass_token: Option<String>,
    /// Upper bound on one upstream fetch, seconds.
    pub upstream_timeout: u64,
    pub queue_workers: usize,
    /// Seconds after which a pending-refresh marker counts as abandoned.
    #[serde(alias = "queue_marker_lease")]
    pub marker_lease: u64,
    #[serde(alias = "api_deprecation")]
    pub deprecation: bool,
    #[serde(alias = "api_deprecation_date")]
    pub deprecation_date: Option<String>,
    #[serde(alias = "api_deprecation_info")]
    pub deprecation_info: Option<String>,
    pub redis_url: Option<String>,
    pub redis_pool_size: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            driver: CacheDriver::Memory,
            default_ttl: DEFAULT_TTL.as_secs(),
            method: CacheMethod::Queue,
            micro_caching: false,
            micro_caching_ttl: DEFAULT_MICRO_CACHE_TTL_SECS,
            bypass_header: DEFAULT_BYPASS_HEADER.to_string(),
            bypass_token: None,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT_SECS,
            queue_workers: DEFAULT_QUEUE_WORKERS,
            marker_lease: DEFAULT_MARKER_LEASE_SECS,
            deprecation: false,
            deprecation_date: None,
            deprecation_info: None,
            redis_url: None,
            redis_pool_size: DEFAULT_REDIS_POOL_SIZE,
        }
    }
}

impl CacheConfig {
    /// Load from process environment variables.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if a variable is set but cannot be parsed,
    /// or the resulting settings are inconsistent.
    pub fn from_env() -> Result<Self> {
        Self::load(Environment::default())
    }

    /// Load from an explicit set of environment-style variables instead of
    /// the process environment.
    ///
    /// # Errors
    /// Same as [`CacheConfig::from_env`].
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: Map<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::load(Environment::default().source(Some(vars)))
    }

    /// Unset or empty variables keep their defaults.
    fn load(environment: Environment) -> Result<Self> {
        let config: CacheConfig = Config::builder()
            .add_source(environment.ignore_empty(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `Error::ConfigError` for inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl == 0 {
            return Err(Error::ConfigError("default TTL must be positive".into()));
        }
        if self.upstream_timeout == 0 {
            return Err(Error::ConfigError("upstream timeout must be positive".into()));
        }
        if self.marker_lease == 0 {
            return Err(Error::ConfigError("marker lease must be positive".into()));
        }
        if self.queue_workers == 0 && self.method == CacheMethod::Queue {
            return Err(Error::ConfigError(
                "queue method needs at least one worker".into(),
            ));
        }
        if self.redis_pool_size == 0 {
            return Err(Error::ConfigError("redis pool size must be positive".into()));
        }
        if self.driver == CacheDriver::Redis && self.redis_url.is_none() {
            return Err(Error::ConfigError("redis driver needs REDIS_URL".into()));
        }
        Ok(())
    }

    /// True when every resource type must be refreshed synchronously.
    pub fn force_synchronous(&self) -> bool {
        self.method == CacheMethod::Legacy
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn marker_lease(&self) -> Duration {
        Duration::from_secs(self.marker_lease)
    }

    /// Micro-cache TTL, `None` unless enabled on the Redis driver.
    pub fn micro_cache_ttl(&self) -> Option<Duration> {
        match (self.driver, self.micro_caching) {
            (CacheDriver::Redis, true) if self.micro_caching_ttl > 0 => {
                Some(Duration::from_secs(self.micro_caching_ttl))
            }
            _ => None,
        }
    }

    /// Built-in policy table with this configuration's default TTL and
    /// synchronous switch applied.
    pub fn policy_table(&self) -> PolicyTable {
        PolicyTable::with_defaults()
            .with_default_ttl(self.default_ttl())
            .with_force_synchronous(self.force_synchronous())
    }

    pub fn resolver(&self) -> FingerprintResolver {
        match &self.bypass_token {
            Some(token) => FingerprintResolver::new().with_bypass(&self.bypass_header, token),
            None => FingerprintResolver::new(),
        }
    }

    pub fn deprecation_notice(&self) -> Option<DeprecationNotice> {
        if !self.deprecation {
            return None;
        }
        Some(DeprecationNotice::new(
            self.deprecation_date.clone().unwrap_or_default(),
            self.deprecation_info.clone().unwrap_or_default(),
        ))
    }
}
