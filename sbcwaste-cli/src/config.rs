//! Runtime configuration read from the environment.

use std::path::PathBuf;

use anyhow::{Result, bail};
use chrono::TimeDelta;
use sbcwaste_core::service::{DEFAULT_SCHEDULE_TTL_SECS, Environment, ServiceConfig};
use sbcwaste_provider_swindon::DEFAULT_USER_AGENT;
use tracing::warn;

const DEFAULT_CACHE_PATH: &str = "./sbcwaste.db";

/// Storage behind the lookup cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheBackend {
    Sqlite,
    Memory,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) environment: Environment,
    pub(crate) cache_ttl: TimeDelta,
    pub(crate) cache_backend: CacheBackend,
    pub(crate) cache_path: PathBuf,
    pub(crate) user_agent: String,
}

impl Config {
    /// Load configuration from the process environment, after reading `.env` if present.
    pub(crate) fn from_env() -> Result<Self> {
        // a missing .env file is normal outside development
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            warn!(%err, "ignoring unreadable .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_owned())
                .filter(|raw| !raw.is_empty())
        };

        let environment = Environment::from_name(&value("APP_ENV").unwrap_or_default());

        let cache_ttl = match value("CACHE_EXPIRY_SECONDS") {
            None => default_ttl(),
            Some(raw) => match raw.parse::<i64>() {
                Ok(seconds) if seconds > 0 => TimeDelta::seconds(seconds),
                _ => {
                    warn!(value = %raw, "invalid CACHE_EXPIRY_SECONDS, using default");
                    default_ttl()
                }
            },
        };

        let cache_backend = match value("SBCWASTE_CACHE").as_deref() {
            None | Some("sqlite") => CacheBackend::Sqlite,
            Some("memory") => CacheBackend::Memory,
            Some(other) => bail!("SBCWASTE_CACHE must be \"sqlite\" or \"memory\", got {other:?}"),
        };

        Ok(Self {
            environment,
            cache_ttl,
            cache_backend,
            cache_path: value("SBCWASTE_CACHE_PATH")
                .map_or_else(|| PathBuf::from(DEFAULT_CACHE_PATH), PathBuf::from),
            user_agent: value("SBCWASTE_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned()),
        })
    }

    pub(crate) fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            environment: self.environment.clone(),
            schedule_ttl: self.cache_ttl,
        }
    }
}

fn default_ttl() -> TimeDelta {
    TimeDelta::seconds(DEFAULT_SCHEDULE_TTL_SECS)
}
