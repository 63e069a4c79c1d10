//! High-level service facade: cache orchestration and rendering.

use std::fmt;
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::extract::ExtractError;
use crate::fetcher::{CollectionsFetcher, FetchError};
use crate::format::{FormatError, OutputFormat, RenderContext, Rendered};
use crate::icons::IconResolver;
use crate::model::{AddressMatch, Collections, FetchOptions, Uprn};
use crate::plugin::SourcePlugin;
use crate::ports::{AddressPort, AddressSearch, PortError};

/// Default lifetime of cached schedules: three days.
pub const DEFAULT_SCHEDULE_TTL_SECS: i64 = 259_200;

#[derive(thiserror::Error, Debug)]
/// Errors surfaced to callers of [`WasteService`].
pub enum WasteError {
    /// No UPRN was supplied.
    #[error("UPRN not provided")]
    MissingUprn,
    /// The UPRN is not a run of digits.
    #[error("invalid UPRN format: {0:?}")]
    InvalidUprn(String),
    /// The requested output format is unknown.
    #[error("Invalid output format: {0:?}")]
    UnsupportedFormat(String),
    /// An upstream request ran out of time.
    #[error("Operation timed out")]
    Timeout,
    /// An upstream request failed.
    #[error("Unable to contact the council website: {0}")]
    Upstream(PortError),
    /// The page could not be turned into collections.
    #[error("Unable to parse the council website: {0}")]
    Extraction(#[from] ExtractError),
    /// Rendering the output failed.
    #[error(transparent)]
    Format(#[from] FormatError),
}

impl WasteError {
    /// HTTP status a front end should answer with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingUprn | Self::InvalidUprn(_) | Self::UnsupportedFormat(_) => 400,
            Self::Timeout => 408,
            Self::Upstream(_) => 502,
            Self::Extraction(_) | Self::Format(_) => 500,
        }
    }
}

impl From<PortError> for WasteError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Timeout => Self::Timeout,
            other => Self::Upstream(other),
        }
    }
}

impl From<FetchError> for WasteError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Upstream(port) => port.into(),
            FetchError::Extraction(extract) => Self::Extraction(extract),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// Deployment environment.
pub enum Environment {
    /// Local work against live markup; the cache is bypassed.
    #[default]
    Development,
    /// Any other named environment, e.g. `production` or `test`.
    Named(String),
}

impl Environment {
    /// Interpret an `APP_ENV` style value. Empty means development.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "" | "development" => Self::Development,
            other => Self::Named(other.to_owned()),
        }
    }

    /// Whether the schedule cache should be consulted.
    #[must_use]
    pub fn uses_cache(&self) -> bool {
        !matches!(self, Self::Development)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => formatter.write_str("development"),
            Self::Named(name) => formatter.write_str(name),
        }
    }
}

#[derive(Debug, Clone)]
/// Service-wide settings.
pub struct ServiceConfig {
    /// Deployment environment.
    pub environment: Environment,
    /// Lifetime of cached schedules.
    pub schedule_ttl: TimeDelta,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            schedule_ttl: TimeDelta::seconds(DEFAULT_SCHEDULE_TTL_SECS),
        }
    }
}

#[derive(Debug, Clone)]
/// Result of [`WasteService::get_or_fetch`].
pub struct Lookup {
    /// The schedule.
    pub collections: Collections,
    /// Whether the schedule came from the cache.
    pub cache_hit: bool,
    /// Age of the cached schedule on a hit.
    pub cache_age: Option<TimeDelta>,
}

#[derive(Debug, Clone)]
/// Result of [`WasteService::render`].
pub struct RenderedLookup {
    /// The serialized schedule.
    pub rendered: Rendered,
    /// Whether the schedule came from the cache.
    pub cache_hit: bool,
    /// Age of the cached schedule on a hit.
    pub cache_age: Option<TimeDelta>,
}

/// Public entry point for schedule lookups and address search.
pub struct WasteService {
    fetcher: CollectionsFetcher,
    addresses: Arc<dyn AddressPort>,
    icons: IconResolver,
    cache: Arc<dyn Cache>,
    config: ServiceConfig,
}

impl WasteService {
    /// Create a new service from a provider plugin and a cache backend.
    #[must_use]
    pub fn new(plugin: SourcePlugin, cache: Arc<dyn Cache>, config: ServiceConfig) -> Self {
        debug!(
            provider = plugin.name,
            environment = %config.environment,
            "initialising waste service"
        );
        let icon_cache = config.environment.uses_cache().then(|| Arc::clone(&cache));
        Self {
            fetcher: CollectionsFetcher::new(plugin.page_fetcher, Arc::clone(&plugin.address_port)),
            addresses: plugin.address_port,
            icons: IconResolver::new(plugin.icon_fetcher, icon_cache),
            cache,
            config,
        }
    }

    /// Settings in effect.
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Return the cached schedule for `uprn`, fetching and storing it on a miss.
    ///
    /// The cached schedule never holds icon data. Icons are inlined afterwards
    /// when `options.show_icons` is set; otherwise both icon fields are cleared.
    /// Cache read and write failures are logged and never fail the lookup.
    ///
    /// # Errors
    ///
    /// Returns [`WasteError::Timeout`] or [`WasteError::Upstream`] when the page
    /// cannot be downloaded and [`WasteError::Extraction`] when it holds no
    /// collections. Nothing is cached in those cases.
    pub async fn get_or_fetch(
        &self,
        uprn: &Uprn,
        options: FetchOptions,
    ) -> Result<Lookup, WasteError> {
        let mut lookup = self.schedule(uprn, options).await?;

        if options.show_icons {
            self.icons.resolve_into(&mut lookup.collections.collections).await;
        } else {
            for collection in &mut lookup.collections.collections {
                collection.icon_url.clear();
                collection.icon_data_uri.clear();
            }
        }
        Ok(lookup)
    }

    /// Look up `uprn` and render it in `format`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::get_or_fetch`] plus [`WasteError::Format`]
    /// when serialization fails.
    pub async fn render(
        &self,
        uprn: &Uprn,
        format: OutputFormat,
        options: FetchOptions,
    ) -> Result<RenderedLookup, WasteError> {
        let lookup = self.get_or_fetch(uprn, options).await?;
        let context = RenderContext {
            source_url: self.fetcher.source_url(uprn),
            environment: self.config.environment.to_string(),
            stamp: Utc::now(),
        };
        let rendered = format.render(&lookup.collections, &context)?;
        Ok(RenderedLookup {
            rendered,
            cache_hit: lookup.cache_hit,
            cache_age: lookup.cache_age,
        })
    }

    /// Search addresses by free text.
    ///
    /// # Errors
    ///
    /// Returns [`WasteError::Timeout`] or [`WasteError::Upstream`] when the
    /// address service fails.
    pub async fn search_addresses(
        &self,
        query: &AddressSearch,
        limit: usize,
    ) -> Result<Vec<AddressMatch>, WasteError> {
        if limit == 0 || query.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.addresses.search(query, limit).await?)
    }

    /// Icon-free schedule, from the cache when allowed.
    async fn schedule(&self, uprn: &Uprn, options: FetchOptions) -> Result<Lookup, WasteError> {
        let use_cache = self.config.environment.uses_cache();

        if use_cache && let Some(lookup) = self.cached(uprn).await {
            info!(
                uprn = %uprn,
                age_secs = lookup.cache_age.map_or(0, |age| age.num_seconds()),
                "Cache hit for UPRN"
            );
            return Ok(lookup);
        }
        if use_cache {
            info!(uprn = %uprn, "Cache miss for UPRN");
        } else {
            debug!(uprn = %uprn, environment = %self.config.environment, "cache bypassed");
        }

        let collections = self.fetcher.fetch(uprn, options).await?;

        if use_cache {
            self.store(uprn, &collections).await;
        }

        Ok(Lookup {
            collections,
            cache_hit: false,
            cache_age: None,
        })
    }

    async fn cached(&self, uprn: &Uprn) -> Option<Lookup> {
        let entry = match self.cache.get(uprn.as_str()).await {
            Ok(entry) => entry?,
            Err(err) => {
                warn!(uprn = %uprn, %err, "cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_slice::<Collections>(&entry.bytes) {
            Ok(mut collections) => {
                for collection in &mut collections.collections {
                    collection.icon_data_uri.clear();
                }
                Some(Lookup {
                    collections,
                    cache_hit: true,
                    cache_age: Some(entry.age()),
                })
            }
            Err(err) => {
                warn!(uprn = %uprn, %err, "discarding unreadable cache entry");
                None
            }
        }
    }

    async fn store(&self, uprn: &Uprn, collections: &Collections) {
        let bytes = match serde_json::to_vec(collections) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(uprn = %uprn, %err, "failed to encode collections for cache");
                return;
            }
        };
        if let Err(err) = self
            .cache
            .set(uprn.as_str(), &bytes, self.config.schedule_ttl)
            .await
        {
            warn!(uprn = %uprn, %err, "Error setting cache");
        }
    }
}
