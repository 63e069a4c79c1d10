//! Command line front end for Swindon waste collection schedules.

mod config;

use std::io::{self, Write as _};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand};
use reqwest::Client;
use sbcwaste_cache_sqlite::SqliteCache;
use sbcwaste_core::{
    AddressSearch, Cache, FetchOptions, MemoryCache, OutputFormat, Uprn, WasteError,
    WasteService,
};
use sbcwaste_provider_swindon as swindon;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

use crate::config::{CacheBackend, Config};

const DEBUG_FILTER: &str = "info,sbcwaste=debug,sbcwaste_core=debug,sbcwaste_provider_swindon=debug,sbcwaste_cache_sqlite=debug";

#[derive(Debug, Parser)]
#[command(name = "sbcwaste", version, about = "Swindon Borough Council waste collection schedules")]
struct Cli {
    /// Verbose logging and extraction diagnostics.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the collection schedule for a property.
    Lookup {
        /// Unique Property Reference Number.
        uprn: String,
        /// Output format: json, xml, yaml or ics.
        #[arg(long, short, default_value = "json")]
        format: String,
        /// Inline bin icons as data URIs.
        #[arg(long)]
        icons: bool,
    },
    /// Search addresses and print their UPRNs.
    Search {
        /// Street, postcode or other free text.
        query: String,
        /// Maximum number of matches.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Inspect or empty the SQLite cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum CacheAction {
    /// Count cached entries.
    Stats,
    /// Delete every cached entry.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = Config::from_env().context("Failed to load configuration")?;
    if let Command::Cache { action } = cli.command {
        return cache_command(&config, action);
    }
    let client = Client::builder().user_agent(&config.user_agent).build()?;

    let cache: Arc<dyn Cache> = match config.cache_backend {
        CacheBackend::Sqlite => Arc::new(SqliteCache::open(&config.cache_path).with_context(
            || format!("Failed to open cache at {}", config.cache_path.display()),
        )?),
        CacheBackend::Memory => Arc::new(MemoryCache::new()),
    };
    let service = WasteService::new(swindon::plugin(client), cache, config.service_config());
    info!(environment = %config.environment, "sbcwaste ready");

    let result = match cli.command {
        Command::Lookup {
            uprn,
            format,
            icons,
        } => {
            let options = FetchOptions {
                debug: cli.debug,
                show_icons: icons,
            };
            lookup(&service, &uprn, &format, options).await
        }
        Command::Search { query, limit } => search(&service, &query, limit).await,
        Command::Cache { .. } => Ok(()),
    };

    result.map_err(|err| {
        error!(status = err.status_code(), %err, "request failed");
        err.into()
    })
}

async fn lookup(
    service: &WasteService,
    raw_uprn: &str,
    raw_format: &str,
    options: FetchOptions,
) -> Result<(), WasteError> {
    let uprn = Uprn::parse(raw_uprn)?;
    let format: OutputFormat = raw_format.parse()?;
    let lookup = service.render(&uprn, format, options).await?;
    info!(
        uprn = %uprn,
        cache_hit = lookup.cache_hit,
        cache_age_secs = lookup.cache_age.map(|age| age.num_seconds()),
        "schedule ready"
    );
    let rendered = lookup.rendered;

    let mut stdout = io::stdout().lock();
    let written = stdout
        .write_all(rendered.body.as_bytes())
        .and_then(|()| {
            if rendered.body.ends_with('\n') {
                Ok(())
            } else {
                writeln!(stdout)
            }
        });
    if let Err(err) = written {
        error!(%err, "failed to write output");
    }
    Ok(())
}

async fn search(service: &WasteService, query: &str, limit: usize) -> Result<(), WasteError> {
    let matches = service
        .search_addresses(&AddressSearch::new(query), limit)
        .await?;
    if matches.is_empty() {
        info!(query, "no addresses found");
    }

    let mut stdout = io::stdout().lock();
    for found in matches {
        if let Err(err) = writeln!(stdout, "{}\t{}", found.uprn, found.address) {
            error!(%err, "failed to write output");
            break;
        }
    }
    Ok(())
}

fn cache_command(config: &Config, action: CacheAction) -> Result<()> {
    if config.cache_backend != CacheBackend::Sqlite {
        bail!("cache commands need SBCWASTE_CACHE=sqlite");
    }
    let path = config.cache_path.display();
    let cache = SqliteCache::open(&config.cache_path)
        .with_context(|| format!("Failed to open cache at {path}"))?;

    let mut stdout = io::stdout().lock();
    match action {
        CacheAction::Stats => {
            let stats = cache.stats()?;
            writeln!(
                stdout,
                "Cache at {path} contains {} records ({} expired).",
                stats.entries, stats.expired
            )?;
        }
        CacheAction::Clear => {
            let removed = cache.clear()?;
            writeln!(stdout, "Cleared {removed} records from the cache at {path}.")?;
        }
    }
    Ok(())
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { DEBUG_FILTER } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_unset| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}
