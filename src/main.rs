use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{ArgGroup, Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rental_scout::admin::{self, DEFAULT_RECENT_RUNS};
use rental_scout::config::AppConfig;
use rental_scout::jobs::{self, build_index::default_index_date};
use rental_scout::models::{PropertyType, Source};
use rental_scout::scrapers::Adapter;
use rental_scout::storage::{ListingPatch, PgStore};

#[derive(Parser)]
#[command(name = "rental-scout")]
#[command(about = "Rental listings acquisition and price index pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk category pages and enqueue new condo/apartment listings
    Discover {
        /// realestate_kh or khmer24
        #[arg(long)]
        source: Source,
        /// Category pages to walk per category
        #[arg(long)]
        pages: Option<u32>,
        /// Stop after this many accepted URLs
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        max_urls: Option<u64>,
    },

    /// Fetch and store a batch of pending queue entries
    ProcessQueue {
        #[arg(long)]
        source: Source,
        #[arg(long)]
        batch: Option<usize>,
        /// Detail fetches in flight at once
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Rebuild the daily price index (default: yesterday, UTC)
    BuildIndex {
        /// YYYY-MM-DD
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Deactivate listings not seen within the window
    MarkStale {
        #[arg(long)]
        days: Option<i64>,
    },

    /// Report prices above the monthly ceiling; --apply nulls them
    RepairPrices {
        #[arg(long)]
        apply: bool,
        #[arg(long)]
        ceiling: Option<f64>,
    },

    /// Move FAILED queue entries of a source back to PENDING
    ResetFailed {
        #[arg(long)]
        source: Source,
    },

    /// Listing, queue and job run overview
    Summary {
        /// Recent job runs to include
        #[arg(long, default_value_t = DEFAULT_RECENT_RUNS)]
        runs: usize,
    },

    /// Override a listing's status or property type
    PatchListing(PatchArgs),

    /// Price changes of one listing
    PriceHistory { id: i64 },

    /// Apply database migrations
    Migrate,
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("change")
        .required(true)
        .args(["activate", "deactivate", "pass", "property_type"])
))]
struct PatchArgs {
    id: i64,
    /// Force active and pin it
    #[arg(long)]
    activate: bool,
    /// Force inactive and pin it
    #[arg(long)]
    deactivate: bool,
    /// Hand the listing back to automatic staleness
    #[arg(long)]
    pass: bool,
    #[arg(long)]
    property_type: Option<PropertyType>,
}

impl PatchArgs {
    fn patch(&self) -> ListingPatch {
        if self.activate {
            ListingPatch::Activate
        } else if self.deactivate {
            ListingPatch::Deactivate
        } else if let Some(kind) = self.property_type {
            ListingPatch::PropertyType(kind)
        } else {
            ListingPatch::Pass
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let store = PgStore::connect(&config.database_url).await?;

    match cli.command {
        Commands::Discover {
            source,
            pages,
            max_urls,
        } => {
            info!("🏠 Rental Scout - discover {}", source);

            let mut options = config.discover_options();
            if let Some(pages) = pages {
                options.page_cap = pages;
            }
            options.url_cap = max_urls.map(|cap| cap as usize);

            let settings = config.fetch_settings();
            let report = jobs::open_and_discover(
                &store,
                source,
                || Adapter::open(source, &settings),
                &options,
            )
            .await?;
            print_json(&report)?;
        }

        Commands::ProcessQueue {
            source,
            batch,
            concurrency,
        } => {
            info!("🏠 Rental Scout - process {} queue", source);

            let mut options = config.process_options();
            if let Some(batch) = batch {
                options.batch_size = batch;
            }
            if let Some(concurrency) = concurrency {
                options.concurrency = concurrency.max(1);
            }

            let settings = config.fetch_settings();
            let report = jobs::open_and_process(
                &store,
                source,
                || Adapter::open(source, &settings),
                &options,
            )
            .await?;
            print_json(&report)?;
        }

        Commands::BuildIndex { date } => {
            let date = date.unwrap_or_else(|| default_index_date(Utc::now()));
            print_json(&jobs::build_index(&store, date).await?)?;
        }

        Commands::MarkStale { days } => {
            let days = days.unwrap_or(config.stale_window_days);
            print_json(&jobs::mark_stale(&store, days, Utc::now()).await?)?;
        }

        Commands::RepairPrices { apply, ceiling } => {
            let ceiling = ceiling.unwrap_or(config.max_monthly_price_usd);
            print_json(&jobs::repair_prices(&store, ceiling, apply).await?)?;
        }

        Commands::ResetFailed { source } => {
            print_json(&jobs::reset_failed(&store, source).await?)?;
        }

        Commands::Summary { runs } => {
            print_json(&admin::summary(&store, runs).await?)?;
        }

        Commands::PatchListing(args) => {
            print_json(&admin::patch_listing(&store, args.id, args.patch()).await?)?;
        }

        Commands::PriceHistory { id } => {
            print_json(&admin::price_history(&store, id).await?)?;
        }

        Commands::Migrate => {
            store.migrate().await?;
            info!("💾 Migrations applied");
        }
    }

    Ok(())
}
