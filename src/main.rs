use anyhow::Result;
use chrono::{Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use escape_analytics::bookeo::BookeoClient;
use escape_analytics::cache::Refresh;
use escape_analytics::config;
use escape_analytics::db;
use escape_analytics::model::RefreshSource;
use escape_analytics::refresh::Refresher;
use escape_analytics::report::{self, ReportOutcome, ReportRequest};
use escape_analytics::roster;

#[derive(Debug, Parser)]
#[command(author, version, about = "Escape room booking analytics")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Refresh people categories, products and bookings from Bookeo
    Sync {
        /// Ignore cache TTLs and refetch
        #[arg(long)]
        refresh: bool,
    },
    /// Refresh the on-campus roster
    Roster {
        #[arg(long)]
        refresh: bool,
    },
    /// List product names usable with `report --product`
    Products {
        #[arg(long)]
        refresh: bool,
    },
    /// List people category names usable with `report --category`
    Categories {
        #[arg(long)]
        refresh: bool,
    },
    /// Count rooms and slots booked and run over a date range
    Report {
        /// First day, YYYY-MM-DD or MM/DD/YYYY (default: today)
        #[arg(long, value_parser = parse_date)]
        start: Option<NaiveDate>,
        /// Last day, inclusive (default: today)
        #[arg(long, value_parser = parse_date)]
        end: Option<NaiveDate>,
        /// Only count these products (repeatable)
        #[arg(long = "product")]
        products: Vec<String>,
        /// Only count these people categories (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Ignore cache TTLs and refetch everything first
        #[arg(long)]
        refresh: bool,
    },
    /// Forget refresh timestamps so the next run refetches
    Invalidate {
        /// One of bookings, people_categories, products, roster (default: all)
        #[arg(value_parser = parse_source)]
        source: Option<RefreshSource>,
    },
}

fn parse_source(raw: &str) -> Result<RefreshSource, String> {
    RefreshSource::parse_source(raw).ok_or_else(|| {
        let known: Vec<&str> = RefreshSource::ALL.iter().map(|s| s.as_str()).collect();
        format!("unknown source `{raw}`; expected one of {}", known.join(", "))
    })
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .map_err(|_| format!("`{raw}` is not a date (YYYY-MM-DD or MM/DD/YYYY)"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    // Reject a bad range before touching the provider or the cache.
    if let Command::Report { start, end, .. } = &args.command {
        let today = Local::now().date_naive();
        let req = ReportRequest::new(start.unwrap_or(today), end.unwrap_or(today));
        if let Err(err) = req.validate() {
            println!("{err}");
            return Ok(());
        }
    }

    let pool = db::init_pool(&cfg.app.database_url).await?;
    db::run_migrations(&pool).await?;

    let api = BookeoClient::from_config(&cfg)?;
    let refresher = Refresher::new(&pool, &api, &cfg);
    let now = Utc::now();

    match args.command {
        Command::Sync { refresh } => {
            let [categories, products, bookings] = refresher.provider(refresh, now).await?;
            println!("people categories: {categories:?}");
            println!("products: {products:?}");
            println!("bookings: {bookings:?}");
        }
        Command::Roster { refresh } => {
            let source = roster::source_from_config(&cfg)?;
            let outcome = refresher.roster(source.as_ref(), refresh, now).await?;
            println!("roster: {outcome:?}");
        }
        Command::Products { refresh } => {
            refresher.products(refresh, now).await?;
            for name in db::list_product_names(&pool).await? {
                println!("{name}");
            }
        }
        Command::Categories { refresh } => {
            refresher.people_categories(refresh, now).await?;
            for name in db::list_category_names(&pool).await? {
                println!("{name}");
            }
        }
        Command::Report {
            start,
            end,
            products,
            categories,
            refresh,
        } => {
            let today = Local::now().date_naive();
            let req = ReportRequest {
                start: start.unwrap_or(today),
                end: end.unwrap_or(today),
                products,
                categories,
            };

            refresher.provider(refresh, now).await?;
            match roster::source_from_config(&cfg) {
                Ok(source) => {
                    if refresher.roster(source.as_ref(), refresh, now).await? == Refresh::Partial {
                        warn!("roster refresh failed; on-campus counts use the previous roster");
                    }
                }
                Err(err) => warn!(%err, "roster source unavailable; on-campus counts use the cached roster"),
            }

            match report::generate_report(&pool, &req).await? {
                ReportOutcome::Ready(report) => print!("{report}"),
                ReportOutcome::Rejected(err) => println!("{err}"),
            }
        }
        Command::Invalidate { source: Some(source) } => {
            refresher.cache().invalidate(source).await?;
            info!(%source, "refresh timestamp cleared");
            println!("cleared {source}");
        }
        Command::Invalidate { source: None } => {
            let cleared = refresher.cache().invalidate_all().await?;
            info!(cleared, "refresh log cleared");
            println!("cleared {cleared} refresh timestamps");
        }
    }

    pool.close().await;
    Ok(())
}
