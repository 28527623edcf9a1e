use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use escape_analytics::cache::RefreshCache;
use escape_analytics::config;
use escape_analytics::db;
use escape_analytics::model::RefreshSource;

#[derive(Parser, Debug)]
#[command(about = "Print cache table sizes and when each source was last refreshed")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let pool = db::init_pool(&cfg.app.database_url).await?;
    db::run_migrations(&pool).await?;

    let stats = db::cache_stats(&pool).await?;
    println!("Database: {}", cfg.app.database_url);
    println!("  bookings:          {}", stats.bookings);
    println!("  participants:      {}", stats.participants);
    println!("  people categories: {}", stats.people_categories);
    println!("  products:          {}", stats.products);
    println!("  roster:            {}", stats.roster);

    let per_window = db::bookings_per_window(&pool).await?;
    if !per_window.is_empty() {
        println!("Bookings per sync window:");
        for (window, count) in per_window {
            println!("  {window}: {count}");
        }
    }

    let cache = RefreshCache::new(pool.clone());
    println!("Last refreshed:");
    for source in RefreshSource::ALL {
        match cache.last_refresh(source).await? {
            Some(at) => println!("  {source}: {}", at.to_rfc3339()),
            None => println!("  {source}: never"),
        }
    }

    pool.close().await;
    Ok(())
}
