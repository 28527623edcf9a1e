//! Time-to-live gate over each upstream source.
//!
//! The cache tables are only re-fetched when their source is older than its
//! TTL or a refresh is forced. Timestamps live in `refreshLog` so the gate
//! holds across process runs.
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use tracing::{debug, info, instrument};

use crate::config::{Cache as CacheConfig, MAX_TTL_SECONDS};
use crate::db::{self, Pool};
use crate::model::RefreshSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Within its TTL; nothing fetched.
    Fresh,
    /// Fetched completely and stamped.
    Refreshed,
    /// Fetched with skipped work; left unstamped so the next run retries.
    Partial,
}

#[derive(Debug, Clone)]
pub struct RefreshCache {
    pool: Pool,
}

impl RefreshCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn last_refresh(&self, source: RefreshSource) -> Result<Option<DateTime<Utc>>> {
        db::get_refreshed_at(&self.pool, source.as_str()).await
    }

    pub async fn is_fresh(&self, source: RefreshSource, ttl: Duration, now: DateTime<Utc>) -> Result<bool> {
        Ok(match self.last_refresh(source).await? {
            Some(at) => at <= now && now - at < ttl,
            None => false,
        })
    }

    pub async fn mark(&self, source: RefreshSource, now: DateTime<Utc>) -> Result<()> {
        db::set_refreshed_at(&self.pool, source.as_str(), now).await
    }

    pub async fn invalidate(&self, source: RefreshSource) -> Result<()> {
        db::clear_refreshed_at(&self.pool, source.as_str()).await
    }

    pub async fn invalidate_all(&self) -> Result<u64> {
        db::clear_refresh_log(&self.pool).await
    }

    /// Run `refresh` unless `source` is still fresh. `refresh` reports whether
    /// it finished without skipping anything; only then is the source stamped.
    #[instrument(skip_all, fields(source = %source, force))]
    pub async fn ensure_fresh<F, Fut>(
        &self,
        source: RefreshSource,
        ttl: Duration,
        force: bool,
        now: DateTime<Utc>,
        refresh: F,
    ) -> Result<Refresh>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        if !force && self.is_fresh(source, ttl, now).await? {
            debug!("cache fresh; skipping fetch");
            return Ok(Refresh::Fresh);
        }
        if refresh().await? {
            self.mark(source, now).await?;
            info!("cache refreshed");
            Ok(Refresh::Refreshed)
        } else {
            Ok(Refresh::Partial)
        }
    }
}

/// TTL configured for a source, capped at [`MAX_TTL_SECONDS`].
pub fn ttl_for(cfg: &CacheConfig, source: RefreshSource) -> Duration {
    let secs = match source {
        RefreshSource::Bookings => cfg.bookings_ttl_seconds,
        RefreshSource::PeopleCategories | RefreshSource::Products => cfg.settings_ttl_seconds,
        RefreshSource::Roster => cfg.roster_ttl_seconds,
    };
    Duration::seconds(secs.min(MAX_TTL_SECONDS) as i64)
}
