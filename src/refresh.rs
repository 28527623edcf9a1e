//! Bring each cached source up to date through the TTL gate.
use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::bookeo::BookeoApi;
use crate::cache::{ttl_for, Refresh, RefreshCache};
use crate::config::Config;
use crate::db::Pool;
use crate::model::RefreshSource;
use crate::roster::{self, RosterSource};
use crate::sync::{self, SyncOptions};

pub struct Refresher<'a> {
    pool: &'a Pool,
    cache: RefreshCache,
    api: &'a dyn BookeoApi,
    cfg: &'a Config,
}

impl<'a> Refresher<'a> {
    pub fn new(pool: &'a Pool, api: &'a dyn BookeoApi, cfg: &'a Config) -> Self {
        Self {
            pool,
            cache: RefreshCache::new(pool.clone()),
            api,
            cfg,
        }
    }

    pub fn cache(&self) -> &RefreshCache {
        &self.cache
    }

    pub async fn bookings(&self, force: bool, now: DateTime<Utc>) -> Result<Refresh> {
        let ttl = ttl_for(&self.cfg.cache, RefreshSource::Bookings);
        let opts = SyncOptions::from_config(self.cfg);
        let (pool, api, opts) = (self.pool, self.api, &opts);
        self.cache
            .ensure_fresh(RefreshSource::Bookings, ttl, force, now, || async move {
                let summary = sync::sync_bookings(pool, api, opts, now.naive_utc()).await?;
                Ok(summary.is_complete())
            })
            .await
    }

    pub async fn people_categories(&self, force: bool, now: DateTime<Utc>) -> Result<Refresh> {
        let ttl = ttl_for(&self.cfg.cache, RefreshSource::PeopleCategories);
        self.cache
            .ensure_fresh(RefreshSource::PeopleCategories, ttl, force, now, || {
                sync::sync_people_categories(self.pool, self.api)
            })
            .await
    }

    pub async fn products(&self, force: bool, now: DateTime<Utc>) -> Result<Refresh> {
        let ttl = ttl_for(&self.cfg.cache, RefreshSource::Products);
        self.cache
            .ensure_fresh(RefreshSource::Products, ttl, force, now, || {
                sync::sync_products(self.pool, self.api)
            })
            .await
    }

    pub async fn roster(&self, source: &dyn RosterSource, force: bool, now: DateTime<Utc>) -> Result<Refresh> {
        let ttl = ttl_for(&self.cfg.cache, RefreshSource::Roster);
        self.cache
            .ensure_fresh(RefreshSource::Roster, ttl, force, now, || {
                roster::sync_roster(self.pool, source, self.cfg.roster.columns.as_ref())
            })
            .await
    }

    /// Settings first so product and category names resolve against fresh ids.
    #[instrument(skip_all, fields(force))]
    pub async fn provider(&self, force: bool, now: DateTime<Utc>) -> Result<[Refresh; 3]> {
        let categories = self.people_categories(force, now).await?;
        let products = self.products(force, now).await?;
        let bookings = self.bookings(force, now).await?;
        info!(?categories, ?products, ?bookings, "provider caches checked");
        Ok([categories, products, bookings])
    }
}
