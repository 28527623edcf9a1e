//! Pull the provider's bookings and settings into the local cache.
use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use tracing::{info, instrument, warn};

use crate::bookeo::model::{Booking, BookingsPage, ParticipantDetail};
use crate::bookeo::{BookeoApi, PageRequest};
use crate::config::Config;
use crate::db::{self, BookingRow, CategoryRow, ParticipantRow, Pool, ProductRow};
use crate::model::{sync_windows, SyncWindow};

use sqlx::{Sqlite, Transaction};

/// Parameters of a booking sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub start: NaiveDate,
    pub window_days: u32,
    pub pid_field: String,
}

impl SyncOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            start: cfg.bookeo.sync_start,
            window_days: cfg.bookeo.window_days,
            pid_field: cfg.bookeo.pid_field.clone(),
        }
    }
}

/// What a booking sync did. Skipped work is reported, never raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub windows: u32,
    pub requests: u32,
    pub bookings: u64,
    pub participants: u64,
    pub dropped_records: u64,
    pub pruned: u64,
    pub pages_skipped: u32,
    pub windows_skipped: u32,
}

impl SyncSummary {
    /// True when every page of every window was loaded.
    pub fn is_complete(&self) -> bool {
        self.pages_skipped == 0 && self.windows_skipped == 0
    }
}

/// Look up the participant's campus id among their custom fields.
pub fn extract_pid(participant: &ParticipantDetail, field_name: &str) -> Option<String> {
    participant
        .person_details
        .as_ref()?
        .custom_fields
        .iter()
        .find(|f| f.name.as_deref() == Some(field_name))
        .and_then(|f| f.value.as_ref())
        .and_then(crate::bookeo::model::scalar_text)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Map a provider booking onto the cache row. Records missing their id or
/// any of the mandatory timestamps are rejected.
pub fn booking_row(b: &Booking) -> Option<BookingRow> {
    Some(BookingRow {
        id: b.booking_number.clone()?,
        event_id: b.event_id.clone(),
        start_time: b.start_time.clone()?,
        end_time: b.end_time.clone()?,
        customer_id: b.customer_id.clone(),
        title: b.title.clone(),
        canceled: b.canceled.unwrap_or(false),
        accepted: b.accepted.unwrap_or(false),
        private_event: b.private_event.unwrap_or(false),
        no_show: b.no_show.unwrap_or(false),
        source_ip: b.source_ip.clone(),
        creation_time: b.creation_time.clone()?,
        creation_agent: b.creation_agent.clone(),
        product_id: b.product_id.clone(),
    })
}

pub fn participant_rows(b: &Booking, pid_field: &str) -> Vec<ParticipantRow> {
    let Some(participants) = &b.participants else {
        return Vec::new();
    };
    participants
        .details
        .iter()
        .map(|p| {
            let person = p.person_details.as_ref();
            ParticipantRow {
                first_name: person.and_then(|d| d.first_name.clone()),
                last_name: person.and_then(|d| d.last_name.clone()),
                people_category: p.people_category_id.clone(),
                pid: extract_pid(p, pid_field),
            }
        })
        .collect()
}

async fn load_page(
    tx: &mut Transaction<'_, Sqlite>,
    page: &BookingsPage,
    window: &SyncWindow,
    pid_field: &str,
    seen: &mut Vec<String>,
    summary: &mut SyncSummary,
) -> Result<()> {
    let window_key = window.key();
    for booking in &page.data {
        let Some(row) = booking_row(booking) else {
            warn!(
                booking_number = booking.booking_number.as_deref().unwrap_or("?"),
                "dropping booking without id or timestamps"
            );
            summary.dropped_records += 1;
            continue;
        };
        let participants = participant_rows(booking, pid_field);
        db::upsert_booking_tx(tx, &row, &window_key).await?;
        db::replace_participants_tx(tx, &row.id, &participants).await?;
        summary.bookings += 1;
        summary.participants += participants.len() as u64;
        seen.push(row.id);
    }
    Ok(())
}

/// Walk `[opts.start, now]` window by window and load every page into the cache.
///
/// All writes share one transaction. Only a sync in which every page arrived
/// prunes bookings the provider stopped returning; a booking can move between
/// windows, so any skipped page leaves every older row in place.
#[instrument(skip_all, fields(start = %opts.start))]
pub async fn sync_bookings(
    pool: &Pool,
    api: &dyn BookeoApi,
    opts: &SyncOptions,
    now: NaiveDateTime,
) -> Result<SyncSummary> {
    let mut summary = SyncSummary::default();
    let mut seen = Vec::new();
    let mut tx = pool.begin().await?;

    for window in sync_windows(opts.start, now, opts.window_days) {
        summary.windows += 1;
        summary.requests += 1;
        let first = match api.bookings_page(&PageRequest::first(&window)).await {
            Ok(page) => page,
            Err(err) => {
                warn!(%window, %err, "skipping window: first page unavailable");
                summary.windows_skipped += 1;
                continue;
            }
        };

        load_page(&mut tx, &first, &window, &opts.pid_field, &mut seen, &mut summary).await?;

        let total_pages = first.info.total_pages;
        let token = first.info.page_navigation_token.as_deref();
        for page_number in 2..=total_pages {
            let Some(token) = token else {
                warn!(%window, total_pages, "no page token; remaining pages skipped");
                summary.pages_skipped += total_pages - page_number + 1;
                break;
            };
            summary.requests += 1;
            let request = PageRequest::Next {
                token: token.to_string(),
                page_number,
            };
            match api.bookings_page(&request).await {
                Ok(page) => {
                    load_page(&mut tx, &page, &window, &opts.pid_field, &mut seen, &mut summary)
                        .await?;
                }
                Err(err) => {
                    warn!(%window, page_number, %err, "skipping page");
                    summary.pages_skipped += 1;
                }
            }
        }
    }

    if summary.is_complete() {
        summary.pruned = db::prune_unseen_tx(&mut tx, &seen).await?;
    } else {
        warn!(
            pages_skipped = summary.pages_skipped,
            windows_skipped = summary.windows_skipped,
            "sync incomplete; keeping bookings not seen this run"
        );
    }

    tx.commit().await?;
    info!(
        windows = summary.windows,
        requests = summary.requests,
        bookings = summary.bookings,
        participants = summary.participants,
        pruned = summary.pruned,
        pages_skipped = summary.pages_skipped,
        windows_skipped = summary.windows_skipped,
        "booking sync finished"
    );
    Ok(summary)
}

/// Mirror the provider's people categories. Returns false, leaving the cache
/// untouched, when the provider call fails.
#[instrument(skip_all)]
pub async fn sync_people_categories(pool: &Pool, api: &dyn BookeoApi) -> Result<bool> {
    let categories = match api.people_categories().await {
        Ok(categories) => categories,
        Err(err) => {
            warn!(%err, "people categories unavailable; keeping cached copy");
            return Ok(false);
        }
    };
    let rows: Vec<CategoryRow> = categories
        .into_iter()
        .map(|c| CategoryRow { id: c.id, name: c.name })
        .collect();
    let stored = db::replace_people_categories(pool, &rows).await?;
    info!(stored, "people categories refreshed");
    Ok(true)
}

/// Mirror the provider's products, keyed by the id bookings reference.
#[instrument(skip_all)]
pub async fn sync_products(pool: &Pool, api: &dyn BookeoApi) -> Result<bool> {
    let products = match api.products().await {
        Ok(products) => products,
        Err(err) => {
            warn!(%err, "products unavailable; keeping cached copy");
            return Ok(false);
        }
    };
    let rows: Vec<ProductRow> = products
        .into_iter()
        .map(|p| ProductRow {
            id: p.product_id,
            product_code: p.product_code,
            name: p.name,
        })
        .collect();
    let stored = db::replace_products(pool, &rows).await?;
    info!(stored, "products refreshed");
    Ok(true)
}
