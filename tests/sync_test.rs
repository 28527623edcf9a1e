use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use escape_analytics::bookeo::model::{Booking, BookingsPage, PageInfo, PeopleCategory, Product};
use escape_analytics::bookeo::{BookeoApi, BookeoError, PageRequest};
use escape_analytics::cache::Refresh;
use escape_analytics::config;
use escape_analytics::db;
use escape_analytics::model::RefreshSource;
use escape_analytics::refresh::Refresher;
use escape_analytics::sync::{self, SyncOptions};
use reqwest::StatusCode;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

async fn setup_pool() -> db::Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

fn booking(id: &str, start: &str, pids: &[&str]) -> Booking {
    let details: Vec<_> = pids
        .iter()
        .map(|pid| {
            json!({
                "peopleCategoryId": "Cadults",
                "personDetails": {
                    "firstName": "Guest",
                    "customFields": [{ "name": "PID", "value": pid }]
                }
            })
        })
        .collect();
    serde_json::from_value(json!({
        "bookingNumber": id,
        "startTime": start,
        "endTime": start,
        "creationTime": "2024-01-01T09:00:00-05:00",
        "productId": "P1",
        "participants": { "details": details }
    }))
    .unwrap()
}

fn page(total_pages: u32, token: Option<&str>, data: Vec<Booking>) -> BookingsPage {
    BookingsPage {
        info: PageInfo {
            total_pages,
            page_navigation_token: token.map(str::to_string),
            ..Default::default()
        },
        data,
    }
}

/// Answers from a script; `None` entries answer with a 503.
#[derive(Clone, Default)]
struct ScriptedBookeo {
    first: Arc<Mutex<HashMap<String, Option<BookingsPage>>>>,
    next: Arc<Mutex<HashMap<(String, u32), Option<BookingsPage>>>>,
    calls: Arc<Mutex<Vec<PageRequest>>>,
    settings_calls: Arc<Mutex<u32>>,
    settings_down: Arc<Mutex<bool>>,
}

impl ScriptedBookeo {
    async fn first_page(&self, start_time: &str, page: Option<BookingsPage>) {
        self.first.lock().await.insert(start_time.to_string(), page);
    }

    async fn next_page(&self, token: &str, number: u32, page: Option<BookingsPage>) {
        self.next.lock().await.insert((token.to_string(), number), page);
    }

    async fn calls(&self) -> Vec<PageRequest> {
        self.calls.lock().await.clone()
    }

    async fn set_settings_down(&self, down: bool) {
        *self.settings_down.lock().await = down;
    }

    async fn reset_calls(&self) {
        self.calls.lock().await.clear();
    }
}

fn unavailable() -> BookeoError {
    BookeoError::Status {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: "try later".into(),
    }
}

#[async_trait]
impl BookeoApi for ScriptedBookeo {
    async fn bookings_page(&self, request: &PageRequest) -> Result<BookingsPage, BookeoError> {
        self.calls.lock().await.push(request.clone());
        let scripted = match request {
            PageRequest::First { start_time, .. } => self.first.lock().await.get(start_time).cloned(),
            PageRequest::Next { token, page_number } => {
                self.next.lock().await.get(&(token.clone(), *page_number)).cloned()
            }
        };
        match scripted {
            Some(Some(page)) => Ok(page),
            Some(None) => Err(unavailable()),
            None => Ok(page(1, None, Vec::new())),
        }
    }

    async fn people_categories(&self) -> Result<Vec<PeopleCategory>, BookeoError> {
        *self.settings_calls.lock().await += 1;
        if *self.settings_down.lock().await {
            return Err(unavailable());
        }
        Ok(vec![PeopleCategory {
            id: "Cadults".into(),
            name: "Adults".into(),
        }])
    }

    async fn products(&self) -> Result<Vec<Product>, BookeoError> {
        *self.settings_calls.lock().await += 1;
        if *self.settings_down.lock().await {
            return Err(unavailable());
        }
        Ok(vec![Product {
            product_id: "P1".into(),
            product_code: Some("VAULT".into()),
            name: Some("The Vault".into()),
        }])
    }
}

const JAN: &str = "2024-01-01T00:00:00Z";
const FEB: &str = "2024-02-01T00:00:00Z";

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 2, 15)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn options() -> SyncOptions {
    SyncOptions {
        start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        window_days: 31,
        pid_field: "PID".into(),
    }
}

/// January spans three pages, February one.
async fn scripted_two_windows() -> ScriptedBookeo {
    let api = ScriptedBookeo::default();
    api.first_page(
        JAN,
        Some(page(
            3,
            Some("jan"),
            vec![
                booking("B1", "2024-01-05T18:00:00-05:00", &["100", "101"]),
                booking("B2", "2024-01-06T18:00:00-05:00", &["102"]),
            ],
        )),
    )
    .await;
    api.next_page(
        "jan",
        2,
        Some(page(3, Some("jan"), vec![booking("B3", "2024-01-12T18:00:00-05:00", &["103"])])),
    )
    .await;
    api.next_page(
        "jan",
        3,
        Some(page(3, Some("jan"), vec![booking("B4", "2024-01-20T18:00:00-05:00", &[])])),
    )
    .await;
    api.first_page(
        FEB,
        Some(page(
            1,
            Some("feb"),
            vec![
                booking("B5", "2024-02-02T18:00:00-05:00", &["104"]),
                booking("B6", "2024-02-03T18:00:00-05:00", &["105", "106"]),
            ],
        )),
    )
    .await;
    api
}

#[tokio::test]
async fn walks_every_page_of_every_window() {
    let pool = setup_pool().await;
    let api = scripted_two_windows().await;

    let summary = sync::sync_bookings(&pool, &api, &options(), now()).await.unwrap();

    // One opening request per window plus one per continuation page.
    assert_eq!(summary.windows, 2);
    assert_eq!(summary.requests, (1 + 2) + 1);
    assert_eq!(api.calls().await.len(), 4);
    assert_eq!(summary.bookings, 6);
    assert_eq!(summary.participants, 7);
    assert!(summary.is_complete());

    let calls = api.calls().await;
    assert_eq!(
        calls[1],
        PageRequest::Next {
            token: "jan".into(),
            page_number: 2
        }
    );
    match &calls[3] {
        PageRequest::First { start_time, end_time } => {
            assert_eq!(start_time, FEB);
            assert_eq!(end_time, "2024-02-15T12:00:00Z");
        }
        other => panic!("unexpected request {other:?}"),
    }

    let stats = db::cache_stats(&pool).await.unwrap();
    assert_eq!(stats.bookings, 6);
    assert_eq!(stats.participants, 7);
}

#[tokio::test]
async fn failed_page_is_skipped_and_earlier_rows_survive() {
    let pool = setup_pool().await;
    let api = scripted_two_windows().await;
    sync::sync_bookings(&pool, &api, &options(), now()).await.unwrap();

    // Second run: January page 2 fails, February no longer returns B6.
    api.next_page("jan", 2, None).await;
    api.first_page(
        FEB,
        Some(page(1, None, vec![booking("B5", "2024-02-02T18:00:00-05:00", &["104"])])),
    )
    .await;
    api.reset_calls().await;

    let summary = sync::sync_bookings(&pool, &api, &options(), now()).await.unwrap();
    assert_eq!(summary.pages_skipped, 1);
    assert!(!summary.is_complete());
    assert_eq!(summary.requests, 4);
    assert_eq!(summary.pruned, 0);

    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM bookings ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(ids, vec!["B1", "B2", "B3", "B4", "B5", "B6"]);

    // Once every page arrives again, B6 goes and its participants with it.
    api.next_page(
        "jan",
        2,
        Some(page(3, Some("jan"), vec![booking("B3", "2024-01-12T18:00:00-05:00", &["103"])])),
    )
    .await;
    let summary = sync::sync_bookings(&pool, &api, &options(), now()).await.unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.pruned, 1);

    let orphaned: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM participants WHERE bookingId = 'B6'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(orphaned, 0);
    assert_eq!(db::cache_stats(&pool).await.unwrap().bookings, 5);
}

#[tokio::test]
async fn booking_moved_to_a_failed_window_is_kept() {
    let pool = setup_pool().await;
    let api = ScriptedBookeo::default();
    api.first_page(
        JAN,
        Some(page(1, None, vec![booking("B1", "2024-01-30T18:00:00-05:00", &["100"])])),
    )
    .await;
    sync::sync_bookings(&pool, &api, &options(), now()).await.unwrap();
    assert_eq!(db::cache_stats(&pool).await.unwrap().bookings, 1);

    // The booking was rescheduled into February, whose window is down.
    api.first_page(JAN, Some(page(1, None, Vec::new()))).await;
    api.first_page(FEB, None).await;

    let summary = sync::sync_bookings(&pool, &api, &options(), now()).await.unwrap();
    assert_eq!(summary.windows_skipped, 1);
    assert_eq!(summary.pruned, 0);

    let stats = db::cache_stats(&pool).await.unwrap();
    assert_eq!(stats.bookings, 1);
    assert_eq!(stats.participants, 1);
}

#[tokio::test]
async fn complete_sync_drops_rows_left_under_old_window_keys() {
    let pool = setup_pool().await;
    let api = scripted_two_windows().await;
    sync::sync_bookings(&pool, &api, &options(), now()).await.unwrap();

    // Narrower windows produce different keys; B4 is gone upstream.
    api.first_page(
        JAN,
        Some(page(
            1,
            None,
            vec![
                booking("B1", "2024-01-05T18:00:00-05:00", &["100", "101"]),
                booking("B2", "2024-01-06T18:00:00-05:00", &["102"]),
                booking("B3", "2024-01-12T18:00:00-05:00", &["103"]),
            ],
        )),
    )
    .await;
    let opts = SyncOptions {
        window_days: 15,
        ..options()
    };
    let summary = sync::sync_bookings(&pool, &api, &opts, now()).await.unwrap();
    assert!(summary.is_complete());

    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM bookings ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(ids, vec!["B1", "B2", "B3"]);
    assert_eq!(summary.pruned, 3);
}

#[tokio::test]
async fn failed_first_page_skips_only_that_window() {
    let pool = setup_pool().await;
    let api = scripted_two_windows().await;
    api.first_page(JAN, None).await;

    let summary = sync::sync_bookings(&pool, &api, &options(), now()).await.unwrap();
    assert_eq!(summary.windows_skipped, 1);
    assert_eq!(summary.requests, 2);
    assert_eq!(summary.bookings, 2);

    let stats = db::cache_stats(&pool).await.unwrap();
    assert_eq!(stats.bookings, 2);
}

#[tokio::test]
async fn pids_and_categories_are_stored_on_participants() {
    let pool = setup_pool().await;
    let api = scripted_two_windows().await;
    sync::sync_bookings(&pool, &api, &options(), now()).await.unwrap();

    let pids: Vec<String> = sqlx::query_scalar(
        "SELECT pid FROM participants WHERE bookingId = 'B1' AND peopleCategory = 'Cadults' ORDER BY pid",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(pids, vec!["100", "101"]);
}

fn refresh_config() -> config::Config {
    let mut cfg: config::Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.bookeo.sync_start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    cfg
}

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

#[tokio::test]
async fn provider_is_not_called_again_within_ttl() {
    let pool = setup_pool().await;
    let api = scripted_two_windows().await;
    let cfg = refresh_config();
    let refresher = Refresher::new(&pool, &api, &cfg);

    let t0 = utc("2024-02-15T12:00:00Z");
    let first = refresher.provider(false, t0).await.unwrap();
    assert_eq!(first, [Refresh::Refreshed; 3]);
    assert_eq!(api.calls().await.len(), 4);
    assert_eq!(*api.settings_calls.lock().await, 2);

    let t1 = utc("2024-02-15T12:30:00Z");
    let second = refresher.provider(false, t1).await.unwrap();
    assert_eq!(second, [Refresh::Fresh; 3]);
    assert_eq!(api.calls().await.len(), 4);
    assert_eq!(*api.settings_calls.lock().await, 2);

    let forced = refresher.provider(true, t1).await.unwrap();
    assert_eq!(forced, [Refresh::Refreshed; 3]);
    assert_eq!(*api.settings_calls.lock().await, 4);

    assert_eq!(db::list_product_names(&pool).await.unwrap(), vec!["The Vault"]);
    assert_eq!(db::list_category_names(&pool).await.unwrap(), vec!["Adults"]);
}

#[tokio::test]
async fn incomplete_booking_sync_is_retried_next_run() {
    let pool = setup_pool().await;
    let api = scripted_two_windows().await;
    api.next_page("jan", 3, None).await;
    let cfg = refresh_config();
    let refresher = Refresher::new(&pool, &api, &cfg);

    let t0 = utc("2024-02-15T12:00:00Z");
    assert_eq!(refresher.bookings(false, t0).await.unwrap(), Refresh::Partial);
    api.reset_calls().await;

    let t1 = utc("2024-02-15T12:05:00Z");
    assert_eq!(refresher.bookings(false, t1).await.unwrap(), Refresh::Partial);
    assert_eq!(api.calls().await.len(), 4);
}

#[tokio::test]
async fn failed_settings_fetch_keeps_stale_tables() {
    let pool = setup_pool().await;
    let api = scripted_two_windows().await;
    let cfg = refresh_config();
    let refresher = Refresher::new(&pool, &api, &cfg);

    let t0 = utc("2024-02-15T12:00:00Z");
    assert_eq!(refresher.people_categories(false, t0).await.unwrap(), Refresh::Refreshed);
    assert_eq!(refresher.products(false, t0).await.unwrap(), Refresh::Refreshed);

    api.set_settings_down(true).await;
    assert!(!sync::sync_people_categories(&pool, &api).await.unwrap());
    assert!(!sync::sync_products(&pool, &api).await.unwrap());

    let t1 = utc("2024-02-15T14:00:00Z");
    assert_eq!(refresher.people_categories(false, t1).await.unwrap(), Refresh::Partial);
    assert_eq!(refresher.products(true, t1).await.unwrap(), Refresh::Partial);

    assert_eq!(db::list_category_names(&pool).await.unwrap(), vec!["Adults"]);
    assert_eq!(db::list_product_names(&pool).await.unwrap(), vec!["The Vault"]);
    // The last good refresh stays the recorded one, so the next run retries.
    assert_eq!(refresher.cache().last_refresh(RefreshSource::Products).await.unwrap(), Some(t0));
}
