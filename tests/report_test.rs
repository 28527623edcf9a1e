use chrono::NaiveDate;
use escape_analytics::db::{self, BookingRow, CategoryRow, ParticipantRow, ProductRow, RosterRow};
use escape_analytics::report::{generate_report, Metric, Report, ReportError, ReportOutcome, ReportRequest};

async fn setup_pool() -> db::Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn guest(category: &str, pid: Option<&str>) -> ParticipantRow {
    ParticipantRow {
        first_name: Some("Guest".into()),
        last_name: None,
        people_category: Some(category.into()),
        pid: pid.map(str::to_string),
    }
}

struct Seed {
    id: &'static str,
    product: &'static str,
    start: &'static str,
    created: &'static str,
    canceled: bool,
    participants: Vec<ParticipantRow>,
}

/// Two live March bookings, one canceled March booking, one outside March.
async fn seed(pool: &db::Pool) {
    db::replace_products(
        pool,
        &[
            ProductRow {
                id: "P1".into(),
                product_code: Some("VAULT".into()),
                name: Some("The Vault".into()),
            },
            ProductRow {
                id: "P2".into(),
                product_code: Some("LAB".into()),
                name: Some("Lab".into()),
            },
        ],
    )
    .await
    .unwrap();
    db::replace_people_categories(
        pool,
        &[
            CategoryRow {
                id: "Cadults".into(),
                name: "Adults".into(),
            },
            CategoryRow {
                id: "Cstudents".into(),
                name: "Students".into(),
            },
        ],
    )
    .await
    .unwrap();
    db::replace_roster(
        pool,
        &[
            RosterRow {
                pid: "100".into(),
                first_name: Some("Ann".into()),
                last_name: Some("Lee".into()),
            },
            RosterRow {
                pid: "101".into(),
                first_name: Some("Bo".into()),
                last_name: Some("Kim".into()),
            },
        ],
    )
    .await
    .unwrap();

    let seeds = vec![
        Seed {
            id: "B1",
            product: "P1",
            start: "2024-03-05T18:00:00-05:00",
            created: "2024-03-01T10:00:00-05:00",
            canceled: false,
            participants: vec![guest("Cstudents", Some("100")), guest("Cadults", None)],
        },
        Seed {
            id: "B2",
            product: "P2",
            start: "2024-03-06T19:00:00-05:00",
            created: "2024-03-02T11:00:00-05:00",
            canceled: false,
            participants: vec![guest("Cstudents", Some("101")), guest("Cstudents", Some("999"))],
        },
        Seed {
            id: "B3",
            product: "P1",
            start: "2024-03-07T18:00:00-05:00",
            created: "2024-03-02T12:00:00-05:00",
            canceled: true,
            participants: vec![guest("Cadults", Some("100"))],
        },
        Seed {
            id: "B4",
            product: "P1",
            start: "2024-04-10T18:00:00-04:00",
            created: "2024-02-20T09:00:00-05:00",
            canceled: false,
            participants: vec![guest("Cadults", Some("101"))],
        },
    ];

    let mut tx = pool.begin().await.unwrap();
    for s in seeds {
        let row = BookingRow {
            id: s.id.into(),
            event_id: None,
            start_time: s.start.into(),
            end_time: s.start.into(),
            customer_id: None,
            title: None,
            canceled: s.canceled,
            accepted: true,
            private_event: false,
            no_show: false,
            source_ip: None,
            creation_time: s.created.into(),
            creation_agent: None,
            product_id: Some(s.product.into()),
        };
        db::upsert_booking_tx(&mut tx, &row, "2024-03-01").await.unwrap();
        db::replace_participants_tx(&mut tx, &row.id, &s.participants).await.unwrap();
    }
    tx.commit().await.unwrap();
}

fn march() -> ReportRequest {
    ReportRequest::new(date(2024, 3, 1), date(2024, 3, 31))
}

async fn ready(pool: &db::Pool, req: &ReportRequest) -> Report {
    match generate_report(pool, req).await.unwrap() {
        ReportOutcome::Ready(report) => report,
        ReportOutcome::Rejected(err) => panic!("unexpected rejection: {err}"),
    }
}

fn counts(report: &Report) -> Vec<i64> {
    Metric::ALL.iter().map(|m| report.get(*m).unwrap()).collect()
}

#[tokio::test]
async fn unfiltered_march_report() {
    let pool = setup_pool().await;
    seed(&pool).await;

    let report = ready(&pool, &march()).await;
    assert_eq!(report.get(Metric::RoomsBooked), Some(2));
    assert_eq!(report.get(Metric::SlotsBooked), Some(5));
    assert_eq!(report.get(Metric::RoomsRun), Some(2));
    assert_eq!(report.get(Metric::SlotsRun), Some(5));
    assert_eq!(report.get(Metric::OnCampusSlotsBooked), Some(3));
    assert_eq!(report.get(Metric::OnCampusSlotsRun), Some(3));
}

#[tokio::test]
async fn selecting_every_product_matches_no_filter() {
    let pool = setup_pool().await;
    seed(&pool).await;

    let unfiltered = ready(&pool, &march()).await;
    let mut all = march();
    all.products = db::list_product_names(&pool).await.unwrap();
    let filtered = ready(&pool, &all).await;
    assert_eq!(counts(&filtered), counts(&unfiltered));
}

#[tokio::test]
async fn product_filter_narrows_every_metric() {
    let pool = setup_pool().await;
    seed(&pool).await;

    let mut req = march();
    req.products = vec!["Lab".into()];
    let report = ready(&pool, &req).await;
    assert_eq!(counts(&report), vec![1, 2, 1, 2, 1, 1]);

    req.products = vec!["No Such Room".into()];
    let report = ready(&pool, &req).await;
    assert_eq!(counts(&report), vec![0; 6]);
}

#[tokio::test]
async fn category_filter_counts_matching_participants() {
    let pool = setup_pool().await;
    seed(&pool).await;

    let mut req = march();
    req.categories = vec!["Students".into()];
    let report = ready(&pool, &req).await;
    assert_eq!(report.get(Metric::RoomsBooked), Some(2));
    assert_eq!(report.get(Metric::SlotsBooked), Some(3));
    assert_eq!(report.get(Metric::SlotsRun), Some(3));
    assert_eq!(report.get(Metric::OnCampusSlotsBooked), Some(2));
}

#[tokio::test]
async fn single_day_range_is_inclusive() {
    let pool = setup_pool().await;
    seed(&pool).await;

    let req = ReportRequest::new(date(2024, 3, 5), date(2024, 3, 5));
    let report = ready(&pool, &req).await;
    assert_eq!(report.get(Metric::RoomsRun), Some(1));
    assert_eq!(report.get(Metric::SlotsRun), Some(2));
    assert_eq!(report.get(Metric::RoomsBooked), Some(0));
}

#[tokio::test]
async fn end_before_start_is_rejected_without_querying() {
    let pool = setup_pool().await;
    // A closed pool fails any query, so a rejection proves none ran.
    pool.close().await;

    let req = ReportRequest::new(date(2024, 3, 31), date(2024, 3, 1));
    match generate_report(&pool, &req).await.unwrap() {
        ReportOutcome::Rejected(err) => {
            assert!(matches!(err, ReportError::EndBeforeStart { .. }));
            assert_eq!(err.to_string(), "End date cannot be before start date!");
        }
        ReportOutcome::Ready(_) => panic!("range should have been rejected"),
    }
}
