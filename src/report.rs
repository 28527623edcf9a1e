//! Report metrics over the local cache.
use anyhow::Result;
use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::db::{self, Pool};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("End date cannot be before start date!")]
    EndBeforeStart { start: NaiveDate, end: NaiveDate },
}

/// Inclusive local date range plus optional narrowing filters.
/// Empty filter lists mean "everything".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub products: Vec<String>,
    pub categories: Vec<String>,
}

impl ReportRequest {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            products: Vec::new(),
            categories: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ReportError> {
        if self.end < self.start {
            return Err(ReportError::EndBeforeStart {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    RoomsBooked,
    SlotsBooked,
    RoomsRun,
    SlotsRun,
    OnCampusSlotsBooked,
    OnCampusSlotsRun,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::RoomsBooked,
        Metric::SlotsBooked,
        Metric::RoomsRun,
        Metric::SlotsRun,
        Metric::OnCampusSlotsBooked,
        Metric::OnCampusSlotsRun,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Metric::RoomsBooked => "Rooms booked",
            Metric::SlotsBooked => "Slots booked",
            Metric::RoomsRun => "Rooms run",
            Metric::SlotsRun => "Slots run",
            Metric::OnCampusSlotsBooked => "On-campus slots booked",
            Metric::OnCampusSlotsRun => "On-campus slots run",
        }
    }

    /// "Booked" metrics look at when the booking was made, "run" metrics at
    /// when the room was played.
    fn time_column(&self) -> &'static str {
        match self {
            Metric::RoomsBooked | Metric::SlotsBooked | Metric::OnCampusSlotsBooked => "b.creationTime",
            Metric::RoomsRun | Metric::SlotsRun | Metric::OnCampusSlotsRun => "b.startTime",
        }
    }

    fn counts_rooms(&self) -> bool {
        matches!(self, Metric::RoomsBooked | Metric::RoomsRun)
    }

    fn on_campus_only(&self) -> bool {
        matches!(self, Metric::OnCampusSlotsBooked | Metric::OnCampusSlotsRun)
    }
}

/// Filters already resolved from display names to provider ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedFilters {
    pub product_ids: Option<Vec<String>>,
    pub category_ids: Option<Vec<String>>,
}

impl ResolvedFilters {
    #[instrument(skip_all)]
    pub async fn resolve(pool: &Pool, req: &ReportRequest) -> Result<Self> {
        let product_ids = if req.products.is_empty() {
            None
        } else {
            Some(db::product_ids_for_names(pool, &req.products).await?)
        };
        let category_ids = if req.categories.is_empty() {
            None
        } else {
            Some(db::category_ids_for_names(pool, &req.categories).await?)
        };
        Ok(Self {
            product_ids,
            category_ids,
        })
    }
}

/// SQL for one metric and the JSON arrays to bind after the two dates.
///
/// Provider timestamps carry the operator's local offset, so the date prefix
/// is the local calendar day.
fn metric_sql(metric: Metric, filters: &ResolvedFilters) -> Result<(String, Vec<String>)> {
    let col = metric.time_column();
    let mut binds = Vec::new();
    let mut sql = if metric.counts_rooms() {
        format!(
            "SELECT COUNT(DISTINCT {col}) FROM bookings b \
             WHERE substr({col}, 1, 10) BETWEEN ? AND ? AND NOT b.canceled"
        )
    } else {
        format!(
            "SELECT COUNT(*) FROM participants p JOIN bookings b ON p.bookingId = b.id \
             WHERE substr({col}, 1, 10) BETWEEN ? AND ?"
        )
    };

    if let Some(ids) = &filters.product_ids {
        sql.push_str(" AND b.productId IN (SELECT value FROM json_each(?))");
        binds.push(serde_json::to_string(ids)?);
    }
    if let Some(ids) = &filters.category_ids {
        if metric.counts_rooms() {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM participants p WHERE p.bookingId = b.id \
                 AND p.peopleCategory IN (SELECT value FROM json_each(?)))",
            );
        } else {
            sql.push_str(" AND p.peopleCategory IN (SELECT value FROM json_each(?))");
        }
        binds.push(serde_json::to_string(ids)?);
    }
    if metric.on_campus_only() {
        sql.push_str(" AND p.pid IN (SELECT pid FROM onCampusPids)");
    }
    Ok((sql, binds))
}

pub async fn count_metric(
    pool: &Pool,
    metric: Metric,
    req: &ReportRequest,
    filters: &ResolvedFilters,
) -> Result<i64> {
    let (sql, binds) = metric_sql(metric, filters)?;
    let mut query = sqlx::query_scalar::<_, i64>(&sql)
        .bind(req.start.format("%Y-%m-%d").to_string())
        .bind(req.end.format("%Y-%m-%d").to_string());
    for value in binds {
        query = query.bind(value);
    }
    let count = query.fetch_one(pool).await?;
    debug!(metric = metric.label(), count, "metric counted");
    Ok(count)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub rows: Vec<(Metric, i64)>,
}

impl Report {
    pub fn get(&self, metric: Metric) -> Option<i64> {
        self.rows.iter().find(|(m, _)| *m == metric).map(|(_, n)| *n)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Report {} to {}",
            self.start.format("%m/%d/%Y"),
            self.end.format("%m/%d/%Y")
        )?;
        for (metric, count) in &self.rows {
            writeln!(f, "{}: {}", metric.label(), count)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Ready(Report),
    /// Bad input, shown to the user instead of a report. Nothing was queried.
    Rejected(ReportError),
}

/// Validate the request, then count every metric against the same cache state.
#[instrument(skip_all, fields(start = %req.start, end = %req.end))]
pub async fn generate_report(pool: &Pool, req: &ReportRequest) -> Result<ReportOutcome> {
    if let Err(err) = req.validate() {
        return Ok(ReportOutcome::Rejected(err));
    }
    let filters = ResolvedFilters::resolve(pool, req).await?;
    let mut rows = Vec::with_capacity(Metric::ALL.len());
    for metric in Metric::ALL {
        rows.push((metric, count_metric(pool, metric, req, &filters).await?));
    }
    Ok(ReportOutcome::Ready(Report {
        start: req.start,
        end: req.end,
        rows,
    }))
}
