use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upstream feeds mirrored into the local cache, each refreshed on its own TTL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RefreshSource {
    Bookings,
    PeopleCategories,
    Products,
    Roster,
}

impl RefreshSource {
    pub const ALL: [RefreshSource; 4] = [
        RefreshSource::Bookings,
        RefreshSource::PeopleCategories,
        RefreshSource::Products,
        RefreshSource::Roster,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshSource::Bookings => "bookings",
            RefreshSource::PeopleCategories => "people_categories",
            RefreshSource::Products => "products",
            RefreshSource::Roster => "roster",
        }
    }

    pub fn parse_source(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|src| src.as_str() == s)
    }
}

impl fmt::Display for RefreshSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One date-bounded slice of the booking search, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl SyncWindow {
    /// Stable identifier stored with each booking the window loaded.
    pub fn key(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%dT%H:%M:%S"),
            self.end.format("%Y-%m-%dT%H:%M:%S")
        )
    }
}

/// Split `[start, now]` into consecutive windows of `days` calendar days.
///
/// Each window runs from midnight of its first day to 23:59:59 of its last
/// day; the final window is clipped to `now`. A zero `days` or a `start` in
/// the future yields no windows.
pub fn sync_windows(start: NaiveDate, now: NaiveDateTime, days: u32) -> Vec<SyncWindow> {
    let mut windows = Vec::new();
    if days == 0 {
        return windows;
    }
    let last_second = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    let mut day = start;
    loop {
        let window_start = day.and_time(NaiveTime::MIN);
        if window_start > now {
            break;
        }
        let last_day = day + Duration::days(i64::from(days) - 1);
        let window_end = last_day.and_time(last_second).min(now);
        windows.push(SyncWindow {
            start: window_start,
            end: window_end,
        });
        day = last_day + Duration::days(1);
    }
    windows
}
