//! Row shapes for the cache tables.
//!
//! Keep these structs focused on what is stored. Mapping from provider
//! payloads lives in the sync layer.

/// One row of `bookings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRow {
    pub id: String,
    pub event_id: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub customer_id: Option<String>,
    pub title: Option<String>,
    pub canceled: bool,
    pub accepted: bool,
    pub private_event: bool,
    pub no_show: bool,
    pub source_ip: Option<String>,
    pub creation_time: String,
    pub creation_agent: Option<String>,
    pub product_id: Option<String>,
}

/// One row of `participants`; the booking id is supplied on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantRow {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub people_category: Option<String>,
    pub pid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRow {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRow {
    pub id: String,
    pub product_code: Option<String>,
    pub name: Option<String>,
}

/// One row of `onCampusPids`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRow {
    pub pid: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Row counts per cache table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub bookings: i64,
    pub participants: i64,
    pub people_categories: i64,
    pub products: i64,
    pub roster: i64,
}
