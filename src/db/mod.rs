//! Database module: row models and SQL repositories for the local cache.
//!
//! This module is split into two submodules:
//! - `model`: row shapes written to and read from the cache tables.
//! - `repo`: SQL-only functions over those tables.
//!
//! Callers import from `escape_analytics::db`; the repository API and row
//! models are re-exported here.

pub mod model;
pub mod repo;

pub use model::{BookingRow, CacheStats, CategoryRow, ParticipantRow, ProductRow, RosterRow};
pub use repo::*;
