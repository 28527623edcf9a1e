//! Booking analytics for an escape-room operator.
//!
//! Bookings, people categories and products are mirrored from Bookeo into a
//! local SQLite cache, a campus roster is loaded from an emailed CSV, and
//! report metrics are counted over that cache.

pub mod bookeo;
pub mod cache;
pub mod config;
pub mod db;
pub mod model;
pub mod refresh;
pub mod report;
pub mod roster;
pub mod sync;
