//! Air quality classification and per-station aggregation.
//!
//! `grade` holds the pure threshold functions; `aggregate` merges the
//! per-source results of one station into a [`StationSnapshot`].

pub mod aggregate;
pub mod grade;
pub mod types;

pub use types::{PollutantStatus, StationSnapshot};
