//! Per-day, per-product sales ledgers and their on-disk form.

use std::io;

use chrono::NaiveDate;
use ss_core::CoreError;

pub mod day;
pub mod ledger;
pub mod store;

pub use day::{encode_empty_filtered, DaySeries};
pub use ledger::ProductLedger;
pub use store::SeriesFileStore;

#[derive(thiserror::Error, Debug)]
pub enum SeriesError {
    #[error("malformed series data: {0}")]
    Format(#[from] CoreError),
    #[error("series I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("day {0} is closed and no longer accepts events")]
    DayClosed(NaiveDate),
}

pub type Result<T, E = SeriesError> = std::result::Result<T, E>;
