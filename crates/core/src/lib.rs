//! Core types and wire codec for the sales series service.

pub mod codec;
pub mod protocol;
pub mod sales;
pub mod tag;

pub use protocol::Request;
pub use sales::SalesEvent;
pub use tag::{AggregateKind, Tag};

pub type Quantity = i32;
pub type Price = f64;

/// Data-format errors raised while decoding (or preparing to encode) wire
/// and on-disk payloads. They are local to the call that hit them.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("truncated payload: need {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("string is not valid utf-8")]
    InvalidUtf8,
    #[error("string of {len} bytes does not fit a u16 length prefix")]
    StringTooLong { len: usize },
    #[error("collection of {0} entries does not fit an i32 length prefix")]
    LengthOverflow(usize),
    #[error("negative length prefix: {0}")]
    NegativeLength(i32),
    #[error("invalid timestamp: {secs}s + {nanos}ns")]
    InvalidTimestamp { secs: i64, nanos: i32 },
    #[error("epoch day {0} is outside the supported calendar")]
    InvalidEpochDay(i64),
    #[error("invalid product id {index} for a dictionary of {size} names")]
    InvalidDictionaryIndex { index: i16, size: usize },
    #[error("{size} distinct products do not fit a 16-bit dictionary")]
    DictionaryOverflow { size: usize },
    #[error("product {0:?} appears twice in one day")]
    DuplicateProduct(String),
    #[error("unknown tag {0}")]
    UnknownTag(i32),
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
