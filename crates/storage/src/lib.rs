//! Durable order and trade stores backed by Postgres.
//!
//! Arbitrary-precision amounts are stored as decimal text so no precision is
//! lost; enums are stored as their lowercase wire strings. All writes are
//! single-row.
//!
use thiserror::Error;

mod orders;
mod trades;

pub use orders::OrderStore;
pub use trades::TradeStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt value in column {column}: {value}")]
    Corrupt { column: &'static str, value: String },
}

pub(crate) fn corrupt(column: &'static str, value: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        column,
        value: value.into(),
    }
}
