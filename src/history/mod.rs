//! Time-series history storage
//!
//! Every backend implements the same contract: records of one source are
//! append-only, assigned an ordered id by the store, and read back through
//! immutable [`Slice`] views bounded by record id or creation time.
//!
//! Available implementations:
//! - [`sqlitestore`] - SQLite database shared by many sources (default)
//! - [`memstore`] - in-memory store, used in tests and for volatile traits
//! - [`redbstore`] - embedded key/value store for single-process deployments
//! - [`apistore`] - proxies a remote history service through [`crate::admin::HistoryApi`]

pub mod apistore;
pub mod factory;
pub mod memstore;
pub mod options;
pub mod pager;
pub mod record;
pub mod redbstore;
pub mod sqlitestore;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use factory::StoreFactory;
pub use options::{AgeLimit, WriteOptions};
pub use pager::{
    HistoryPage, ListHistoryRequest, PageReader, Period, SortOrder, DEFAULT_PAGE_SIZE,
    MAX_PAGE_SIZE,
};
pub use record::{intersect_records, Record};

/// Source of record creation times
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A bounded, read-only view over the records of one source.
///
/// Bounds are `[from, to)`. A zero [`Record`] leaves that side open.
#[async_trait]
pub trait Slice: Send + Sync {
    /// Narrow this view further. The result is the intersection of the
    /// existing bounds and the new ones.
    fn slice(&self, from: Record, to: Record) -> Box<dyn Slice>;

    /// Fill `into` with records in ascending id order, stopping when it is
    /// full. Returns the number of records written.
    async fn read(&self, into: &mut [Record]) -> Result<usize>;

    /// Like [`Slice::read`] but newest first
    async fn read_desc(&self, into: &mut [Record]) -> Result<usize>;

    /// Number of records within the current bounds
    async fn len(&self) -> Result<usize>;

    /// True if no records fall within the current bounds
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// An append-only history of one source
#[async_trait]
pub trait Store: Slice {
    /// Append a payload. The store assigns the id and creation time.
    async fn append(&self, payload: Vec<u8>) -> Result<Record>;
}
