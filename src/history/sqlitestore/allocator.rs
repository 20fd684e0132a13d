//! Transaction-scoped allocators for source ids and record ids.
//!
//! Both caches are only valid for the write transaction that created them:
//! other connections may change `history` and `history_sources` between
//! transactions. Construct them after `BEGIN` and drop them with the
//! transaction.

use super::record_id::{RecordId, SERIALS_PER_MILLI};
use crate::error::{HistoryError, Result};
use sqlx::SqliteConnection;
use std::collections::HashMap;
use tracing::trace;

/// Memoises `source -> history_sources.id` within one transaction
#[derive(Debug, Default)]
pub(crate) struct SourceAllocator {
    ids: HashMap<String, i64>,
}

impl SourceAllocator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Look up the id for `source`, inserting a new row on a miss
    pub(crate) async fn get_or_insert(
        &mut self,
        conn: &mut SqliteConnection,
        source: &str,
    ) -> Result<i64> {
        if let Some(id) = self.ids.get(source) {
            return Ok(*id);
        }

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM history_sources WHERE source = ?")
                .bind(source)
                .fetch_optional(&mut *conn)
                .await?;

        let id = match existing {
            Some(id) => id,
            None => {
                let id: i64 =
                    sqlx::query_scalar("INSERT INTO history_sources (source) VALUES (?) RETURNING id")
                        .bind(source)
                        .fetch_one(&mut *conn)
                        .await?;
                trace!(source, id, "allocated history source");
                id
            }
        };

        self.ids.insert(source.to_string(), id);
        Ok(id)
    }
}

/// Hands out strictly increasing record ids within one transaction.
///
/// The first request for a millisecond seeds the cache from `MAX(id)` in that
/// millisecond's id range; later requests increment the cached value.
#[derive(Debug, Default)]
pub(crate) struct RecordIdAllocator {
    last: HashMap<i64, RecordId>,
}

impl RecordIdAllocator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id for `millis`
    pub(crate) async fn allocate(
        &mut self,
        conn: &mut SqliteConnection,
        millis: i64,
    ) -> Result<RecordId> {
        let next = match self.last.get(&millis) {
            Some(last) => last.next(),
            None => {
                let lo = RecordId::first_in(millis)?;
                let hi = lo.as_i64().saturating_add(SERIALS_PER_MILLI);
                let max: Option<i64> =
                    sqlx::query_scalar("SELECT MAX(id) FROM history WHERE id >= ? AND id < ?")
                        .bind(lo.as_i64())
                        .bind(hi)
                        .fetch_one(&mut *conn)
                        .await?;
                match max {
                    Some(max) => RecordId::from_raw(max).next(),
                    None => Some(lo),
                }
            }
        };

        let id = next.ok_or(HistoryError::TooManyRecords { millis })?;
        self.last.insert(millis, id);
        Ok(id)
    }
}
