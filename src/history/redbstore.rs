//! History store on an embedded redb database
//!
//! One table holds every source, keyed by `(source, record id)` so that a
//! source's records are contiguous and ordered. Ids use the same
//! timestamp-plus-serial encoding as the SQLite backend. redb is blocking,
//! so all work runs on the blocking thread pool.

use super::sqlitestore::record_id::{resolve_bounds, RecordId, SERIALS_PER_MILLI};
use super::{Clock, Record, Slice, Store, WriteOptions};
use crate::error::{HistoryError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

type HistoryKey = (&'static str, u64);

const HISTORY: TableDefinition<HistoryKey, &[u8]> = TableDefinition::new("history");

/// Store for one source inside a (possibly shared) redb database
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<redb::Database>,
    source: String,
    clock: Clock,
    options: WriteOptions,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("source", &self.source)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a database file
    pub fn open(path: impl AsRef<Path>, source: impl Into<String>) -> Result<Self> {
        let db = redb::Database::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "Opened redb history database");
        Self::with_database(Arc::new(db), source)
    }

    /// Volatile database, mainly for tests
    pub fn in_memory(source: impl Into<String>) -> Result<Self> {
        let db = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::with_database(Arc::new(db), source)
    }

    /// Bind to a database shared with other stores, creating the table if needed
    pub fn with_database(db: Arc<redb::Database>, source: impl Into<String>) -> Result<Self> {
        Self::create_table(&db)?;
        Ok(Self::handle(db, source))
    }

    /// Create the history table. Blocks on a write transaction.
    pub fn create_table(db: &redb::Database) -> Result<()> {
        let txn = db.begin_write()?;
        txn.open_table(HISTORY)?;
        txn.commit()?;
        Ok(())
    }

    /// Bind to a database whose table already exists; does no I/O
    pub fn handle(db: Arc<redb::Database>, source: impl Into<String>) -> Self {
        Self {
            db,
            source: source.into(),
            clock: Arc::new(Utc::now),
            options: WriteOptions::default(),
        }
    }

    /// Store for another source in the same database
    pub fn sibling(&self, source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..self.clone()
        }
    }

    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Retention applied in the same transaction as every append
    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn whole(&self) -> RedbSlice {
        RedbSlice {
            db: self.db.clone(),
            source: self.source.clone(),
            from: Record::default(),
            to: Record::default(),
        }
    }
}

#[async_trait]
impl Slice for RedbStore {
    fn slice(&self, from: Record, to: Record) -> Box<dyn Slice> {
        self.whole().slice(from, to)
    }

    async fn read(&self, into: &mut [Record]) -> Result<usize> {
        self.whole().read(into).await
    }

    async fn read_desc(&self, into: &mut [Record]) -> Result<usize> {
        self.whole().read_desc(into).await
    }

    async fn len(&self) -> Result<usize> {
        self.whole().len().await
    }
}

#[async_trait]
impl Store for RedbStore {
    async fn append(&self, payload: Vec<u8>) -> Result<Record> {
        let db = self.db.clone();
        let source = self.source.clone();
        let options = self.options.clone();
        let now = (self.clock)();

        tokio::task::spawn_blocking(move || -> Result<Record> {
            let txn = db.begin_write()?;
            let (id, trimmed) = {
                let mut table = txn.open_table(HISTORY)?;
                let id = next_id(&table, &source, now)?;
                table.insert((source.as_str(), key(id)), payload.as_slice())?;
                let trimmed = apply_retention(&mut table, &source, &options, now)?;
                (id, trimmed)
            };
            txn.commit()?;

            trace!(source = %source, id = %id, trimmed, "Appended redb record");
            Ok(Record {
                id: id.to_string(),
                create_time: Some(id.time()),
                payload,
            })
        })
        .await?
    }
}

#[derive(Clone)]
struct RedbSlice {
    db: Arc<redb::Database>,
    source: String,
    from: Record,
    to: Record,
}

impl RedbSlice {
    async fn read_dir(&self, into: &mut [Record], desc: bool) -> Result<usize> {
        let Some((from, to)) = resolve_bounds(&self.from, &self.to)? else {
            return Ok(0);
        };
        let db = self.db.clone();
        let source = self.source.clone();
        let limit = into.len();

        let records = tokio::task::spawn_blocking(move || -> Result<Vec<Record>> {
            let txn = db.begin_read()?;
            let table = txn.open_table(HISTORY)?;
            let range = table.range(span(&source, from, to))?;
            let mut out = Vec::with_capacity(limit.min(1024));
            if desc {
                for entry in range.rev().take(limit) {
                    let (k, v) = entry?;
                    out.push(to_record(k.value().1, v.value()));
                }
            } else {
                for entry in range.take(limit) {
                    let (k, v) = entry?;
                    out.push(to_record(k.value().1, v.value()));
                }
            }
            Ok(out)
        })
        .await??;

        let n = records.len();
        for (slot, record) in into.iter_mut().zip(records) {
            *slot = record;
        }
        Ok(n)
    }
}

#[async_trait]
impl Slice for RedbSlice {
    fn slice(&self, from: Record, to: Record) -> Box<dyn Slice> {
        let (from, to) = super::intersect_records(&self.from, &self.to, &from, &to);
        Box::new(RedbSlice {
            db: self.db.clone(),
            source: self.source.clone(),
            from,
            to,
        })
    }

    async fn read(&self, into: &mut [Record]) -> Result<usize> {
        self.read_dir(into, false).await
    }

    async fn read_desc(&self, into: &mut [Record]) -> Result<usize> {
        self.read_dir(into, true).await
    }

    async fn len(&self) -> Result<usize> {
        let Some((from, to)) = resolve_bounds(&self.from, &self.to)? else {
            return Ok(0);
        };
        let db = self.db.clone();
        let source = self.source.clone();

        tokio::task::spawn_blocking(move || -> Result<usize> {
            let txn = db.begin_read()?;
            let table = txn.open_table(HISTORY)?;
            let mut n = 0;
            for entry in table.range(span(&source, from, to))? {
                entry?;
                n += 1;
            }
            Ok(n)
        })
        .await?
    }
}

fn key(id: RecordId) -> u64 {
    u64::try_from(id.as_i64()).unwrap_or_default()
}

/// Key range of `source` between two ids; zero ids are unbounded
fn span(source: &str, from: RecordId, to: RecordId) -> std::ops::Range<(&str, u64)> {
    let hi = if to.is_zero() { u64::MAX } else { key(to) };
    (source, key(from))..(source, hi)
}

fn to_record(raw: u64, payload: &[u8]) -> Record {
    let id = RecordId::from_raw(i64::try_from(raw).unwrap_or(i64::MAX));
    Record {
        id: id.to_string(),
        create_time: Some(id.time()),
        payload: payload.to_vec(),
    }
}

fn next_id<T>(table: &T, source: &str, now: DateTime<Utc>) -> Result<RecordId>
where
    T: ReadableTable<HistoryKey, &'static [u8]>,
{
    let first = RecordId::first_in(now.timestamp_millis().max(0))?;
    let end = RecordId::from_raw(first.as_i64().saturating_add(SERIALS_PER_MILLI));
    let last = match table.range(span(source, first, end))?.next_back() {
        Some(entry) => Some(entry?.0.value().1),
        None => None,
    };
    match last {
        Some(raw) => RecordId::from_raw(i64::try_from(raw).unwrap_or(i64::MAX))
            .next()
            .ok_or(HistoryError::TooManyRecords {
                millis: first.millis(),
            }),
        None => Ok(first),
    }
}

fn apply_retention(
    table: &mut redb::Table<'_, HistoryKey, &'static [u8]>,
    source: &str,
    options: &WriteOptions,
    now: DateTime<Utc>,
) -> Result<u64> {
    let mut doomed: Vec<u64> = Vec::new();

    if let Some(max) = options.max_count() {
        let keep = usize::try_from(max).unwrap_or(usize::MAX);
        for entry in table
            .range(span(source, RecordId::ZERO, RecordId::ZERO))?
            .rev()
            .skip(keep)
        {
            doomed.push(entry?.0.value().1);
        }
    }

    if let Some(earliest) = options.earliest_time(now) {
        let boundary = RecordId::new(earliest, 0);
        if !boundary.is_zero() {
            for entry in table.range((source, 0)..(source, key(boundary)))? {
                doomed.push(entry?.0.value().1);
            }
        }
    }

    doomed.sort_unstable();
    doomed.dedup();
    for raw in &doomed {
        table.remove((source, *raw))?;
    }
    Ok(doomed.len() as u64)
}
