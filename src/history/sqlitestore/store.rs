//! Per-source view over a shared [`Database`]

use super::database::{Database, DbRecord};
use super::record_id::resolve_bounds;
use crate::error::Result;
use crate::history::{intersect_records, Record, Slice, Store, WriteOptions};
use async_trait::async_trait;
use std::sync::Arc;

/// History of one source stored in a shared SQLite [`Database`]
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
    source: String,
    options: WriteOptions,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>, source: impl Into<String>) -> Self {
        Self {
            db,
            source: source.into(),
            options: WriteOptions::default(),
        }
    }

    /// Retention applied on every append through this store
    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    fn whole(&self) -> SqliteSlice {
        SqliteSlice {
            db: self.db.clone(),
            source: self.source.clone(),
            from: Record::default(),
            to: Record::default(),
        }
    }
}

#[async_trait]
impl Slice for SqliteStore {
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
impl Store for SqliteStore {
    async fn append(&self, payload: Vec<u8>) -> Result<Record> {
        let mut record = DbRecord::new(&self.source, self.db.now(), payload);
        self.db.insert(&mut record, &self.options).await?;
        Ok(to_record(record))
    }
}

/// Bounded view. Bounds stay as [`Record`]s until a query needs them so that
/// slicing never fails; a malformed id bound is reported by the next query.
#[derive(Debug, Clone)]
struct SqliteSlice {
    db: Arc<Database>,
    source: String,
    from: Record,
    to: Record,
}

impl SqliteSlice {
    async fn read_dir(&self, into: &mut [Record], desc: bool) -> Result<usize> {
        let Some((from, to)) = resolve_bounds(&self.from, &self.to)? else {
            return Ok(0);
        };
        let mut rows = vec![DbRecord::default(); into.len()];
        let n = self.db.read(&self.source, from, to, desc, &mut rows).await?;
        for (slot, row) in into.iter_mut().zip(rows.into_iter().take(n)) {
            *slot = to_record(row);
        }
        Ok(n)
    }
}

#[async_trait]
impl Slice for SqliteSlice {
    fn slice(&self, from: Record, to: Record) -> Box<dyn Slice> {
        let (from, to) = intersect_records(&self.from, &self.to, &from, &to);
        Box::new(SqliteSlice {
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
        match resolve_bounds(&self.from, &self.to)? {
            Some((from, to)) => self.db.count(&self.source, from, to).await,
            None => Ok(0),
        }
    }
}

fn to_record(row: DbRecord) -> Record {
    Record {
        id: row.id.to_string(),
        create_time: Some(row.create_time),
        payload: row.payload,
    }
}
