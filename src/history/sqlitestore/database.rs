//! SQLite database shared by every per-source history store
//!
//! The database owns two tables: `history_sources` maps source names to
//! integer ids, and `history` holds one row per record keyed by its
//! [`RecordId`]. All writes run in a single transaction which also applies
//! retention for every source the write touched.

use super::allocator::{RecordIdAllocator, SourceAllocator};
use super::record_id::RecordId;
use crate::config::StorageConfig;
use crate::error::{HistoryError, Result};
use crate::history::{Clock, WriteOptions};
use crate::logging::PerfLogger;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{
    SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Application id stamped on every history database file
pub const APPLICATION_ID: i64 = 0x5C0502;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Row representation used by [`Database`].
///
/// `id` and `create_time` are assigned by [`Database::insert_bulk`]; any value
/// the caller puts there is ignored, except that `create_time` selects the
/// millisecond the id is allocated in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbRecord {
    pub id: RecordId,
    pub source: String,
    pub create_time: DateTime<Utc>,
    pub payload: Vec<u8>,
}

impl DbRecord {
    /// New unsaved record
    pub fn new(source: impl Into<String>, create_time: DateTime<Utc>, payload: Vec<u8>) -> Self {
        Self {
            id: RecordId::ZERO,
            source: source.into(),
            create_time,
            payload,
        }
    }
}

/// History database handle. Cheap to share behind an `Arc`.
pub struct Database {
    pool: SqlitePool,
    write_lock: Mutex<()>,
    clock: Clock,
    slow_threshold: Duration,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("pool_size", &self.pool.size())
            .field("slow_threshold", &self.slow_threshold)
            .finish()
    }
}

impl Database {
    /// Open (creating if needed) a database file and migrate it
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(&StorageConfig {
            path: path.as_ref().to_path_buf(),
            ..StorageConfig::default()
        })
        .await
    }

    /// Open a private in-memory database
    pub async fn open_in_memory() -> Result<Self> {
        Self::from_config(&StorageConfig {
            in_memory: true,
            ..StorageConfig::default()
        })
        .await
    }

    /// Open a database using storage settings
    #[instrument(skip(config), fields(path = %config.path.display(), in_memory = config.in_memory))]
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        let pool = if config.in_memory {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")?
                .auto_vacuum(SqliteAutoVacuum::Full)
                .foreign_keys(true);
            // Every connection to :memory: is its own database, so keep exactly one alive.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let options = SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .auto_vacuum(SqliteAutoVacuum::Full)
                .busy_timeout(config.busy_timeout)
                .foreign_keys(true);
            SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .connect_with(options)
                .await?
        };

        let db = Self {
            pool,
            write_lock: Mutex::new(()),
            clock: Arc::new(Utc::now),
            slow_threshold: config.slow_query_threshold,
        };
        db.check_application_id().await?;
        MIGRATOR.run(&db.pool).await?;

        info!("History database ready");
        Ok(db)
    }

    /// Replace the clock used for appends and age-based retention
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Current time according to the database clock
    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("History database closed");
    }

    /// Start a write transaction holding the database write lock from the
    /// first statement, so writers on other connections wait in
    /// `busy_timeout` instead of failing on a read-to-write upgrade.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    async fn check_application_id(&self) -> Result<()> {
        let current: i64 = sqlx::query_scalar("PRAGMA application_id")
            .fetch_one(&self.pool)
            .await?;
        match current {
            APPLICATION_ID => Ok(()),
            0 => {
                let stamp = format!("PRAGMA application_id = {APPLICATION_ID}");
                sqlx::query(&stamp).execute(&self.pool).await?;
                debug!(application_id = APPLICATION_ID, "Stamped application id");
                Ok(())
            }
            other => Err(HistoryError::config(format!(
                "database application id {other:#X} is not a history database ({APPLICATION_ID:#X})"
            ))),
        }
    }

    /// Insert one record. See [`Database::insert_bulk`].
    pub async fn insert(&self, record: &mut DbRecord, options: &WriteOptions) -> Result<()> {
        self.insert_bulk(std::slice::from_mut(record), options).await
    }

    /// Insert all `records` in one transaction and apply retention to every
    /// source they touch.
    ///
    /// On success each record carries its assigned id and the creation time
    /// derived from it (millisecond precision). On failure nothing is written
    /// and the records are left unchanged.
    #[instrument(skip_all, fields(count = records.len()))]
    pub async fn insert_bulk(&self, records: &mut [DbRecord], options: &WriteOptions) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let started = Instant::now();

        let _guard = self.write_lock.lock().await;
        let now = self.now();
        let mut tx = self.begin_write().await?;

        let mut sources = SourceAllocator::new();
        let mut ids = RecordIdAllocator::new();
        let mut touched: Vec<i64> = Vec::new();
        let mut assigned = Vec::with_capacity(records.len());

        for record in records.iter() {
            let source_id = sources.get_or_insert(&mut tx, &record.source).await?;
            let id = ids
                .allocate(&mut tx, record.create_time.timestamp_millis().max(0))
                .await?;
            sqlx::query("INSERT INTO history (id, source_id, payload) VALUES (?, ?, ?)")
                .bind(id.as_i64())
                .bind(source_id)
                .bind(record.payload.as_slice())
                .execute(&mut *tx)
                .await?;
            if !touched.contains(&source_id) {
                touched.push(source_id);
            }
            assigned.push(id);
        }

        let mut trimmed = 0;
        if !options.is_empty() {
            for source_id in &touched {
                trimmed += apply_retention(&mut tx, *source_id, options, now).await?;
            }
        }

        tx.commit().await?;

        for (record, id) in records.iter_mut().zip(assigned) {
            record.id = id;
            record.create_time = id.time();
        }

        let elapsed = started.elapsed();
        debug!(
            sources = touched.len(),
            trimmed,
            elapsed_ms = elapsed.as_millis() as u64,
            "Inserted history records"
        );
        self.log_if_slow("insert_bulk", elapsed);
        Ok(())
    }

    /// Read records into `into`, stopping once it is full.
    ///
    /// An empty `source` matches every source. `from` is inclusive and `to`
    /// exclusive; [`RecordId::ZERO`] leaves that side open.
    pub async fn read(
        &self,
        source: &str,
        from: RecordId,
        to: RecordId,
        desc: bool,
        into: &mut [DbRecord],
    ) -> Result<usize> {
        if into.is_empty() {
            return Ok(0);
        }
        let started = Instant::now();

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT h.id, s.source, h.payload FROM history h \
             JOIN history_sources s ON s.id = h.source_id",
        );
        push_filter(&mut query, source, from, to);
        query.push(if desc {
            " ORDER BY h.id DESC"
        } else {
            " ORDER BY h.id ASC"
        });
        query
            .push(" LIMIT ")
            .push_bind(i64::try_from(into.len()).unwrap_or(i64::MAX));

        let mut rows = query.build().fetch(&self.pool);
        let mut n = 0;
        while n < into.len() {
            let Some(row) = rows.try_next().await? else {
                break;
            };
            into[n] = decode_row(&row)?;
            n += 1;
        }

        self.log_if_slow("read", started.elapsed());
        Ok(n)
    }

    /// Count records matching the same filter as [`Database::read`]
    pub async fn count(&self, source: &str, from: RecordId, to: RecordId) -> Result<usize> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM history h JOIN history_sources s ON s.id = h.source_id",
        );
        push_filter(&mut query, source, from, to);
        let count: i64 = query.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Names of every source that has ever been written
    pub async fn sources(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar("SELECT source FROM history_sources ORDER BY source")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    /// Delete records created before `before`. An empty `source` trims every
    /// source. Returns the number of rows deleted.
    #[instrument(skip(self))]
    pub async fn trim_time(&self, source: &str, before: DateTime<Utc>) -> Result<u64> {
        let boundary = RecordId::new(before, 0);
        let _guard = self.write_lock.lock().await;
        let mut tx = self.begin_write().await?;

        let deleted = if source.is_empty() {
            sqlx::query("DELETE FROM history WHERE id < ?")
                .bind(boundary.as_i64())
                .execute(&mut *tx)
                .await?
                .rows_affected()
        } else {
            match lookup_source(&mut tx, source).await? {
                Some(source_id) => delete_before(&mut tx, source_id, boundary).await?,
                None => 0,
            }
        };

        tx.commit().await?;
        debug!(deleted, "Trimmed history by time");
        Ok(deleted)
    }

    /// Keep only the newest `limit` records of `source`.
    ///
    /// `limit == 0` deletes every record of the source. A source with `limit`
    /// or fewer records is left untouched. Returns the number of rows deleted.
    #[instrument(skip(self))]
    pub async fn trim_count(&self, source: &str, limit: u64) -> Result<u64> {
        if source.is_empty() {
            return Err(HistoryError::invalid_input("trim_count requires a source"));
        }
        let _guard = self.write_lock.lock().await;
        let mut tx = self.begin_write().await?;

        let deleted = match lookup_source(&mut tx, source).await? {
            Some(source_id) => keep_newest(&mut tx, source_id, limit).await?,
            None => 0,
        };

        tx.commit().await?;
        debug!(deleted, "Trimmed history by count");
        Ok(deleted)
    }

    fn log_if_slow(&self, operation: &str, elapsed: Duration) {
        PerfLogger::log_if_slow(
            operation,
            elapsed.as_millis() as u64,
            self.slow_threshold.as_millis() as u64,
        );
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn push_filter<'a>(query: &mut QueryBuilder<'a, Sqlite>, source: &'a str, from: RecordId, to: RecordId) {
    let mut sep = " WHERE ";
    if !source.is_empty() {
        query.push(sep).push("s.source = ").push_bind(source);
        sep = " AND ";
    }
    if !from.is_zero() {
        query.push(sep).push("h.id >= ").push_bind(from.as_i64());
        sep = " AND ";
    }
    if !to.is_zero() {
        query.push(sep).push("h.id < ").push_bind(to.as_i64());
    }
}

fn decode_row(row: &SqliteRow) -> Result<DbRecord> {
    let id = RecordId::from_raw(row.try_get::<i64, _>(0)?);
    let payload: Option<Vec<u8>> = row.try_get(2)?;
    Ok(DbRecord {
        id,
        source: row.try_get(1)?,
        create_time: id.time(),
        payload: payload.unwrap_or_default(),
    })
}

async fn lookup_source(conn: &mut SqliteConnection, source: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar("SELECT id FROM history_sources WHERE source = ?")
        .bind(source)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}

async fn delete_before(conn: &mut SqliteConnection, source_id: i64, boundary: RecordId) -> Result<u64> {
    let result = sqlx::query("DELETE FROM history WHERE source_id = ? AND id < ?")
        .bind(source_id)
        .bind(boundary.as_i64())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

async fn keep_newest(conn: &mut SqliteConnection, source_id: i64, limit: u64) -> Result<u64> {
    if limit == 0 {
        let result = sqlx::query("DELETE FROM history WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *conn)
            .await?;
        return Ok(result.rows_affected());
    }

    let offset = i64::try_from(limit - 1).unwrap_or(i64::MAX);
    let boundary: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM history WHERE source_id = ? ORDER BY id DESC LIMIT 1 OFFSET ?",
    )
    .bind(source_id)
    .bind(offset)
    .fetch_optional(&mut *conn)
    .await?;

    match boundary {
        Some(boundary) => delete_before(conn, source_id, RecordId::from_raw(boundary)).await,
        None => Ok(0),
    }
}

async fn apply_retention(
    conn: &mut SqliteConnection,
    source_id: i64,
    options: &WriteOptions,
    now: DateTime<Utc>,
) -> Result<u64> {
    let mut deleted = 0;
    if let Some(max_count) = options.max_count() {
        deleted += keep_newest(conn, source_id, max_count).await?;
    }
    match options.earliest_time(now) {
        Some(earliest) => {
            deleted += delete_before(conn, source_id, RecordId::new(earliest, 0)).await?;
        }
        None if options.age_limit().is_some() => {
            warn!(source_id, "Age limit out of range, skipping age retention");
        }
        None => {}
    }
    Ok(deleted)
}
