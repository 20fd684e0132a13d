//! Shared fixtures for the integration tests

#![allow(dead_code)]

use building_history::admin::HistoryAdminServer;
use building_history::history::apistore::ApiStore;
use building_history::history::memstore::MemStore;
use building_history::history::redbstore::RedbStore;
use building_history::history::sqlitestore::{Database, SqliteStore};
use building_history::{Record, Store};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Test times are offsets from this instant, so record ids never collapse to zero
pub const BASE_MS: i64 = 1_700_000_000_000;

pub fn t(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(BASE_MS + ms).unwrap()
}

/// Manually driven clock shared with a store
#[derive(Clone, Default)]
pub struct TestClock(Arc<AtomicI64>);

impl TestClock {
    pub fn set(&self, ms: i64) {
        self.0.store(ms, Ordering::SeqCst);
    }

    pub fn func(&self) -> impl Fn() -> DateTime<Utc> + Send + Sync + 'static {
        let now = self.0.clone();
        move || t(now.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Sqlite,
    SqliteFile,
    Memory,
    Redb,
    Api,
}

/// A store under test together with its clock
pub struct Harness {
    pub store: Arc<dyn Store>,
    pub clock: TestClock,
    _dir: Option<TempDir>,
}

impl Harness {
    pub async fn new(backend: Backend) -> Self {
        let clock = TestClock::default();
        let mut dir = None;

        let store: Arc<dyn Store> = match backend {
            Backend::Sqlite => {
                let db = Database::open_in_memory().await.unwrap().with_clock(clock.func());
                Arc::new(SqliteStore::new(Arc::new(db), "source-1"))
            }
            Backend::SqliteFile => {
                let tmp = tempfile::tempdir().unwrap();
                let db = Database::open(tmp.path().join("history.db"))
                    .await
                    .unwrap()
                    .with_clock(clock.func());
                dir = Some(tmp);
                Arc::new(SqliteStore::new(Arc::new(db), "source-1"))
            }
            Backend::Memory => Arc::new(MemStore::new().with_clock(clock.func())),
            Backend::Redb => Arc::new(RedbStore::in_memory("source-1").unwrap().with_clock(clock.func())),
            Backend::Api => {
                let db = Database::open_in_memory().await.unwrap().with_clock(clock.func());
                let server = HistoryAdminServer::new("node-1", Arc::new(db));
                Arc::new(ApiStore::new(Arc::new(server), "node-1", "source-1"))
            }
        };

        Self {
            store,
            clock,
            _dir: dir,
        }
    }

    /// Append one record per offset; the payload is the offset as text
    pub async fn append_at(&self, offsets: &[i64]) -> Vec<Record> {
        let mut out = Vec::with_capacity(offsets.len());
        for ms in offsets {
            self.clock.set(*ms);
            out.push(self.store.append(ms.to_string().into_bytes()).await.unwrap());
        }
        out
    }
}

/// Payloads of `records` as text
pub fn payloads(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| String::from_utf8(r.payload.clone()).unwrap())
        .collect()
}
