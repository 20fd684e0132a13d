//! Opens per-source stores on the configured backend

use super::memstore::MemStore;
use super::redbstore::RedbStore;
use super::sqlitestore::{Database, SqliteStore};
use super::{Store, WriteOptions};
use crate::config::{HistoryConfig, StorageBackend};
use crate::error::{HistoryError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Clone)]
enum Backend {
    Sqlite(Arc<Database>),
    Memory(Arc<Mutex<HashMap<String, MemStore>>>),
    Redb(Arc<redb::Database>),
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Backend::Sqlite(_) => "Sqlite",
            Backend::Memory(_) => "Memory",
            Backend::Redb(_) => "Redb",
        })
    }
}

/// Hands out [`Store`]s that share one underlying database
#[derive(Debug, Clone)]
pub struct StoreFactory {
    backend: Backend,
    options: WriteOptions,
}

impl StoreFactory {
    /// Open the backend named in `config.storage`
    pub async fn from_config(config: &HistoryConfig) -> Result<Self> {
        let storage = &config.storage;
        let backend = match storage.backend {
            StorageBackend::Sqlite => Backend::Sqlite(Arc::new(Database::from_config(storage).await?)),
            StorageBackend::Memory => Backend::Memory(Arc::default()),
            StorageBackend::Redb => {
                let path = storage.path.clone();
                let db = tokio::task::spawn_blocking(move || -> Result<redb::Database> {
                    let db = redb::Database::create(path)?;
                    RedbStore::create_table(&db)?;
                    Ok(db)
                })
                .await??;
                Backend::Redb(Arc::new(db))
            }
        };
        info!(backend = ?storage.backend, "History storage opened");

        Ok(Self {
            backend,
            options: config.retention.write_options(),
        })
    }

    /// Wrap an already open SQLite database
    pub fn sqlite(db: Arc<Database>) -> Self {
        Self {
            backend: Backend::Sqlite(db),
            options: WriteOptions::default(),
        }
    }

    /// Default retention for every store handed out
    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    /// Store for `source`
    pub fn open(&self, source: &str) -> Result<Arc<dyn Store>> {
        if source.is_empty() {
            return Err(HistoryError::invalid_input("source must not be empty"));
        }
        let store: Arc<dyn Store> = match &self.backend {
            Backend::Sqlite(db) => {
                Arc::new(SqliteStore::new(db.clone(), source).with_options(self.options.clone()))
            }
            Backend::Memory(stores) => {
                let mut stores = stores
                    .lock()
                    .map_err(|_| HistoryError::config("memory store registry poisoned"))?;
                let store = stores
                    .entry(source.to_string())
                    .or_insert_with(|| MemStore::new().with_options(self.options.clone()));
                Arc::new(store.clone())
            }
            Backend::Redb(db) => {
                Arc::new(RedbStore::handle(db.clone(), source).with_options(self.options.clone()))
            }
        };
        Ok(store)
    }

    /// The SQLite database, if that is the backend in use
    pub fn database(&self) -> Option<&Arc<Database>> {
        match &self.backend {
            Backend::Sqlite(db) => Some(db),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::history::Record;

    async fn round_trip(factory: &StoreFactory) {
        let a = factory.open("a").unwrap();
        a.append(b"one".to_vec()).await.unwrap();
        a.append(b"two".to_vec()).await.unwrap();

        // A second handle for the same source sees the same records
        let again = factory.open("a").unwrap();
        assert_eq!(again.len().await.unwrap(), 2);
        assert_eq!(factory.open("b").unwrap().len().await.unwrap(), 0);

        let mut buf = vec![Record::default(); 1];
        again.read_desc(&mut buf).await.unwrap();
        assert_eq!(buf[0].payload, b"two");
    }

    #[tokio::test]
    async fn test_every_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        for (backend, file) in [
            (StorageBackend::Sqlite, "history.db"),
            (StorageBackend::Memory, ""),
            (StorageBackend::Redb, "history.redb"),
        ] {
            let config = HistoryConfig {
                storage: StorageConfig {
                    backend,
                    path: dir.path().join(file),
                    ..StorageConfig::default()
                },
                ..HistoryConfig::default()
            };
            let factory = StoreFactory::from_config(&config).await.unwrap();
            assert_eq!(factory.database().is_some(), backend == StorageBackend::Sqlite);
            round_trip(&factory).await;
        }
    }

    #[tokio::test]
    async fn test_retention_from_config() {
        let mut config = HistoryConfig::default();
        config.storage.backend = StorageBackend::Memory;
        config.retention.max_count = Some(1);

        let factory = StoreFactory::from_config(&config).await.unwrap();
        let store = factory.open("a").unwrap();
        store.append(vec![1]).await.unwrap();
        store.append(vec![2]).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_source_rejected() {
        let factory = StoreFactory::sqlite(Arc::new(Database::open_in_memory().await.unwrap()));
        assert!(matches!(factory.open(""), Err(e) if e.is_invalid_argument()));
    }
}
