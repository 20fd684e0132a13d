//! SQLite-backed history storage
//!
//! A single [`Database`] holds the records of many sources. [`SqliteStore`]
//! binds it to one source and implements the [`Store`](crate::history::Store)
//! contract on top of [`RecordId`]s.

mod allocator;
pub mod database;
pub mod record_id;
pub mod store;

pub use database::{Database, DbRecord, APPLICATION_ID};
pub use record_id::{RecordId, SERIALS_PER_MILLI};
pub use store::SqliteStore;
