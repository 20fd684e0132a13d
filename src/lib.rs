//! Time-series history for smart-building device traits
//!
//! This crate records the state of building devices (occupancy, meters,
//! climate, electrical demand) as append-only per-source histories and reads
//! them back in pages.
//!
//! # Features
//!
//! - Ordered 64-bit record ids combining creation time and a serial
//! - SQLite database shared by many sources, with per-source retention
//! - In-memory, redb and remote-API store variants behind one trait
//! - Generic page reader with opaque page tokens
//! - `system/history` admin service over the raw record table

// Core modules
pub mod admin;
pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod traits;

// Re-export main types for convenience
pub use config::HistoryConfig;
pub use error::{ErrorCode, HistoryError, Result};
pub use history::{
    ListHistoryRequest, PageReader, Record, Slice, Store, StoreFactory, WriteOptions,
};
