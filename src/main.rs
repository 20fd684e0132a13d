//! History admin CLI
//!
//! Seeds, inspects and trims a history store from the command line. Output is
//! JSON on stdout; logs go to stderr.

use building_history::{
    config::HistoryConfig,
    history::{HistoryPage, Record},
    logging::{init_logging, LogConfig},
    HistoryError, ListHistoryRequest, PageReader, Result, StoreFactory,
};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// History CLI configuration
#[derive(Parser, Debug)]
#[command(name = "building-history")]
#[command(about = "Inspect and maintain smart-building trait history")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "HISTORY_CONFIG")]
    config: Option<PathBuf>,

    /// Database path, overrides storage.path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append a payload to a source
    Append {
        source: String,
        payload: String,

        /// Append the payload this many times
        #[arg(long, default_value = "1")]
        repeat: u32,
    },
    /// List a page of records
    List {
        source: String,

        /// Inclusive lower bound: RFC 3339 time or record id
        #[arg(long)]
        from: Option<String>,

        /// Exclusive upper bound: RFC 3339 time or record id
        #[arg(long)]
        to: Option<String>,

        #[arg(long, default_value = "0")]
        page_size: i32,

        #[arg(long, default_value = "")]
        page_token: String,

        /// Newest first
        #[arg(long)]
        desc: bool,
    },
    /// Count the records of a source
    Count { source: String },
    /// Keep only the newest `limit` records of a source
    TrimCount { source: String, limit: u64 },
    /// Delete records created before a time
    TrimTime {
        /// Only this source; all sources when omitted
        #[arg(long, default_value = "")]
        source: String,

        /// RFC 3339 time
        before: DateTime<Utc>,
    },
    /// List every known source
    Sources,
}

#[derive(Debug, Serialize)]
struct RecordOut {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    create_time: Option<DateTime<Utc>>,
    payload: String,
}

impl From<Record> for RecordOut {
    fn from(record: Record) -> Self {
        Self {
            id: record.id,
            create_time: record.create_time,
            payload: String::from_utf8_lossy(&record.payload).into_owned(),
        }
    }
}

#[derive(Debug, Serialize)]
struct PageOut {
    records: Vec<RecordOut>,
    total_size: usize,
    #[serde(skip_serializing_if = "String::is_empty")]
    next_page_token: String,
}

impl From<HistoryPage<Record>> for PageOut {
    fn from(page: HistoryPage<Record>) -> Self {
        Self {
            records: page.records.into_iter().map(RecordOut::from).collect(),
            total_size: page.total_size,
            next_page_token: page.next_page_token,
        }
    }
}

/// A bound given as a time if it parses as one, otherwise as a record id
fn parse_bound(bound: Option<&str>) -> Record {
    match bound {
        None => Record::default(),
        Some(text) => match DateTime::parse_from_rfc3339(text) {
            Ok(time) => Record::at(time.with_timezone(&Utc)),
            Err(_) => Record::with_id(text),
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

impl Cli {
    fn load_config(&self) -> Result<HistoryConfig> {
        let mut config = HistoryConfig::load(self.config.as_deref())?;
        if let Some(db) = &self.db {
            config.storage.path = db.clone();
            config.storage.in_memory = false;
        }
        Ok(config)
    }
}

async fn run(command: Command, factory: &StoreFactory) -> Result<()> {
    let database = || {
        factory
            .database()
            .cloned()
            .ok_or_else(|| HistoryError::config("this command needs the sqlite backend"))
    };

    match command {
        Command::Append {
            source,
            payload,
            repeat,
        } => {
            let store = factory.open(&source)?;
            let mut created = Vec::new();
            for _ in 0..repeat {
                let record = store.append(payload.clone().into_bytes()).await?;
                created.push(RecordOut::from(record));
            }
            info!(source = %source, count = created.len(), "Appended records");
            print_json(&created)
        }
        Command::List {
            source,
            from,
            to,
            page_size,
            page_token,
            desc,
        } => {
            let store = factory.open(&source)?;
            let slice = store.slice(parse_bound(from.as_deref()), parse_bound(to.as_deref()));
            let reader = PageReader::new(|record: &Record| Ok(record.clone()));
            let request = ListHistoryRequest {
                page_size,
                page_token,
                order_by: if desc { "record_time desc" } else { "" }.to_string(),
                ..Default::default()
            };
            let page = reader.list_records(slice.as_ref(), &request).await?;
            debug!(returned = page.records.len(), "Listed page");
            print_json(&PageOut::from(page))
        }
        Command::Count { source } => {
            let count = factory.open(&source)?.len().await?;
            print_json(&serde_json::json!({ "source": source, "count": count }))
        }
        Command::TrimCount { source, limit } => {
            let deleted = database()?.trim_count(&source, limit).await?;
            print_json(&serde_json::json!({ "source": source, "deleted": deleted }))
        }
        Command::TrimTime { source, before } => {
            let deleted = database()?.trim_time(&source, before).await?;
            print_json(&serde_json::json!({ "source": source, "before": before, "deleted": deleted }))
        }
        Command::Sources => print_json(&database()?.sources().await?),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    init_logging(LogConfig::from_settings(&config.logging).with_debug(cli.debug))?;
    debug!(backend = ?config.storage.backend, path = %config.storage.path.display(), "Loaded configuration");

    let factory = StoreFactory::from_config(&config).await?;
    let result = run(cli.command, &factory).await;

    if let Some(db) = factory.database().map(Arc::clone) {
        db.close().await;
    }
    result
}
