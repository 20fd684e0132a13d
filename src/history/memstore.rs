//! In-memory history store
//!
//! Records live in a `VecDeque` behind an async lock. Ids are fixed-width
//! hex sequence numbers, so lexical and numeric order agree. Useful for tests
//! and for traits whose history does not need to survive a restart.

use super::{Clock, Record, Slice, Store, WriteOptions};
use crate::error::{HistoryError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

#[derive(Debug, Default)]
struct MemState {
    records: VecDeque<Record>,
    last_seq: u64,
    last_time: Option<DateTime<Utc>>,
}

/// Volatile store for a single source
#[derive(Clone)]
pub struct MemStore {
    state: Arc<RwLock<MemState>>,
    clock: Clock,
    options: WriteOptions,
}

impl std::fmt::Debug for MemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStore")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemState::default())),
            clock: Arc::new(Utc::now),
            options: WriteOptions::default(),
        }
    }

    /// Use `clock` for record creation times
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Retention applied after every append
    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    fn whole(&self) -> MemSlice {
        MemSlice {
            state: self.state.clone(),
            from: Record::default(),
            to: Record::default(),
        }
    }
}

#[async_trait]
impl Slice for MemStore {
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
        Ok(self.state.read().await.records.len())
    }
}

#[async_trait]
impl Store for MemStore {
    async fn append(&self, payload: Vec<u8>) -> Result<Record> {
        let now = (self.clock)();
        let mut state = self.state.write().await;

        if let Some(last) = state.last_time {
            if now < last {
                return Err(HistoryError::NonMonotonicTime { last, now });
            }
        }

        state.last_seq += 1;
        let record = Record {
            id: format!("{:016X}", state.last_seq),
            create_time: Some(now),
            payload,
        };
        state.records.push_back(record.clone());
        state.last_time = Some(now);

        let mut evicted = 0;
        if let Some(max) = self.options.max_count() {
            let max = usize::try_from(max).unwrap_or(usize::MAX);
            while state.records.len() > max {
                state.records.pop_front();
                evicted += 1;
            }
        }
        if let Some(earliest) = self.options.earliest_time(now) {
            while state
                .records
                .front()
                .is_some_and(|r| r.create_time.is_some_and(|t| t < earliest))
            {
                state.records.pop_front();
                evicted += 1;
            }
        }

        trace!(id = %record.id, evicted, "Appended in-memory record");
        Ok(record)
    }
}

#[derive(Clone)]
struct MemSlice {
    state: Arc<RwLock<MemState>>,
    from: Record,
    to: Record,
}

impl MemSlice {
    fn contains(&self, record: &Record) -> bool {
        at_or_after(record, &self.from) && before(record, &self.to)
    }
}

#[async_trait]
impl Slice for MemSlice {
    fn slice(&self, from: Record, to: Record) -> Box<dyn Slice> {
        let (from, to) = super::intersect_records(&self.from, &self.to, &from, &to);
        Box::new(MemSlice {
            state: self.state.clone(),
            from,
            to,
        })
    }

    async fn read(&self, into: &mut [Record]) -> Result<usize> {
        let state = self.state.read().await;
        let matching = state.records.iter().filter(|r| self.contains(r));
        Ok(fill(into, matching))
    }

    async fn read_desc(&self, into: &mut [Record]) -> Result<usize> {
        let state = self.state.read().await;
        let matching = state.records.iter().rev().filter(|r| self.contains(r));
        Ok(fill(into, matching))
    }

    async fn len(&self) -> Result<usize> {
        let state = self.state.read().await;
        Ok(state.records.iter().filter(|r| self.contains(r)).count())
    }
}

fn fill<'a>(into: &mut [Record], records: impl Iterator<Item = &'a Record>) -> usize {
    let mut n = 0;
    for (slot, record) in into.iter_mut().zip(records) {
        *slot = record.clone();
        n += 1;
    }
    n
}

fn at_or_after(record: &Record, from: &Record) -> bool {
    if !from.id.is_empty() {
        return record.id >= from.id;
    }
    match (from.create_time, record.create_time) {
        (Some(bound), Some(t)) => t >= bound,
        _ => true,
    }
}

fn before(record: &Record, to: &Record) -> bool {
    if !to.id.is_empty() {
        return record.id < to.id;
    }
    match (to.create_time, record.create_time) {
        (Some(bound), Some(t)) => t < bound,
        _ => true,
    }
}
