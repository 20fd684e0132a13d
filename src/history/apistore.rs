//! Store backed by a remote `system/history` service
//!
//! Used by gateways that proxy history for devices on another node. Every
//! operation becomes one or more [`HistoryApi`] calls; the remote side owns
//! ids, ordering and retention.

use super::{Record, Slice, Store, MAX_PAGE_SIZE};
use crate::admin::{
    CreateHistoryRecordRequest, HistoryApi, HistoryQuery, HistoryRecord,
    ListHistoryRecordsRequest,
};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

const DESC_ORDER: &str = "record.create_time desc";

/// Proxy for one source on a remote node
#[derive(Clone)]
pub struct ApiStore {
    api: Arc<dyn HistoryApi>,
    name: String,
    source: String,
}

impl std::fmt::Debug for ApiStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiStore")
            .field("name", &self.name)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl ApiStore {
    /// `name` addresses the remote node, `source` the history stream on it
    pub fn new(api: Arc<dyn HistoryApi>, name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            api,
            name: name.into(),
            source: source.into(),
        }
    }

    fn whole(&self) -> ApiSlice {
        ApiSlice {
            store: self.clone(),
            from: Record::default(),
            to: Record::default(),
        }
    }
}

#[async_trait]
impl Slice for ApiStore {
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
impl Store for ApiStore {
    async fn append(&self, payload: Vec<u8>) -> Result<Record> {
        let created = self
            .api
            .create_history_record(CreateHistoryRecordRequest {
                name: self.name.clone(),
                record: HistoryRecord {
                    source: self.source.clone(),
                    payload,
                    ..Default::default()
                },
            })
            .await?;
        Ok(created.into_record())
    }
}

#[derive(Clone)]
struct ApiSlice {
    store: ApiStore,
    from: Record,
    to: Record,
}

impl ApiSlice {
    fn query(&self) -> HistoryQuery {
        let bound = |r: &Record| (!r.is_zero()).then(|| HistoryRecord::from_record(r.clone(), ""));
        HistoryQuery {
            source: self.store.source.clone(),
            from: bound(&self.from),
            to: bound(&self.to),
        }
    }

    async fn read_dir(&self, into: &mut [Record], order_by: &str) -> Result<usize> {
        let mut filled = 0;
        let mut page_token = String::new();

        while filled < into.len() {
            let want = (into.len() - filled).min(MAX_PAGE_SIZE);
            let page = self
                .store
                .api
                .list_history_records(ListHistoryRecordsRequest {
                    name: self.store.name.clone(),
                    query: self.query(),
                    page_size: i32::try_from(want).unwrap_or(i32::MAX),
                    page_token,
                    order_by: order_by.to_string(),
                })
                .await?;

            if page.records.is_empty() {
                break;
            }
            for record in page.records {
                if filled == into.len() {
                    break;
                }
                into[filled] = record.into_record();
                filled += 1;
            }

            if page.next_page_token.is_empty() {
                break;
            }
            page_token = page.next_page_token;
        }

        Ok(filled)
    }
}

#[async_trait]
impl Slice for ApiSlice {
    fn slice(&self, from: Record, to: Record) -> Box<dyn Slice> {
        let (from, to) = super::intersect_records(&self.from, &self.to, &from, &to);
        Box::new(ApiSlice {
            store: self.store.clone(),
            from,
            to,
        })
    }

    async fn read(&self, into: &mut [Record]) -> Result<usize> {
        self.read_dir(into, "").await
    }

    async fn read_desc(&self, into: &mut [Record]) -> Result<usize> {
        self.read_dir(into, DESC_ORDER).await
    }

    async fn len(&self) -> Result<usize> {
        let page = self
            .store
            .api
            .list_history_records(ListHistoryRecordsRequest {
                name: self.store.name.clone(),
                query: self.query(),
                page_size: 1,
                ..Default::default()
            })
            .await?;
        Ok(page.total_size)
    }
}
