use super::{
    CreateHistoryRecordRequest, HistoryApi, HistoryRecord, ListHistoryRecordsRequest,
    ListHistoryRecordsResponse, PageToken,
};
use crate::error::{HistoryError, Result};
use crate::history::pager::SortOrder;
use crate::history::sqlitestore::record_id::resolve_bounds;
use crate::history::sqlitestore::{Database, DbRecord, RecordId};
use crate::history::{WriteOptions, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Serves [`HistoryApi`] from a local database
#[derive(Debug, Clone)]
pub struct HistoryAdminServer {
    name: String,
    db: Arc<Database>,
    options: WriteOptions,
}

impl HistoryAdminServer {
    /// `name` is the node name requests must address; an empty request name
    /// is accepted as this node.
    pub fn new(name: impl Into<String>, db: Arc<Database>) -> Self {
        Self {
            name: name.into(),
            db,
            options: WriteOptions::default(),
        }
    }

    /// Retention applied to records created through the API
    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if name.is_empty() || name == self.name {
            Ok(())
        } else {
            Err(HistoryError::invalid_input(format!("unknown node '{name}'")))
        }
    }
}

#[async_trait]
impl HistoryApi for HistoryAdminServer {
    #[instrument(skip_all, fields(source = %request.record.source))]
    async fn create_history_record(
        &self,
        request: CreateHistoryRecordRequest,
    ) -> Result<HistoryRecord> {
        self.check_name(&request.name)?;
        let record = request.record;
        if record.source.is_empty() {
            return Err(HistoryError::invalid_input("record.source is required"));
        }
        if !record.id.is_empty() {
            return Err(HistoryError::invalid_input("record.id is assigned by the server"));
        }

        let mut row = DbRecord::new(record.source, self.db.now(), record.payload);
        self.db.insert(&mut row, &self.options).await?;

        Ok(HistoryRecord {
            id: row.id.to_string(),
            source: row.source,
            create_time: Some(row.create_time),
            payload: row.payload,
        })
    }

    #[instrument(skip_all, fields(source = %request.query.source))]
    async fn list_history_records(
        &self,
        request: ListHistoryRecordsRequest,
    ) -> Result<ListHistoryRecordsResponse> {
        self.check_name(&request.name)?;
        let page_size = match usize::try_from(request.page_size) {
            Err(_) => return Err(HistoryError::invalid_input("page_size must not be negative")),
            Ok(0) => DEFAULT_PAGE_SIZE,
            Ok(n) => n.min(MAX_PAGE_SIZE),
        };
        let desc = SortOrder::from_order_by(&request.order_by).is_descending();

        let query = request.query;
        let from = query.from.map(HistoryRecord::into_record).unwrap_or_default();
        let to = query.to.map(HistoryRecord::into_record).unwrap_or_default();
        let Some((from, to)) = resolve_bounds(&from, &to)? else {
            return Ok(ListHistoryRecordsResponse::default());
        };

        let (page_from, page_to, total_size) = if request.page_token.is_empty() {
            let total = self.db.count(&query.source, from, to).await?;
            (from, to, total)
        } else {
            let token = PageToken::decode(&request.page_token)?;
            let next = RecordId::parse(&token.record.id)?;
            if desc {
                // The token is the first record of the next page, so keep it.
                let end = RecordId::from_raw(next.as_i64().saturating_add(1));
                let to = if to.is_zero() { end } else { to.min(end) };
                (from, to, token.total_size)
            } else {
                (from.max(next), to, token.total_size)
            }
        };

        let mut rows = vec![DbRecord::default(); page_size + 1];
        let n = self
            .db
            .read(&query.source, page_from, page_to, desc, &mut rows)
            .await?;
        rows.truncate(n);

        let mut next_page_token = String::new();
        if n > page_size {
            let next = rows.pop().map(|row| row.id).unwrap_or_default();
            next_page_token = PageToken {
                record: HistoryRecord {
                    id: next.to_string(),
                    ..Default::default()
                },
                total_size,
            }
            .encode()?;
        }

        debug!(returned = rows.len(), total_size, "Listed history records");
        Ok(ListHistoryRecordsResponse {
            records: rows
                .into_iter()
                .map(|row| HistoryRecord {
                    id: row.id.to_string(),
                    source: row.source,
                    create_time: Some(row.create_time),
                    payload: row.payload,
                })
                .collect(),
            next_page_token,
            total_size,
        })
    }
}
