//! Paged, typed reads over any history [`Slice`]
//!
//! Every trait-specific history service lists records the same way: filter
//! by a creation-time period, page through the result with an opaque token,
//! and decode each payload into the trait's record type. [`PageReader`]
//! implements that once.

use super::{Record, Slice};
use crate::error::{HistoryError, Result};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Page size used when the request asks for zero
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Largest page size honoured; larger requests are clamped
pub const MAX_PAGE_SIZE: usize = 1000;

/// Creation-time filter. `start_time` is inclusive, `end_time` exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Period {
    pub fn new(start_time: Option<DateTime<Utc>>, end_time: Option<DateTime<Utc>>) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    fn bounds(&self) -> (Record, Record) {
        let from = self.start_time.map(Record::at).unwrap_or_default();
        let to = self.end_time.map(Record::at).unwrap_or_default();
        (from, to)
    }
}

/// Sort order for listed records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest first (default)
    #[default]
    Ascending,
    /// Newest first
    Descending,
}

impl SortOrder {
    /// Parse an order-by directive such as `"record.create_time desc"`.
    ///
    /// Only the direction is significant; records are always ordered by
    /// creation.
    pub fn from_order_by(order_by: &str) -> Self {
        let directive = order_by.trim().to_ascii_lowercase();
        if directive == "desc" || directive.ends_with(" desc") {
            SortOrder::Descending
        } else {
            SortOrder::Ascending
        }
    }

    pub fn is_descending(&self) -> bool {
        matches!(self, SortOrder::Descending)
    }
}

/// List request shared by all trait history services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListHistoryRequest {
    pub period: Option<Period>,
    pub page_size: i32,
    pub page_token: String,
    pub order_by: String,
}

/// One page of decoded records
#[derive(Debug)]
pub struct HistoryPage<R> {
    /// Records that decoded successfully, in the requested order
    pub records: Vec<R>,

    /// Records matching the period, independent of paging
    pub total_size: usize,

    /// Token for the next page, empty on the last page
    pub next_page_token: String,

    /// Set if some records on this page could not be decoded
    pub decode_error: Option<HistoryError>,
}

impl<R> HistoryPage<R> {
    /// Turn a partial decode failure into an error, discarding the records
    pub fn into_result(self) -> Result<Self> {
        match self.decode_error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Position of the next page. Ascending cursors are the first record of the
/// next page (inclusive); descending cursors are the last record returned
/// (exclusive). The period the cursor was issued for travels with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Cursor {
    #[serde(rename = "id")]
    record_id: String,
    #[serde(default)]
    desc: bool,
    #[serde(default, skip_serializing_if = "is_unbounded")]
    period: Period,
}

fn is_unbounded(period: &Period) -> bool {
    *period == Period::default()
}

impl Cursor {
    fn encode(&self) -> Result<String> {
        Ok(STANDARD_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    fn decode(token: &str) -> Result<Self> {
        let bytes = STANDARD_NO_PAD
            .decode(token)
            .map_err(|_| HistoryError::invalid_input("malformed page token"))?;
        let cursor: Cursor = serde_json::from_slice(&bytes)
            .map_err(|_| HistoryError::invalid_input("malformed page token"))?;
        if cursor.record_id.is_empty() {
            return Err(HistoryError::invalid_input("page token has no position"));
        }
        Ok(cursor)
    }
}

type DecodeFn<R> = dyn Fn(&Record) -> Result<R> + Send + Sync;

/// Lists typed records from a [`Slice`] a page at a time
pub struct PageReader<R> {
    decode: Box<DecodeFn<R>>,
}

impl<R> fmt::Debug for PageReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageReader").finish_non_exhaustive()
    }
}

impl<R> PageReader<R> {
    /// Create a reader that decodes payloads with `decode`
    pub fn new<F>(decode: F) -> Self
    where
        F: Fn(&Record) -> Result<R> + Send + Sync + 'static,
    {
        Self {
            decode: Box::new(decode),
        }
    }

    /// Read one page.
    ///
    /// Decode failures do not fail the call: the failing records are skipped
    /// and reported together in [`HistoryPage::decode_error`].
    pub async fn list_records(
        &self,
        slice: &dyn Slice,
        request: &ListHistoryRequest,
    ) -> Result<HistoryPage<R>> {
        let page_size = clamp_page_size(request.page_size)?;
        let order = SortOrder::from_order_by(&request.order_by);

        let period = request.period.clone().unwrap_or_default();
        let (from, to) = period.bounds();
        let bounded = slice.slice(from, to);
        let total_size = bounded.len().await?;

        let paged = if request.page_token.is_empty() {
            bounded
        } else {
            let cursor = Cursor::decode(&request.page_token)?;
            if cursor.desc != order.is_descending() {
                return Err(HistoryError::invalid_input(
                    "page token was issued for the opposite sort order",
                ));
            }
            if cursor.period != period {
                return Err(HistoryError::invalid_input(
                    "page token was issued for a different period",
                ));
            }
            let position = Record::with_id(cursor.record_id);
            match order {
                SortOrder::Ascending => bounded.slice(position, Record::default()),
                SortOrder::Descending => bounded.slice(Record::default(), position),
            }
        };

        let mut buf = vec![Record::default(); page_size + 1];
        let n = match order {
            SortOrder::Ascending => paged.read(&mut buf).await?,
            SortOrder::Descending => paged.read_desc(&mut buf).await?,
        };
        buf.truncate(n);

        let mut next_page_token = String::new();
        if n > page_size {
            let position = match order {
                SortOrder::Ascending => &buf[page_size],
                SortOrder::Descending => &buf[page_size - 1],
            };
            next_page_token = Cursor {
                record_id: position.id.clone(),
                desc: order.is_descending(),
                period,
            }
            .encode()?;
            buf.truncate(page_size);
        }

        let attempted = buf.len();
        let mut records = Vec::with_capacity(attempted);
        let mut messages = Vec::new();
        for record in &buf {
            match (self.decode)(record) {
                Ok(value) => records.push(value),
                Err(err) => messages.push(format!("record {}: {err}", record.id)),
            }
        }

        let decode_error = (!messages.is_empty()).then(|| HistoryError::PageDecode {
            failed: messages.len(),
            attempted,
            messages,
        });

        debug!(
            returned = records.len(),
            total_size,
            has_more = !next_page_token.is_empty(),
            "Listed history page"
        );

        Ok(HistoryPage {
            records,
            total_size,
            next_page_token,
            decode_error,
        })
    }
}

fn clamp_page_size(requested: i32) -> Result<usize> {
    match usize::try_from(requested) {
        Err(_) => Err(HistoryError::invalid_input(format!(
            "page size must not be negative, got {requested}"
        ))),
        Ok(0) => Ok(DEFAULT_PAGE_SIZE),
        Ok(n) => Ok(n.min(MAX_PAGE_SIZE)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::memstore::MemStore;
    use crate::history::Store;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    /// Store with one record every 10ms from t=0 to t=90; payload is the offset
    async fn ten_records() -> MemStore {
        let now = Arc::new(AtomicI64::new(0));
        let clock = now.clone();
        let store = MemStore::new().with_clock(move || t(clock.load(Ordering::SeqCst)));
        for ms in (0..100).step_by(10) {
            now.store(ms, Ordering::SeqCst);
            store.append(ms.to_string().into_bytes()).await.unwrap();
        }
        store
    }

    fn offsets() -> PageReader<i64> {
        PageReader::new(|record: &Record| {
            std::str::from_utf8(&record.payload)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| HistoryError::decode("not a number"))
        })
    }

    #[rstest]
    #[case(0, DEFAULT_PAGE_SIZE)]
    #[case(7, 7)]
    #[case(5000, MAX_PAGE_SIZE)]
    fn test_page_size_clamp(#[case] requested: i32, #[case] expected: usize) {
        assert_eq!(clamp_page_size(requested).unwrap(), expected);
    }

    #[test]
    fn test_negative_page_size_rejected() {
        assert!(clamp_page_size(-1).unwrap_err().is_invalid_argument());
    }

    #[rstest]
    #[case("", SortOrder::Ascending)]
    #[case("record.create_time", SortOrder::Ascending)]
    #[case("record.create_time asc", SortOrder::Ascending)]
    #[case("record.create_time DESC", SortOrder::Descending)]
    #[case("desc", SortOrder::Descending)]
    #[case("description", SortOrder::Ascending)]
    fn test_order_by(#[case] order_by: &str, #[case] expected: SortOrder) {
        assert_eq!(SortOrder::from_order_by(order_by), expected);
    }

    #[tokio::test]
    async fn test_two_pages_ascending() {
        let store = ten_records().await;
        let reader = offsets();

        let mut request = ListHistoryRequest {
            page_size: 5,
            ..Default::default()
        };
        let first = reader.list_records(&store, &request).await.unwrap();
        assert_eq!(first.records, vec![0, 10, 20, 30, 40]);
        assert_eq!(first.total_size, 10);
        assert!(!first.next_page_token.is_empty());

        request.page_token = first.next_page_token;
        let second = reader.list_records(&store, &request).await.unwrap();
        assert_eq!(second.records, vec![50, 60, 70, 80, 90]);
        assert_eq!(second.total_size, 10);
        assert!(second.next_page_token.is_empty());
    }

    #[tokio::test]
    async fn test_period_filter() {
        let store = ten_records().await;
        let request = ListHistoryRequest {
            period: Some(Period::new(Some(t(30)), Some(t(70)))),
            page_size: 4,
            ..Default::default()
        };
        let page = offsets().list_records(&store, &request).await.unwrap();
        assert_eq!(page.records, vec![30, 40, 50, 60]);
        assert_eq!(page.total_size, 4);
        assert!(page.next_page_token.is_empty());
    }

    #[tokio::test]
    async fn test_descending_pages_reverse_ascending() {
        let store = ten_records().await;
        let reader = offsets();
        let mut request = ListHistoryRequest {
            page_size: 3,
            order_by: "record.create_time desc".to_string(),
            ..Default::default()
        };

        let mut seen = Vec::new();
        loop {
            let page = reader.list_records(&store, &request).await.unwrap();
            assert_eq!(page.total_size, 10);
            seen.extend(page.records);
            if page.next_page_token.is_empty() {
                break;
            }
            request.page_token = page.next_page_token;
        }
        assert_eq!(seen, vec![90, 80, 70, 60, 50, 40, 30, 20, 10, 0]);
    }

    #[tokio::test]
    async fn test_mixed_direction_token_rejected() {
        let store = ten_records().await;
        let reader = offsets();
        let asc = ListHistoryRequest {
            page_size: 2,
            ..Default::default()
        };
        let page = reader.list_records(&store, &asc).await.unwrap();

        let desc = ListHistoryRequest {
            page_token: page.next_page_token,
            order_by: "desc".to_string(),
            ..asc
        };
        let err = reader.list_records(&store, &desc).await.unwrap_err();
        assert!(matches!(err, HistoryError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_token_bound_to_its_period() {
        let store = ten_records().await;
        let reader = offsets();
        let all = ListHistoryRequest {
            page_size: 2,
            ..Default::default()
        };
        let page = reader.list_records(&store, &all).await.unwrap();
        assert_eq!(page.records, vec![0, 10]);

        // Reusing the token with a later period must not leak records before it
        let narrower = ListHistoryRequest {
            period: Some(Period::new(Some(t(50)), None)),
            page_token: page.next_page_token.clone(),
            ..all.clone()
        };
        let err = reader.list_records(&store, &narrower).await.unwrap_err();
        assert!(err.is_invalid_argument());

        // An explicit open period is the same as none
        let open = ListHistoryRequest {
            period: Some(Period::default()),
            page_token: page.next_page_token,
            ..all
        };
        let next = reader.list_records(&store, &open).await.unwrap();
        assert_eq!(next.records, vec![20, 30]);
    }

    #[tokio::test]
    async fn test_garbage_token_rejected() {
        let store = ten_records().await;
        let request = ListHistoryRequest {
            page_token: "!!not a token!!".to_string(),
            ..Default::default()
        };
        let err = offsets().list_records(&store, &request).await.unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn test_decode_failures_are_collected() {
        let store = MemStore::new();
        store.append(b"1".to_vec()).await.unwrap();
        store.append(b"garbage".to_vec()).await.unwrap();
        store.append(b"3".to_vec()).await.unwrap();

        let page = offsets()
            .list_records(&store, &ListHistoryRequest::default())
            .await
            .unwrap();
        assert_eq!(page.records, vec![1, 3]);
        match page.decode_error {
            Some(HistoryError::PageDecode {
                failed, attempted, ..
            }) => {
                assert_eq!((failed, attempted), (1, 3));
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }
}
