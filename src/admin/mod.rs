//! `system/history` administration API
//!
//! Exposes the raw records of a [`Database`](crate::history::sqlitestore::Database)
//! across all sources. Remote nodes reach it through [`HistoryApi`]; the
//! [`apistore`](crate::history::apistore) backend wraps a client of this API
//! as an ordinary history store.

mod server;

pub use server::HistoryAdminServer;

use crate::error::{HistoryError, Result};
use crate::history::Record;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record as seen through the admin API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryRecord {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

impl HistoryRecord {
    /// Bound or record of a store, tagged with `source`
    pub fn from_record(record: Record, source: impl Into<String>) -> Self {
        Self {
            id: record.id,
            source: source.into(),
            create_time: record.create_time,
            payload: record.payload,
        }
    }

    /// Drop the source
    pub fn into_record(self) -> Record {
        Record {
            id: self.id,
            create_time: self.create_time,
            payload: self.payload,
        }
    }
}

/// Filter for listing records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    /// Only records of this source; empty matches all
    pub source: String,
    /// Inclusive lower bound by id or create time
    pub from: Option<HistoryRecord>,
    /// Exclusive upper bound by id or create time
    pub to: Option<HistoryRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateHistoryRecordRequest {
    pub name: String,
    pub record: HistoryRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListHistoryRecordsRequest {
    pub name: String,
    pub query: HistoryQuery,
    pub page_size: i32,
    pub page_token: String,
    pub order_by: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListHistoryRecordsResponse {
    pub records: Vec<HistoryRecord>,
    pub next_page_token: String,
    pub total_size: usize,
}

/// Client-facing history service
#[async_trait]
pub trait HistoryApi: Send + Sync {
    /// Append a record; the service assigns id and create time
    async fn create_history_record(
        &self,
        request: CreateHistoryRecordRequest,
    ) -> Result<HistoryRecord>;

    /// List records a page at a time
    async fn list_history_records(
        &self,
        request: ListHistoryRecordsRequest,
    ) -> Result<ListHistoryRecordsResponse>;
}

/// Wire page token: the first record of the next page plus the total size
/// computed when paging started.
///
/// Encoded as JSON then base64 (standard alphabet, no padding). Unrelated to
/// the record id strings the store hands out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
    pub record: HistoryRecord,
    pub total_size: usize,
}

impl PageToken {
    pub fn encode(&self) -> Result<String> {
        Ok(STANDARD_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = STANDARD_NO_PAD
            .decode(token)
            .map_err(|e| HistoryError::invalid_input(format!("bad page token: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| HistoryError::invalid_input(format!("bad page token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_token_is_unpadded_base64_json() {
        let token = PageToken {
            record: HistoryRecord {
                id: "00000000000F4240".to_string(),
                ..Default::default()
            },
            total_size: 12,
        };
        let encoded = token.encode().unwrap();
        assert!(!encoded.contains('='));

        let json = STANDARD_NO_PAD.decode(&encoded).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["record"]["id"], "00000000000F4240");
        assert_eq!(value["total_size"], 12);

        assert_eq!(PageToken::decode(&encoded).unwrap(), token);
    }

    #[test]
    fn test_bad_page_token() {
        let err = PageToken::decode("???").unwrap_err();
        assert!(err.is_invalid_argument());

        let not_json = STANDARD_NO_PAD.encode(b"nope");
        assert!(PageToken::decode(&not_json).unwrap_err().is_invalid_argument());
    }
}
