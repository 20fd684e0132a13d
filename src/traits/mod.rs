//! Typed history for device traits
//!
//! Each trait records its state as a JSON payload in a [`Store`] and lists it
//! back through the shared [`PageReader`]. The types here are the payloads
//! for the traits that keep history on this node.

use crate::error::{HistoryError, Result};
use crate::history::{HistoryPage, ListHistoryRequest, PageReader, Record, Store};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

/// Payload type stored in a trait's history
pub trait TraitRecord: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Trait name used in source names
    const TRAIT_NAME: &'static str;
}

/// Source name for `trait_name` on `device`
pub fn source_name(device: &str, trait_name: &str) -> String {
    format!("{device}/{trait_name}")
}

/// A decoded history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry<R> {
    pub record_time: DateTime<Utc>,
    #[serde(flatten)]
    pub value: R,
}

/// Page of decoded entries
pub type ListHistoryResponse<R> = HistoryPage<HistoryEntry<R>>;

/// Records and lists the history of one trait on one device
pub struct TraitHistory<R> {
    store: Arc<dyn Store>,
    reader: PageReader<HistoryEntry<R>>,
}

impl<R: TraitRecord> TraitHistory<R> {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            reader: PageReader::new(decode_entry::<R>),
        }
    }

    /// Append the current value
    pub async fn record(&self, value: &R) -> Result<Record> {
        let payload = serde_json::to_vec(value)?;
        let record = self.store.append(payload).await?;
        trace!(trait_name = R::TRAIT_NAME, id = %record.id, "Recorded trait history");
        Ok(record)
    }

    /// List a page of history
    pub async fn list(&self, request: &ListHistoryRequest) -> Result<ListHistoryResponse<R>> {
        self.reader.list_records(self.store.as_ref(), request).await
    }
}

fn decode_entry<R: DeserializeOwned>(record: &Record) -> Result<HistoryEntry<R>> {
    let record_time = record
        .create_time
        .ok_or_else(|| HistoryError::decode("record has no create time"))?;
    let value = serde_json::from_slice(&record.payload)
        .map_err(|e| HistoryError::decode(e.to_string()))?;
    Ok(HistoryEntry { record_time, value })
}

/// Occupancy state of a space
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupancyState {
    #[default]
    Unknown,
    Occupied,
    Unoccupied,
    Idle,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupancyRecord {
    pub state: OccupancyState,
    pub people_count: u32,
}

impl TraitRecord for OccupancyRecord {
    const TRAIT_NAME: &'static str = "occupancy";
}

/// Cumulative meter reading
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterReadingRecord {
    pub usage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub produced: Option<f64>,
    pub unit: String,
}

impl TraitRecord for MeterReadingRecord {
    const TRAIT_NAME: &'static str = "meter";
}

/// Air temperature in degrees Celsius and relative humidity in percent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AirTemperatureRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambient_temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_set_point: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambient_humidity: Option<f64>,
}

impl TraitRecord for AirTemperatureRecord {
    const TRAIT_NAME: &'static str = "air_temperature";
}

/// Electrical demand: amps, volts, watts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectricDemandRecord {
    pub current: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_factor: Option<f64>,
}

impl TraitRecord for ElectricDemandRecord {
    const TRAIT_NAME: &'static str = "electric_demand";
}
