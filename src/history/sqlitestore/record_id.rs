//! Ordered record identifiers combining a millisecond timestamp and a serial

use crate::error::{HistoryError, Result};
use crate::history::Record;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Number of serial values available within one millisecond
pub const SERIALS_PER_MILLI: i64 = 1_000_000;

/// Last millisecond whose full serial range fits in an `i64` (2262-04-11)
pub const MAX_MILLIS: i64 = i64::MAX / SERIALS_PER_MILLI - 1;

/// `timestamp_millis * 1_000_000 + serial`, with `serial` in `0..1_000_000`.
///
/// Numeric order implies non-decreasing timestamp order. The zero value is
/// used as "unbounded" in range queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(i64);

impl RecordId {
    /// Unbounded marker
    pub const ZERO: RecordId = RecordId(0);

    /// Build an id for `time` truncated to the millisecond.
    ///
    /// Times before the Unix epoch clamp to [`RecordId::ZERO`]. Times after
    /// [`MAX_MILLIS`] clamp to an id above every allocatable one, which is
    /// only useful as a range bound.
    pub fn new(time: DateTime<Utc>, serial: u32) -> Self {
        Self::from_millis(time.timestamp_millis(), serial)
    }

    /// Build an id from a raw millisecond timestamp, clamped as in [`RecordId::new`]
    pub fn from_millis(millis: i64, serial: u32) -> Self {
        if millis > MAX_MILLIS {
            return RecordId((MAX_MILLIS + 1) * SERIALS_PER_MILLI);
        }
        let serial = i64::from(serial).min(SERIALS_PER_MILLI - 1);
        RecordId(millis.max(0) * SERIALS_PER_MILLI + serial)
    }

    /// First id of `millis` for a new record.
    ///
    /// Fails with `InvalidInput` past [`MAX_MILLIS`], where ids could no
    /// longer hold the time and a full serial range.
    pub fn first_in(millis: i64) -> Result<Self> {
        if millis > MAX_MILLIS {
            return Err(HistoryError::invalid_input(format!(
                "record time {millis}ms is past the last representable millisecond {MAX_MILLIS}"
            )));
        }
        Ok(Self::from_millis(millis, 0))
    }

    /// Wrap a raw database value
    pub fn from_raw(raw: i64) -> Self {
        RecordId(raw)
    }

    /// Raw integer value as stored
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// True for the unbounded marker
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Millisecond timestamp part
    pub fn millis(&self) -> i64 {
        self.0.div_euclid(SERIALS_PER_MILLI)
    }

    /// Serial part
    pub fn serial(&self) -> u32 {
        self.0.rem_euclid(SERIALS_PER_MILLI) as u32
    }

    /// Creation time encoded in the id, at millisecond precision
    pub fn time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis()).unwrap_or_default()
    }

    /// Next id within the same millisecond, or `None` if the serial space is
    /// exhausted.
    pub fn next(&self) -> Option<RecordId> {
        if self.serial() as i64 >= SERIALS_PER_MILLI - 1 {
            return None;
        }
        self.0.checked_add(1).map(RecordId)
    }

    /// Parse the fixed-width hex encoding produced by `Display`
    pub fn parse(s: &str) -> Result<Self> {
        let raw = i64::from_str_radix(s, 16).map_err(|_| HistoryError::invalid_record_id(s))?;
        if raw < 0 || s.starts_with(['+', '-']) {
            return Err(HistoryError::invalid_record_id(s));
        }
        Ok(RecordId(raw))
    }
}

/// Resolve `[from, to)` record bounds to ids.
///
/// An id bound is parsed; otherwise a time bound maps to the first id of its
/// millisecond. Returns `None` when the range cannot contain anything.
pub(crate) fn resolve_bounds(from: &Record, to: &Record) -> Result<Option<(RecordId, RecordId)>> {
    let lo = bound_id(from)?;
    let hi = bound_id(to)?;
    // An explicit upper bound at or before the epoch excludes everything.
    if hi.is_zero() && !to.is_zero() {
        return Ok(None);
    }
    if !lo.is_zero() && !hi.is_zero() && lo >= hi {
        return Ok(None);
    }
    Ok(Some((lo, hi)))
}

fn bound_id(bound: &Record) -> Result<RecordId> {
    if !bound.id.is_empty() {
        return RecordId::parse(&bound.id);
    }
    Ok(bound
        .create_time
        .map(|t| RecordId::new(t, 0))
        .unwrap_or(RecordId::ZERO))
}

impl fmt::Display for RecordId {
    /// 16 uppercase hex digits so string order matches numeric order
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self> {
        RecordId::parse(s)
    }
}
