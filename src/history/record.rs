//! Store-facing history record and bound helpers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One stored history entry.
///
/// Records are ordered within a source by `id`, which the store assigns on
/// append. A record with every field at its zero value is used as an
/// unbounded range limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Opaque, store-assigned, ordered identifier
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Time the record was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,

    /// Opaque payload bytes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

impl Record {
    /// Bound that refers to a record id
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Bound that refers to a point in time
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            create_time: Some(time),
            ..Default::default()
        }
    }

    /// True if every field is at its zero value
    pub fn is_zero(&self) -> bool {
        self.id.is_empty() && self.create_time.is_none() && self.payload.is_empty()
    }

    /// Compare two bounds if they share a dimension.
    ///
    /// Ids are compared lexicographically, which matches numeric order for the
    /// fixed-width encodings the stores emit.
    pub fn compare_bound(&self, other: &Record) -> Option<Ordering> {
        if !self.id.is_empty() && !other.id.is_empty() {
            return Some(self.id.cmp(&other.id));
        }
        match (self.create_time, other.create_time) {
            (Some(a), Some(b)) if self.id.is_empty() && other.id.is_empty() => Some(a.cmp(&b)),
            _ => None,
        }
    }
}

/// Intersect two `[from, to)` ranges expressed as record bounds.
///
/// The later `from` and the earlier `to` win. When two bounds cannot be
/// compared (one by id, the other by time) the second range's bound wins.
pub fn intersect_records(
    from1: &Record,
    to1: &Record,
    from2: &Record,
    to2: &Record,
) -> (Record, Record) {
    let from = pick(from1, from2, Ordering::Greater);
    let to = pick(to1, to2, Ordering::Less);
    (from, to)
}

fn pick(current: &Record, narrower: &Record, keep_when: Ordering) -> Record {
    if narrower.is_zero() {
        return current.clone();
    }
    if current.is_zero() {
        return narrower.clone();
    }
    match current.compare_bound(narrower) {
        Some(ord) if ord == keep_when => current.clone(),
        _ => narrower.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_zero_record() {
        assert!(Record::default().is_zero());
        assert!(!Record::with_id("0000000000000001").is_zero());
        assert!(!Record::at(t(0)).is_zero());
        let payload_only = Record {
            payload: vec![1],
            ..Default::default()
        };
        assert!(!payload_only.is_zero());
    }

    #[test]
    fn test_intersect_unbounded_takes_other_side() {
        let (from, to) = intersect_records(
            &Record::default(),
            &Record::default(),
            &Record::at(t(10)),
            &Record::at(t(20)),
        );
        assert_eq!(from, Record::at(t(10)));
        assert_eq!(to, Record::at(t(20)));
    }

    #[test]
    fn test_intersect_narrows_by_time() {
        let (from, to) = intersect_records(
            &Record::at(t(10)),
            &Record::at(t(50)),
            &Record::at(t(5)),
            &Record::at(t(30)),
        );
        assert_eq!(from, Record::at(t(10)));
        assert_eq!(to, Record::at(t(30)));
    }

    #[test]
    fn test_intersect_narrows_by_id() {
        let (from, to) = intersect_records(
            &Record::with_id("0000000000000005"),
            &Record::default(),
            &Record::with_id("0000000000000009"),
            &Record::with_id("000000000000000F"),
        );
        assert_eq!(from.id, "0000000000000009");
        assert_eq!(to.id, "000000000000000F");
    }

    #[test]
    fn test_intersect_mixed_dimensions_prefers_second() {
        let (from, _) = intersect_records(
            &Record::at(t(100)),
            &Record::default(),
            &Record::with_id("0000000000000001"),
            &Record::default(),
        );
        assert_eq!(from.id, "0000000000000001");
    }
}
