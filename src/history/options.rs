//! Write-time retention options

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Age-based retention rule. Only one may be active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeLimit {
    /// Delete records created before this instant
    EarliestTime(DateTime<Utc>),
    /// Delete records older than this, relative to the write time
    MaxAge(Duration),
}

/// Retention policy applied in the same transaction as every write.
///
/// `with_earliest_time` and `with_max_age` are mutually exclusive; the last
/// one set wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    max_count: Option<u64>,
    age_limit: Option<AgeLimit>,
}

impl WriteOptions {
    /// No retention
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `n` records per source. Zero means no limit.
    pub fn with_max_count(mut self, n: u64) -> Self {
        self.max_count = (n > 0).then_some(n);
        self
    }

    /// Remove any count limit
    pub fn with_no_max_count(mut self) -> Self {
        self.max_count = None;
        self
    }

    /// Drop records created before `t`
    pub fn with_earliest_time(mut self, t: DateTime<Utc>) -> Self {
        self.age_limit = Some(AgeLimit::EarliestTime(t));
        self
    }

    /// Drop records older than `age` at write time
    pub fn with_max_age(mut self, age: Duration) -> Self {
        self.age_limit = Some(AgeLimit::MaxAge(age));
        self
    }

    /// Configured count limit
    pub fn max_count(&self) -> Option<u64> {
        self.max_count
    }

    /// Configured age limit
    pub fn age_limit(&self) -> Option<AgeLimit> {
        self.age_limit
    }

    /// Cutoff instant for age-based retention at `now`
    pub fn earliest_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.age_limit? {
            AgeLimit::EarliestTime(t) => Some(t),
            AgeLimit::MaxAge(age) => {
                let age = chrono::Duration::from_std(age).ok()?;
                now.checked_sub_signed(age)
            }
        }
    }

    /// True if no retention would run
    pub fn is_empty(&self) -> bool {
        self.max_count.is_none() && self.age_limit.is_none()
    }

    /// Overlay `other` on top of these options; set fields in `other` win
    pub fn merge(&self, other: &WriteOptions) -> WriteOptions {
        WriteOptions {
            max_count: other.max_count.or(self.max_count),
            age_limit: other.age_limit.or(self.age_limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_age_limits_last_one_wins() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let opts = WriteOptions::new()
            .with_earliest_time(t)
            .with_max_age(Duration::from_secs(60));
        assert_eq!(
            opts.age_limit(),
            Some(AgeLimit::MaxAge(Duration::from_secs(60)))
        );

        let opts = opts.with_earliest_time(t);
        assert_eq!(opts.age_limit(), Some(AgeLimit::EarliestTime(t)));
    }

    #[test]
    fn test_max_count_zero_means_unlimited() {
        assert_eq!(WriteOptions::new().with_max_count(0).max_count(), None);
        assert_eq!(WriteOptions::new().with_max_count(5).max_count(), Some(5));
        assert_eq!(
            WriteOptions::new()
                .with_max_count(5)
                .with_no_max_count()
                .max_count(),
            None
        );
    }

    #[test]
    fn test_earliest_time_from_max_age() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let opts = WriteOptions::new().with_max_age(Duration::from_secs(3600));
        assert_eq!(
            opts.earliest_time(now),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(WriteOptions::new().earliest_time(now), None);
    }

    #[test]
    fn test_merge_prefers_call_options() {
        let store = WriteOptions::new()
            .with_max_count(10)
            .with_max_age(Duration::from_secs(5));
        let call = WriteOptions::new().with_max_count(3);
        let merged = store.merge(&call);
        assert_eq!(merged.max_count(), Some(3));
        assert_eq!(
            merged.age_limit(),
            Some(AgeLimit::MaxAge(Duration::from_secs(5)))
        );
    }
}
