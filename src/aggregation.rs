//! Aggregation levels and calendar bucket alignment.

use crate::error::PvError;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a metric is collapsed over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AggregationLevel {
    /// A single scalar over every row.
    #[default]
    Default,
    Hourly,
    Daily,
    Monthly,
    Yearly,
}

impl AggregationLevel {
    pub const ALL: [AggregationLevel; 5] = [
        AggregationLevel::Default,
        AggregationLevel::Hourly,
        AggregationLevel::Daily,
        AggregationLevel::Monthly,
        AggregationLevel::Yearly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationLevel::Default => "default",
            AggregationLevel::Hourly => "hourly",
            AggregationLevel::Daily => "daily",
            AggregationLevel::Monthly => "monthly",
            AggregationLevel::Yearly => "yearly",
        }
    }

    pub fn is_bucketed(&self) -> bool {
        !matches!(self, AggregationLevel::Default)
    }

    /// Start of the bucket containing `ts`, or `None` for `Default`.
    ///
    /// Buckets are right-open: the bucket labelled `T` covers `[T, next boundary)`.
    pub fn bucket_start(&self, ts: NaiveDateTime) -> Option<NaiveDateTime> {
        let date = ts.date();
        match self {
            AggregationLevel::Default => None,
            AggregationLevel::Hourly => NaiveTime::from_hms_opt(ts.hour(), 0, 0)
                .map(|t| date.and_time(t)),
            AggregationLevel::Daily => Some(date.and_time(NaiveTime::MIN)),
            AggregationLevel::Monthly => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .map(|d| d.and_time(NaiveTime::MIN)),
            AggregationLevel::Yearly => {
                NaiveDate::from_ymd_opt(date.year(), 1, 1).map(|d| d.and_time(NaiveTime::MIN))
            }
        }
    }
}

impl fmt::Display for AggregationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationLevel {
    type Err = PvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(AggregationLevel::Default),
            "hourly" => Ok(AggregationLevel::Hourly),
            "daily" => Ok(AggregationLevel::Daily),
            "monthly" => Ok(AggregationLevel::Monthly),
            "yearly" => Ok(AggregationLevel::Yearly),
            _ => Err(PvError::InvalidAggregation(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn parses_known_levels() {
        for level in AggregationLevel::ALL {
            assert_eq!(level.as_str().parse::<AggregationLevel>().unwrap(), level);
        }
        assert_eq!(" Daily ".parse::<AggregationLevel>().unwrap(), AggregationLevel::Daily);
    }

    #[test]
    fn rejects_unknown_level() {
        let err = "weekly".parse::<AggregationLevel>().unwrap_err();
        assert!(matches!(err, PvError::InvalidAggregation(ref s) if s == "weekly"));
        assert!("".parse::<AggregationLevel>().is_err());
    }

    #[test]
    fn aligns_to_calendar_boundaries() {
        let t = ts("2024-07-15 13:45:00");
        assert_eq!(AggregationLevel::Default.bucket_start(t), None);
        assert_eq!(AggregationLevel::Hourly.bucket_start(t), Some(ts("2024-07-15 13:00:00")));
        assert_eq!(AggregationLevel::Daily.bucket_start(t), Some(ts("2024-07-15 00:00:00")));
        assert_eq!(AggregationLevel::Monthly.bucket_start(t), Some(ts("2024-07-01 00:00:00")));
        assert_eq!(AggregationLevel::Yearly.bucket_start(t), Some(ts("2024-01-01 00:00:00")));
    }

    #[test]
    fn boundary_belongs_to_the_bucket_it_starts() {
        let t = ts("2024-08-01 00:00:00");
        assert_eq!(AggregationLevel::Monthly.bucket_start(t), Some(t));
        let just_before = ts("2024-07-31 23:55:00");
        assert_eq!(
            AggregationLevel::Monthly.bucket_start(just_before),
            Some(ts("2024-07-01 00:00:00"))
        );
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&AggregationLevel::Monthly).unwrap(), "\"monthly\"");
        let level: AggregationLevel = serde_json::from_str("\"hourly\"").unwrap();
        assert_eq!(level, AggregationLevel::Hourly);
    }
}
