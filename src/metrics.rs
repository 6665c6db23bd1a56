//! PV Performance Metrics
//!
//! Total energy, specific yield and temperature-corrected performance ratio over
//! a cleaned frame (the whole table or any query result carrying the required
//! columns).
//!
//! Numeric policy:
//! - plain `f64` throughout, sums are never rounded before the final division
//! - every value leaving this module is rounded to 2 decimals (ties to even)
//! - bucketed results contain one entry per non-empty bucket, in time order;
//!   silent periods produce no entry rather than a zero
//! - an undefined performance ratio is `None`, never `0.0`

use crate::aggregation::AggregationLevel;
use crate::error::{PvError, Result};
use crate::table::{ENERGY_KWH, PYRANOMETER_1, TEMPERATURE_PROBE_1, TIMESTAMP};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Rated DC capacity of the monitored site at STC, in kWp.
pub const DEFAULT_RATED_CAPACITY_KWP: f64 = 1058.4;

/// Power temperature coefficient for poly-Si modules, per °C.
pub const DEFAULT_GAMMA: f64 = -0.004;

const STC_IRRADIANCE_W_M2: f64 = 1000.0;
const STC_CELL_TEMPERATURE_C: f64 = 25.0;

/// Plant constants the ratio metrics depend on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PvParameters {
    pub rated_capacity_kwp: f64,
    pub gamma: f64,
}

impl Default for PvParameters {
    fn default() -> Self {
        Self {
            rated_capacity_kwp: DEFAULT_RATED_CAPACITY_KWP,
            gamma: DEFAULT_GAMMA,
        }
    }
}

/// The metrics the assistant can compute on a query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    TotalEnergy,
    SpecificYield,
    PerformanceRatio,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::TotalEnergy => "total_energy",
            MetricKind::SpecificYield => "specific_yield",
            MetricKind::PerformanceRatio => "performance_ratio",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            MetricKind::TotalEnergy => "kWh",
            MetricKind::SpecificYield => "kWh/kWp",
            MetricKind::PerformanceRatio => "%",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = PvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "total_energy" | "energy" => Ok(MetricKind::TotalEnergy),
            "specific_yield" | "yield" => Ok(MetricKind::SpecificYield),
            "performance_ratio" | "pr" | "temperature_corrected_pr" => {
                Ok(MetricKind::PerformanceRatio)
            }
            other => Err(PvError::InvalidParameter(format!("unknown metric '{}'", other))),
        }
    }
}

/// One bucket of a time-bucketed metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketValue {
    pub bucket_start: NaiveDateTime,
    /// `None` when the value is undefined for this bucket.
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricResult {
    Scalar(Option<f64>),
    Series(Vec<BucketValue>),
}

impl MetricResult {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricResult::Scalar(v) => *v,
            MetricResult::Series(_) => None,
        }
    }

    pub fn buckets(&self) -> &[BucketValue] {
        match self {
            MetricResult::Scalar(_) => &[],
            MetricResult::Series(b) => b,
        }
    }

    /// Apply `f` to every defined value, keeping the shape.
    fn map_values(self, f: impl Fn(f64) -> f64) -> Self {
        match self {
            MetricResult::Scalar(v) => MetricResult::Scalar(v.map(&f)),
            MetricResult::Series(buckets) => MetricResult::Series(
                buckets
                    .into_iter()
                    .map(|b| BucketValue {
                        bucket_start: b.bucket_start,
                        value: b.value.map(&f),
                    })
                    .collect(),
            ),
        }
    }
}

/// Round to two decimals, ties to even.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// Cumulative AC energy in kWh.
///
/// Requires `Energy_kWh`, plus `timestamp` when bucketed.
pub fn calculate_total_energy(
    frame: &DataFrame,
    aggregation: AggregationLevel,
) -> Result<MetricResult> {
    require_columns(frame, &[ENERGY_KWH], aggregation)?;
    let energy = float_column(frame, ENERGY_KWH)?;

    if !aggregation.is_bucketed() {
        let total: f64 = energy.iter().sum();
        debug!("Total energy over {} rows: {}", energy.len(), total);
        return Ok(MetricResult::Scalar(Some(round2(total))));
    }

    let timestamps = timestamp_column(frame)?;
    let buckets = bucket_sums(&timestamps, [&energy], aggregation)?;
    Ok(MetricResult::Series(
        buckets
            .into_iter()
            .map(|(bucket_start, [e])| BucketValue {
                bucket_start,
                value: Some(round2(e)),
            })
            .collect(),
    ))
}

/// Specific yield in kWh/kWp: the rounded energy result divided by capacity,
/// rounded again.
pub fn calculate_specific_yield(
    frame: &DataFrame,
    rated_capacity_kwp: f64,
    aggregation: AggregationLevel,
) -> Result<MetricResult> {
    validate_capacity(rated_capacity_kwp)?;
    let energy = calculate_total_energy(frame, aggregation)?;
    Ok(energy.map_values(|e| round2(e / rated_capacity_kwp)))
}

/// Temperature-corrected performance ratio in percent.
///
/// Per row the expected energy is
/// `rated_capacity_kwp * (Pyranometer_1 / 1000) * (1 + gamma * (Temperature_Probe_1 - 25))`;
/// the ratio is `sum(Energy_kWh) / sum(expected) * 100` per bucket. A bucket whose
/// expected sum is not positive yields `None` without affecting the others.
///
/// Requires `Energy_kWh`, `Pyranometer_1`, `Temperature_Probe_1`, plus
/// `timestamp` when bucketed.
pub fn calculate_temperature_corrected_pr(
    frame: &DataFrame,
    rated_capacity_kwp: f64,
    gamma: f64,
    aggregation: AggregationLevel,
) -> Result<MetricResult> {
    validate_capacity(rated_capacity_kwp)?;
    if !gamma.is_finite() {
        return Err(PvError::InvalidParameter(format!(
            "gamma must be finite, got {}",
            gamma
        )));
    }
    require_columns(
        frame,
        &[ENERGY_KWH, PYRANOMETER_1, TEMPERATURE_PROBE_1],
        aggregation,
    )?;

    let energy = float_column(frame, ENERGY_KWH)?;
    let irradiance = float_column(frame, PYRANOMETER_1)?;
    let cell_temp = float_column(frame, TEMPERATURE_PROBE_1)?;

    let denominators: Vec<f64> = irradiance
        .iter()
        .zip(&cell_temp)
        .map(|(g, t)| {
            let correction = 1.0 + gamma * (t - STC_CELL_TEMPERATURE_C);
            rated_capacity_kwp * (g / STC_IRRADIANCE_W_M2) * correction
        })
        .collect();

    if !aggregation.is_bucketed() {
        let total_energy: f64 = energy.iter().sum();
        let total_expected: f64 = denominators.iter().sum();
        debug!(
            "PR over {} rows: energy={} expected={}",
            energy.len(),
            total_energy,
            total_expected
        );
        return Ok(MetricResult::Scalar(ratio_percent(total_energy, total_expected)));
    }

    let timestamps = timestamp_column(frame)?;
    let buckets = bucket_sums(&timestamps, [&energy, &denominators], aggregation)?;
    Ok(MetricResult::Series(
        buckets
            .into_iter()
            .map(|(bucket_start, [e, d])| BucketValue {
                bucket_start,
                value: ratio_percent(e, d),
            })
            .collect(),
    ))
}

/// Dispatch by metric kind.
pub fn compute_metric(
    kind: MetricKind,
    frame: &DataFrame,
    params: &PvParameters,
    aggregation: AggregationLevel,
) -> Result<MetricResult> {
    match kind {
        MetricKind::TotalEnergy => calculate_total_energy(frame, aggregation),
        MetricKind::SpecificYield => {
            calculate_specific_yield(frame, params.rated_capacity_kwp, aggregation)
        }
        MetricKind::PerformanceRatio => calculate_temperature_corrected_pr(
            frame,
            params.rated_capacity_kwp,
            params.gamma,
            aggregation,
        ),
    }
}

fn ratio_percent(energy: f64, expected: f64) -> Option<f64> {
    if expected > 0.0 {
        Some(round2(energy / expected * 100.0))
    } else {
        None
    }
}

fn validate_capacity(rated_capacity_kwp: f64) -> Result<()> {
    if rated_capacity_kwp.is_finite() && rated_capacity_kwp > 0.0 {
        Ok(())
    } else {
        Err(PvError::InvalidParameter(format!(
            "rated capacity must be a positive number of kWp, got {}",
            rated_capacity_kwp
        )))
    }
}

/// Check every column up front so a missing one fails before any arithmetic.
fn require_columns(
    frame: &DataFrame,
    columns: &[&str],
    aggregation: AggregationLevel,
) -> Result<()> {
    let timestamp = aggregation.is_bucketed().then_some(TIMESTAMP);
    for name in columns.iter().copied().chain(timestamp) {
        if frame.column(name).is_err() {
            return Err(PvError::MissingColumn(name.to_string()));
        }
    }
    Ok(())
}

fn float_column(frame: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let series = frame
        .column(name)
        .map_err(|_| PvError::MissingColumn(name.to_string()))?;
    let casted = series
        .cast(&DataType::Float64)
        .map_err(|e| invalid(name, e.to_string()))?;
    let values = casted.f64().map_err(|e| invalid(name, e.to_string()))?;

    values
        .into_iter()
        .enumerate()
        .map(|(row, v)| v.ok_or_else(|| invalid(name, format!("null or non-numeric value at row {}", row))))
        .collect()
}

fn timestamp_column(frame: &DataFrame) -> Result<Vec<NaiveDateTime>> {
    let series = frame
        .column(TIMESTAMP)
        .map_err(|_| PvError::MissingColumn(TIMESTAMP.to_string()))?;

    match series.dtype() {
        DataType::Datetime(unit, _) => {
            let unit = *unit;
            let raw = series.cast(&DataType::Int64)?;
            raw.i64()?
                .into_iter()
                .enumerate()
                .map(|(row, v)| {
                    v.and_then(|v| from_epoch(v, unit))
                        .ok_or_else(|| invalid(TIMESTAMP, format!("null or out-of-range value at row {}", row)))
                })
                .collect()
        }
        DataType::Date => {
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
                .ok_or_else(|| invalid(TIMESTAMP, "epoch out of range".to_string()))?;
            let raw = series.cast(&DataType::Int32)?;
            raw.i32()?
                .into_iter()
                .enumerate()
                .map(|(row, v)| {
                    v.and_then(|days| epoch.checked_add_signed(chrono::Duration::days(days as i64)))
                        .map(|d| d.and_time(NaiveTime::MIN))
                        .ok_or_else(|| invalid(TIMESTAMP, format!("null date at row {}", row)))
                })
                .collect()
        }
        DataType::String => series
            .str()?
            .into_iter()
            .enumerate()
            .map(|(row, v)| {
                v.and_then(parse_timestamp)
                    .ok_or_else(|| invalid(TIMESTAMP, format!("unparseable value at row {}", row)))
            })
            .collect(),
        other => Err(invalid(TIMESTAMP, format!("unsupported type {}", other))),
    }
}

fn from_epoch(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let dt = match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
    };
    dt.map(|d| d.naive_utc())
}

/// Parse the timestamp layouts seen in raw exports and SQL results.
pub(crate) fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 5] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    let raw = raw.trim();
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Sum each value column per calendar bucket. Only buckets that received at
/// least one row appear in the output, ordered by bucket start.
fn bucket_sums<const N: usize>(
    timestamps: &[NaiveDateTime],
    columns: [&[f64]; N],
    aggregation: AggregationLevel,
) -> Result<Vec<(NaiveDateTime, [f64; N])>> {
    let mut buckets: BTreeMap<NaiveDateTime, [f64; N]> = BTreeMap::new();

    for (row, ts) in timestamps.iter().enumerate() {
        let start = aggregation.bucket_start(*ts).ok_or_else(|| {
            PvError::InvalidParameter(format!("aggregation '{}' has no buckets", aggregation))
        })?;
        let sums = buckets.entry(start).or_insert([0.0; N]);
        for (sum, column) in sums.iter_mut().zip(columns.iter()) {
            *sum += column[row];
        }
    }

    debug!("Resampled {} rows into {} {} buckets", timestamps.len(), buckets.len(), aggregation);
    Ok(buckets.into_iter().collect())
}

fn invalid(column: &str, reason: String) -> PvError {
    PvError::InvalidColumn {
        column: column.to_string(),
        reason,
    }
}
