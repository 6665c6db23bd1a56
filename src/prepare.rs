//! Data Preparation
//!
//! Turns the raw inverter/weather export into the cleaned `SolarTable`:
//! 1. drop rows with missing or unparseable fields
//! 2. drop negative active power
//! 3. drop nighttime samples (irradiance below threshold on either sensor)
//! 4. keep the first row per timestamp
//! 5. drop weather-temperature outliers outside the 1st..99th percentile
//! 6. clamp temperatures to physical ranges
//! 7. keep rows inside the study window
//! 8. derive `Energy_kWh` and order by time

use crate::error::{PvError, Result};
use crate::metrics::parse_timestamp;
use crate::table::{SolarTable, TimeSeriesRecord};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Raw CSV row; unknown columns in the export are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRow {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(rename = "Active_Power", default, deserialize_with = "csv::invalid_option")]
    pub active_power: Option<f64>,
    #[serde(rename = "Global_Horizontal_Radiation", default, deserialize_with = "csv::invalid_option")]
    pub global_horizontal_radiation: Option<f64>,
    #[serde(rename = "Pyranometer_1", default, deserialize_with = "csv::invalid_option")]
    pub pyranometer_1: Option<f64>,
    #[serde(rename = "Temperature_Probe_1", default, deserialize_with = "csv::invalid_option")]
    pub temperature_probe_1: Option<f64>,
    #[serde(rename = "Temperature_Probe_2", default, deserialize_with = "csv::invalid_option")]
    pub temperature_probe_2: Option<f64>,
    #[serde(rename = "Weather_Temperature_Celsius", default, deserialize_with = "csv::invalid_option")]
    pub weather_temperature_celsius: Option<f64>,
}

/// Thresholds used by the cleaning pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningOptions {
    /// Minimum irradiance (W/m²) for a sample to count as daytime.
    pub min_irradiance: f64,
    pub lower_percentile: f64,
    pub upper_percentile: f64,
    pub probe_range: (f64, f64),
    pub weather_range: (f64, f64),
    /// Inclusive first day.
    pub start_date: NaiveDate,
    /// Inclusive last day.
    pub end_date: NaiveDate,
}

impl Default for CleaningOptions {
    fn default() -> Self {
        Self {
            min_irradiance: 10.0,
            lower_percentile: 1.0,
            upper_percentile: 99.0,
            probe_range: (0.0, 120.0),
            weather_range: (-5.0, 45.0),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2025, 8, 31).unwrap_or_default(),
        }
    }
}

/// How many rows each step removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub raw_rows: usize,
    pub incomplete: usize,
    pub negative_power: usize,
    pub nighttime: usize,
    pub duplicate_timestamps: usize,
    pub temperature_outliers: usize,
    pub out_of_range_temperature: usize,
    pub outside_window: usize,
    pub kept: usize,
}

struct Sample {
    timestamp: chrono::NaiveDateTime,
    active_power: f64,
    ghr: f64,
    pyranometer_1: f64,
    probe_1: f64,
    probe_2: f64,
    weather: f64,
}

/// Load and clean a CSV export into a table.
pub fn prepare_table(path: &Path, options: &CleaningOptions) -> Result<(SolarTable, CleaningReport)> {
    info!("Loading raw PV data from {:?}", path);
    let file = File::open(path)
        .map_err(|e| PvError::Ingestion(format!("cannot open {}: {}", path.display(), e)))?;
    let raw = read_raw_rows(file)?;
    let (records, report) = clean_rows(raw, options);
    info!(
        "Cleaned {} raw rows down to {} ({} night, {} duplicates, {} outliers)",
        report.raw_rows, report.kept, report.nighttime, report.duplicate_timestamps, report.temperature_outliers
    );
    let table = SolarTable::from_records(&records)?;
    if table.is_empty() {
        warn!("No rows survived cleaning; every metric will be empty");
    }
    Ok((table, report))
}

pub fn read_raw_rows<R: Read>(reader: R) -> Result<Vec<RawRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    if !headers.iter().any(|h| h == "timestamp") {
        return Err(PvError::Ingestion("CSV has no 'timestamp' column".to_string()));
    }

    let mut rows = Vec::new();
    for row in rdr.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Apply the cleaning steps in order and derive energy.
pub fn clean_rows(raw: Vec<RawRow>, options: &CleaningOptions) -> (Vec<TimeSeriesRecord>, CleaningReport) {
    let mut report = CleaningReport {
        raw_rows: raw.len(),
        ..Default::default()
    };

    let complete: Vec<Sample> = raw
        .into_iter()
        .filter_map(|r| {
            Some(Sample {
                timestamp: r.timestamp.as_deref().and_then(parse_timestamp)?,
                active_power: r.active_power?,
                ghr: r.global_horizontal_radiation?,
                pyranometer_1: r.pyranometer_1?,
                probe_1: r.temperature_probe_1?,
                probe_2: r.temperature_probe_2?,
                weather: r.weather_temperature_celsius?,
            })
        })
        .collect();
    report.incomplete = report.raw_rows - complete.len();

    let mut samples = retain_counted(complete, &mut report.negative_power, |s| s.active_power >= 0.0);
    samples = retain_counted(samples, &mut report.nighttime, |s| {
        s.ghr >= options.min_irradiance && s.pyranometer_1 >= options.min_irradiance
    });

    let mut seen = HashSet::new();
    samples = retain_counted(samples, &mut report.duplicate_timestamps, |s| seen.insert(s.timestamp));

    let mut weather: Vec<f64> = samples.iter().map(|s| s.weather).collect();
    weather.sort_by(|a, b| a.total_cmp(b));
    if let (Some(lo), Some(hi)) = (
        percentile(&weather, options.lower_percentile),
        percentile(&weather, options.upper_percentile),
    ) {
        samples = retain_counted(samples, &mut report.temperature_outliers, |s| {
            s.weather >= lo && s.weather <= hi
        });
    }

    let (p_lo, p_hi) = options.probe_range;
    let (w_lo, w_hi) = options.weather_range;
    samples = retain_counted(samples, &mut report.out_of_range_temperature, |s| {
        (p_lo..=p_hi).contains(&s.probe_1)
            && (p_lo..=p_hi).contains(&s.probe_2)
            && (w_lo..=w_hi).contains(&s.weather)
    });

    samples = retain_counted(samples, &mut report.outside_window, |s| {
        let day = s.timestamp.date();
        day >= options.start_date && day <= options.end_date
    });

    samples.sort_by_key(|s| s.timestamp);
    report.kept = samples.len();

    let records = samples
        .into_iter()
        .map(|s| {
            TimeSeriesRecord::new(
                s.timestamp,
                s.active_power,
                s.ghr,
                s.pyranometer_1,
                s.probe_1,
                s.probe_2,
                s.weather,
            )
        })
        .collect();
    (records, report)
}

/// Write the cleaned table as CSV.
pub fn write_table_csv(table: &SolarTable, path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    let mut frame = table.frame().clone();
    CsvWriter::new(&mut file).include_header(true).finish(&mut frame)?;
    info!("Wrote {} cleaned rows to {:?}", frame.height(), path);
    Ok(())
}

/// Linear-interpolated percentile of an ascending slice (`pct` in 0..=100).
pub fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

fn retain_counted<T>(items: Vec<T>, dropped: &mut usize, mut keep: impl FnMut(&T) -> bool) -> Vec<T> {
    let before = items.len();
    let kept: Vec<T> = items.into_iter().filter(|i| keep(i)).collect();
    *dropped += before - kept.len();
    kept
}
