//! Cleaned solar time-series table
//!
//! `SolarTable` is built once per session from cleaned records and never
//! mutated afterwards. Cloning it only bumps a reference count, so every
//! request can hold its own handle on the same frame.

use crate::error::Result;
use chrono::NaiveDateTime;
use itertools::Itertools;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// SQL table name the frame is registered under.
pub const TABLE_NAME: &str = "solar";

pub const TIMESTAMP: &str = "timestamp";
pub const ACTIVE_POWER: &str = "Active_Power";
pub const GLOBAL_HORIZONTAL_RADIATION: &str = "Global_Horizontal_Radiation";
pub const PYRANOMETER_1: &str = "Pyranometer_1";
pub const TEMPERATURE_PROBE_1: &str = "Temperature_Probe_1";
pub const TEMPERATURE_PROBE_2: &str = "Temperature_Probe_2";
pub const WEATHER_TEMPERATURE: &str = "Weather_Temperature_Celsius";
pub const ENERGY_KWH: &str = "Energy_kWh";

/// Sampling interval of the dataset, in hours (5 minutes).
pub const INTERVAL_HOURS: f64 = 5.0 / 60.0;

/// One cleaned 5-minute sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRecord {
    pub timestamp: NaiveDateTime,
    pub active_power: f64,
    pub global_horizontal_radiation: f64,
    pub pyranometer_1: f64,
    pub temperature_probe_1: f64,
    pub temperature_probe_2: f64,
    pub weather_temperature_celsius: f64,
    pub energy_kwh: f64,
}

impl TimeSeriesRecord {
    /// Build a record, deriving `energy_kwh` from active power.
    pub fn new(
        timestamp: NaiveDateTime,
        active_power: f64,
        global_horizontal_radiation: f64,
        pyranometer_1: f64,
        temperature_probe_1: f64,
        temperature_probe_2: f64,
        weather_temperature_celsius: f64,
    ) -> Self {
        Self {
            timestamp,
            active_power,
            global_horizontal_radiation,
            pyranometer_1,
            temperature_probe_1,
            temperature_probe_2,
            weather_temperature_celsius,
            energy_kwh: active_power * INTERVAL_HOURS,
        }
    }
}

/// Immutable, timestamp-ordered table shared by every request of a session.
#[derive(Debug, Clone)]
pub struct SolarTable {
    frame: Arc<DataFrame>,
}

impl SolarTable {
    /// Build the table from cleaned records.
    pub fn from_records(records: &[TimeSeriesRecord]) -> Result<Self> {
        let timestamps: Vec<NaiveDateTime> = records.iter().map(|r| r.timestamp).collect();
        let column = |name: &str, f: fn(&TimeSeriesRecord) -> f64| {
            Series::new(name, records.iter().map(f).collect::<Vec<f64>>())
        };

        let frame = DataFrame::new(vec![
            Series::new(TIMESTAMP, timestamps),
            column(ACTIVE_POWER, |r| r.active_power),
            column(GLOBAL_HORIZONTAL_RADIATION, |r| r.global_horizontal_radiation),
            column(PYRANOMETER_1, |r| r.pyranometer_1),
            column(TEMPERATURE_PROBE_1, |r| r.temperature_probe_1),
            column(TEMPERATURE_PROBE_2, |r| r.temperature_probe_2),
            column(WEATHER_TEMPERATURE, |r| r.weather_temperature_celsius),
            column(ENERGY_KWH, |r| r.energy_kwh),
        ])?;

        Ok(Self {
            frame: Arc::new(frame),
        })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn row_count(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Rows with `from <= timestamp < to`; either bound may be open.
    pub fn slice_between(
        &self,
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    ) -> Result<DataFrame> {
        let mut lf = self.frame.as_ref().clone().lazy();
        if let Some(from) = from {
            lf = lf.filter(col(TIMESTAMP).gt_eq(lit(from)));
        }
        if let Some(to) = to {
            lf = lf.filter(col(TIMESTAMP).lt(lit(to)));
        }
        Ok(lf.collect()?)
    }

    /// `name (dtype)` per column, for prompts and CLI output.
    pub fn schema_description(&self) -> String {
        self.frame
            .get_columns()
            .iter()
            .map(|s| format!("{} ({})", s.name(), s.dtype()))
            .join(", ")
    }
}
