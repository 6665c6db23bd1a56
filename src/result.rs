//! Query results and what is handed downstream
//!
//! Two independent caps apply to a result:
//! - at most `SUMMARY_ROW_LIMIT` rows are ever serialized for the summarizer
//! - at most `DISPLAY_ROW_LIMIT` rows are shown to a person

use crate::aggregation::AggregationLevel;
use crate::error::Result;
use crate::metrics::{MetricKind, MetricResult};
use chrono::{DateTime, NaiveDate};
use itertools::Itertools;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Rows shown to a person.
pub const DISPLAY_ROW_LIMIT: usize = 50;

/// Rows serialized into the summarizer prompt.
pub const SUMMARY_ROW_LIMIT: usize = 200;

pub type JsonRow = Map<String, Value>;

/// A metric computed over a query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub metric: MetricKind,
    pub aggregation: AggregationLevel,
    pub unit: String,
    pub result: MetricResult,
}

/// Rows returned by one executed query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub sql: String,
    pub frame: DataFrame,
}

impl QueryResult {
    pub fn new(sql: impl Into<String>, frame: DataFrame) -> Self {
        Self {
            sql: sql.into(),
            frame,
        }
    }

    pub fn row_count(&self) -> usize {
        self.frame.height()
    }

    pub fn columns(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// First `DISPLAY_ROW_LIMIT` rows.
    pub fn display_rows(&self) -> Result<Vec<JsonRow>> {
        dataframe_to_rows(&self.frame, DISPLAY_ROW_LIMIT)
    }

    /// Every row as JSON records, for export.
    pub fn all_rows(&self) -> Result<Vec<JsonRow>> {
        dataframe_to_rows(&self.frame, self.frame.height())
    }

    /// Bounded description of the result for the summarizer.
    pub fn summary_payload(
        &self,
        question: &str,
        metric: Option<MetricReport>,
    ) -> Result<SummaryPayload> {
        let rows = dataframe_to_rows(&self.frame, SUMMARY_ROW_LIMIT)?;
        Ok(SummaryPayload {
            question: question.to_string(),
            row_count: self.row_count(),
            columns: self.columns(),
            truncated: self.row_count() > rows.len(),
            rows,
            metric,
        })
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        let mut frame = self.frame.clone();
        CsvWriter::new(&mut file).include_header(true).finish(&mut frame)?;
        Ok(())
    }

    /// Every row as a JSON array of records.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &self.all_rows()?)?;
        writer.flush()?;
        Ok(())
    }
}

/// What the summarizer gets to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub question: String,
    /// Total rows in the result, which may exceed `rows.len()`.
    pub row_count: usize,
    pub columns: Vec<String>,
    /// At most `SUMMARY_ROW_LIMIT` rows, in result order.
    pub rows: Vec<JsonRow>,
    pub truncated: bool,
    pub metric: Option<MetricReport>,
}

impl SummaryPayload {
    pub fn to_prompt(&self) -> Result<String> {
        let mut prompt = format!(
            "QUESTION:\n{}\n\nROW_COUNT: {}\nCOLUMNS: [{}]\n",
            self.question,
            self.row_count,
            self.columns.iter().map(|c| format!("'{}'", c)).join(", ")
        );
        if self.truncated {
            prompt.push_str(&format!("ROWS_SHOWN: first {} rows\n", self.rows.len()));
        }
        prompt.push_str("SQL RESULT ROWS (JSON array of objects):\n");
        prompt.push_str(&serde_json::to_string(&self.rows)?);
        if let Some(metric) = &self.metric {
            prompt.push_str(&format!(
                "\n\nCOMPUTED METRIC ({}, {}, unit {}):\n{}",
                metric.metric,
                metric.aggregation,
                metric.unit,
                serde_json::to_string(&metric.result)?
            ));
        }
        Ok(prompt)
    }
}

/// First `max_rows` rows as JSON objects keyed by column name.
pub fn dataframe_to_rows(df: &DataFrame, max_rows: usize) -> Result<Vec<JsonRow>> {
    let limited = df.head(Some(max_rows));
    let columns = limited.get_columns();

    let mut rows = Vec::with_capacity(limited.height());
    for row_idx in 0..limited.height() {
        let mut row = Map::new();
        for series in columns {
            let value = any_value_to_json(series.get(row_idx)?);
            row.insert(series.name().to_string(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

fn any_value_to_json(value: AnyValue) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int8(v) => Value::from(v),
        AnyValue::Int16(v) => Value::from(v),
        AnyValue::Int32(v) => Value::from(v),
        AnyValue::Int64(v) => Value::from(v),
        AnyValue::UInt8(v) => Value::from(v),
        AnyValue::UInt16(v) => Value::from(v),
        AnyValue::UInt32(v) => Value::from(v),
        AnyValue::UInt64(v) => Value::from(v),
        AnyValue::Float32(v) => float_to_json(v as f64),
        AnyValue::Float64(v) => float_to_json(v),
        AnyValue::Date(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(days as i64)))
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        AnyValue::Datetime(v, unit, _) => {
            let dt = match unit {
                TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(v)),
                TimeUnit::Microseconds => DateTime::from_timestamp_micros(v),
                TimeUnit::Milliseconds => DateTime::from_timestamp_millis(v),
            };
            dt.map(|d| Value::String(d.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string()))
                .unwrap_or(Value::Null)
        }
        other => Value::String(other.to_string()),
    }
}

/// NaN and infinities have no JSON form.
fn float_to_json(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}
