//! Request-scoped SQL store
//!
//! A `StoreHandle` is opened at the start of a request, executes the validated
//! query against the shared read-only table and is closed when dropped, so every
//! exit path of the request releases it. Executing on a closed handle reopens it
//! first instead of failing.

use crate::error::{PvError, Result};
use crate::table::{SolarTable, TABLE_NAME};
use lazy_static::lazy_static;
use polars::prelude::*;
use polars::sql::SQLContext;
use regex::Regex;
use std::time::Instant;
use tracing::{debug, info, warn};

lazy_static! {
    /// Polars SQL table functions that read from the filesystem.
    static ref FILE_TABLE_FUNCTION: Regex =
        Regex::new(r"(?i)\bread_(?:csv|parquet|ipc|json|ndjson)\b").expect("valid table function regex");
}

enum HandleState {
    Open(SQLContext),
    Closed,
}

/// Executes SQL against the cleaned table.
///
/// Only the shared frame is registered, as `solar`. The SQL context also
/// resolves file-reading table functions (`read_csv` and friends), which
/// `is_select_only` does not know about, so `execute` refuses any query that
/// names one before it reaches the context.
pub struct StoreHandle {
    table: SolarTable,
    state: HandleState,
    reopen_count: usize,
}

impl StoreHandle {
    /// Acquire an open handle on `table`.
    pub fn open(table: SolarTable) -> Self {
        let state = HandleState::Open(Self::connect(&table));
        debug!("Opened store handle over {} rows", table.row_count());
        Self {
            table,
            state,
            reopen_count: 0,
        }
    }

    fn connect(table: &SolarTable) -> SQLContext {
        let mut ctx = SQLContext::new();
        ctx.register(TABLE_NAME, table.frame().clone().lazy());
        ctx
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, HandleState::Closed)
    }

    /// Number of times a closed handle was transparently reopened.
    pub fn reopen_count(&self) -> usize {
        self.reopen_count
    }

    pub fn close(&mut self) {
        if let HandleState::Open(_) = self.state {
            self.state = HandleState::Closed;
            debug!("Closed store handle");
        }
    }

    fn ensure_open(&mut self) -> Result<&mut SQLContext> {
        if self.is_closed() {
            warn!("Store handle closed. Reopening before use");
            self.state = HandleState::Open(Self::connect(&self.table));
            self.reopen_count += 1;
        }
        match &mut self.state {
            HandleState::Open(ctx) => Ok(ctx),
            HandleState::Closed => Err(PvError::Store("handle could not be reopened".to_string())),
        }
    }

    /// Run one query and collect the result.
    ///
    /// Failures carry the query text so the caller can show what was attempted.
    pub fn execute(&mut self, sql: &str) -> Result<DataFrame> {
        if FILE_TABLE_FUNCTION.is_match(sql) {
            warn!("Refusing query that reads from the filesystem");
            return Err(PvError::RejectedQuery { sql: sql.to_string() });
        }
        let start = Instant::now();
        let ctx = self.ensure_open()?;
        info!("Executing SQL: {}", sql);

        let frame = ctx
            .execute(sql)
            .and_then(|lf| lf.collect())
            .map_err(|e| PvError::Execution {
                sql: sql.to_string(),
                message: e.to_string(),
            })?;

        info!(
            "Query returned {} rows in {}ms",
            frame.height(),
            start.elapsed().as_millis()
        );
        Ok(frame)
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        self.close();
    }
}
