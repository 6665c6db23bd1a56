//! Solar Assistant - one question in, one answer out
//!
//! question → intent pre-filter → query producer → safety gate → store →
//! metrics (optional) → summarizer
//!
//! Each call to `answer` is an independent request: it opens its own store
//! handle over the shared table and releases it on every exit path.

use crate::error::{PvError, Result};
use crate::llm::{QueryProducer, Summarizer};
use crate::metrics::{compute_metric, PvParameters};
use crate::result::{JsonRow, MetricReport, QueryResult};
use crate::safety::{is_destructive_intent, is_select_only, strip_trailing_semicolon};
use crate::store::StoreHandle;
use crate::table::SolarTable;
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Shown in place of an answer when the summarizer fails.
pub const SUMMARY_FAILURE_MESSAGE: &str = "Could not summarize the result.";

/// Everything a front end needs to render one answered question.
#[derive(Debug, Clone, Serialize)]
pub struct AssistantResponse {
    pub request_id: String,
    pub question: String,
    pub sql: String,
    pub answer: String,
    /// Set when `answer` is the generic failure message.
    pub summary_error: Option<String>,
    pub row_count: usize,
    pub columns: Vec<String>,
    /// At most `DISPLAY_ROW_LIMIT` rows.
    pub display_rows: Vec<JsonRow>,
    pub metric: Option<MetricReport>,
    #[serde(skip)]
    pub result: QueryResult,
}

pub struct SolarAssistant<P, S> {
    producer: P,
    summarizer: S,
    table: SolarTable,
    params: PvParameters,
}

impl<P: QueryProducer, S: Summarizer> SolarAssistant<P, S> {
    pub fn new(producer: P, summarizer: S, table: SolarTable, params: PvParameters) -> Self {
        Self {
            producer,
            summarizer,
            table,
            params,
        }
    }

    pub fn table(&self) -> &SolarTable {
        &self.table
    }

    /// Answer one question.
    ///
    /// Errors are the refusals and failures a caller must surface:
    /// `EmptyQuestion`, `DestructiveIntent`, `RejectedQuery` (with the blocked
    /// text), `Execution` (with the query), `InvalidAggregation` and metric
    /// column errors. A summarizer failure is not an error.
    pub async fn answer(&self, question: &str) -> Result<AssistantResponse> {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("request", id = %request_id);
        self.answer_inner(question.trim(), request_id)
            .instrument(span)
            .await
    }

    async fn answer_inner(&self, question: &str, request_id: String) -> Result<AssistantResponse> {
        if question.is_empty() {
            return Err(PvError::EmptyQuestion);
        }
        info!("Question: {}", question);

        if is_destructive_intent(question) {
            warn!("Refusing destructive request before query generation");
            return Err(PvError::DestructiveIntent);
        }

        let mut handle = StoreHandle::open(self.table.clone());

        let plan = self
            .producer
            .produce(question, &self.table.schema_description())
            .await?;
        let sql = strip_trailing_semicolon(&plan.sql_query).to_string();
        info!("Generated SQL: {}", sql);

        if !is_select_only(&sql) {
            warn!("Blocked a non-SELECT or potentially destructive SQL");
            return Err(PvError::RejectedQuery {
                sql: plan.sql_query,
            });
        }

        let aggregation = plan.aggregation_level()?;
        let frame = handle.execute(&sql)?;
        handle.close();
        let result = QueryResult::new(sql, frame);

        let metric = match plan.metric {
            Some(kind) => {
                let value = compute_metric(kind, &result.frame, &self.params, aggregation)?;
                info!("Computed {} ({})", kind, aggregation);
                Some(MetricReport {
                    metric: kind,
                    aggregation,
                    unit: kind.unit().to_string(),
                    result: value,
                })
            }
            None => None,
        };

        let payload = result.summary_payload(question, metric.clone())?;
        let (answer, summary_error) = match self.summarizer.summarize(&payload).await {
            Ok(answer) => (answer, None),
            Err(e) => {
                warn!("Summarization failed: {}", e);
                (SUMMARY_FAILURE_MESSAGE.to_string(), Some(e.to_string()))
            }
        };

        Ok(AssistantResponse {
            request_id,
            question: question.to_string(),
            sql: result.sql.clone(),
            answer,
            summary_error,
            row_count: result.row_count(),
            columns: result.columns(),
            display_rows: result.display_rows()?,
            metric,
            result,
        })
    }
}
