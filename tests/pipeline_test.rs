use async_trait::async_trait;
use pv_analytics::aggregation::AggregationLevel;
use pv_analytics::assistant::{SolarAssistant, SUMMARY_FAILURE_MESSAGE};
use pv_analytics::error::{PvError, Result};
use pv_analytics::llm::{QueryPlan, QueryProducer, Summarizer};
use pv_analytics::metrics::{compute_metric, MetricKind, MetricResult, PvParameters};
use pv_analytics::prepare::{prepare_table, write_table_csv, CleaningOptions};
use pv_analytics::result::{SummaryPayload, DISPLAY_ROW_LIMIT, SUMMARY_ROW_LIMIT};
use pv_analytics::table::SolarTable;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const RAW_CSV: &str = "\
timestamp,Active_Power,Global_Horizontal_Radiation,Pyranometer_1,Temperature_Probe_1,Temperature_Probe_2,Weather_Temperature_Celsius
2024-05-01 10:00:00,120,500,500,25,25,22
2024-05-01 10:05:00,60,500,500,25,25,22
2024-06-02 09:00:00,24,300,300,25,25,20
2024-06-02 23:00:00,0,0,0,15,15,14
2024-06-02 09:05:00,-1,300,300,25,25,20
";

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("pv-analytics-{}-{}", uuid::Uuid::new_v4(), name))
}

fn options() -> CleaningOptions {
    CleaningOptions {
        lower_percentile: 0.0,
        upper_percentile: 100.0,
        ..Default::default()
    }
}

fn load_fixture() -> SolarTable {
    let path = temp_path("raw.csv");
    std::fs::write(&path, RAW_CSV).unwrap();
    let (table, report) = prepare_table(&path, &options()).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(report.raw_rows, 5);
    assert_eq!(report.kept, 3);
    table
}

fn params() -> PvParameters {
    PvParameters {
        rated_capacity_kwp: 100.0,
        gamma: -0.004,
    }
}

struct ScriptedProducer {
    plan: QueryPlan,
}

impl ScriptedProducer {
    fn new(plan: QueryPlan) -> Self {
        Self { plan }
    }
}

#[async_trait]
impl QueryProducer for ScriptedProducer {
    async fn produce(&self, _question: &str, schema: &str) -> Result<QueryPlan> {
        assert!(schema.contains("Energy_kWh"));
        Ok(self.plan.clone())
    }
}

#[derive(Default)]
struct CapturingSummarizer {
    fail: bool,
    payloads: Mutex<Vec<SummaryPayload>>,
}

#[async_trait]
impl Summarizer for CapturingSummarizer {
    async fn summarize(&self, payload: &SummaryPayload) -> Result<String> {
        self.payloads.lock().unwrap().push(payload.clone());
        if self.fail {
            return Err(PvError::Summarization("timeout".to_string()));
        }
        Ok(format!("Answer over {} rows", payload.row_count))
    }
}

struct Shared(Arc<CapturingSummarizer>);

#[async_trait]
impl Summarizer for Shared {
    async fn summarize(&self, payload: &SummaryPayload) -> Result<String> {
        self.0.summarize(payload).await
    }
}

fn assistant(
    plan: QueryPlan,
    summarizer: CapturingSummarizer,
) -> SolarAssistant<ScriptedProducer, CapturingSummarizer> {
    SolarAssistant::new(ScriptedProducer::new(plan), summarizer, load_fixture(), params())
}

#[test]
fn prepared_table_derives_energy_in_time_order() {
    let table = load_fixture();
    let frame = table.frame();
    let energy: Vec<f64> = frame
        .column("Energy_kWh")
        .unwrap()
        .f64()
        .unwrap()
        .into_no_null_iter()
        .collect();
    assert_eq!(energy.len(), 3);
    assert!((energy[0] - 10.0).abs() < 1e-9);
    assert!((energy[1] - 5.0).abs() < 1e-9);
    assert!((energy[2] - 2.0).abs() < 1e-9);
}

#[test]
fn metrics_over_the_whole_table() {
    let table = load_fixture();
    let frame = table.frame();

    let energy = compute_metric(MetricKind::TotalEnergy, frame, &params(), AggregationLevel::Default).unwrap();
    assert_eq!(energy, MetricResult::Scalar(Some(17.0)));

    let sy = compute_metric(MetricKind::SpecificYield, frame, &params(), AggregationLevel::Default).unwrap();
    assert_eq!(sy, MetricResult::Scalar(Some(0.17)));

    let pr = compute_metric(MetricKind::PerformanceRatio, frame, &params(), AggregationLevel::Default).unwrap();
    assert_eq!(pr, MetricResult::Scalar(Some(13.08)));

    let monthly = compute_metric(MetricKind::PerformanceRatio, frame, &params(), AggregationLevel::Monthly).unwrap();
    let values: Vec<Option<f64>> = monthly.buckets().iter().map(|b| b.value).collect();
    assert_eq!(values, vec![Some(15.0), Some(6.67)]);
}

#[test]
fn slicing_bounds_a_metric() {
    let table = load_fixture();
    let from = chrono::NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0);
    let frame = table.slice_between(from, None).unwrap();
    assert_eq!(frame.height(), 1);
    let energy = compute_metric(MetricKind::TotalEnergy, &frame, &params(), AggregationLevel::Default).unwrap();
    assert_eq!(energy.as_scalar(), Some(2.0));
}

#[test]
fn cleaned_table_round_trips_through_csv_export() {
    let table = load_fixture();
    let path = temp_path("clean.csv");
    write_table_csv(&table, &path).unwrap();
    let written = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).ok();
    let mut lines = written.lines();
    assert!(lines.next().unwrap().starts_with("timestamp,Active_Power"));
    assert_eq!(lines.count(), 3);
}

#[tokio::test]
async fn answers_with_monthly_energy() {
    let plan = QueryPlan {
        sql_query: "SELECT \"timestamp\", Energy_kWh FROM solar ORDER BY \"timestamp\";".to_string(),
        metric: Some(MetricKind::TotalEnergy),
        aggregation: Some("monthly".to_string()),
    };
    let a = assistant(plan, CapturingSummarizer::default());

    let response = a.answer("  How much energy per month?  ").await.unwrap();
    assert_eq!(response.question, "How much energy per month?");
    assert!(!response.sql.ends_with(';'));
    assert_eq!(response.row_count, 3);
    assert_eq!(response.answer, "Answer over 3 rows");
    assert!(response.summary_error.is_none());

    let metric = response.metric.unwrap();
    assert_eq!(metric.unit, "kWh");
    let buckets = metric.result.buckets();
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].bucket_start.to_string(), "2024-05-01 00:00:00");
    assert_eq!(buckets[0].value, Some(15.0));
    assert_eq!(buckets[1].value, Some(2.0));
}

#[tokio::test]
async fn destructive_question_never_reaches_the_producer() {
    let a = assistant(QueryPlan::sql("SELECT 1"), CapturingSummarizer::default());
    let err = a.answer("Please delete all rows from June").await.unwrap_err();
    assert!(matches!(err, PvError::DestructiveIntent));
}

#[tokio::test]
async fn unsafe_query_is_rejected_with_its_text() {
    let a = assistant(
        QueryPlan::sql("SELECT * FROM solar; DROP TABLE solar"),
        CapturingSummarizer::default(),
    );
    match a.answer("show me everything").await.unwrap_err() {
        PvError::RejectedQuery { sql } => assert_eq!(sql, "SELECT * FROM solar; DROP TABLE solar"),
        other => panic!("expected RejectedQuery, got {:?}", other),
    }
}

#[tokio::test]
async fn file_reads_are_refused_by_the_store() {
    let secret = temp_path("secret.csv");
    std::fs::write(&secret, "API_KEY\nsk-123\n").unwrap();
    let sql = format!("SELECT * FROM read_csv('{}')", secret.display());
    let summarizer = Arc::new(CapturingSummarizer::default());
    let a = SolarAssistant::new(
        ScriptedProducer::new(QueryPlan::sql(sql.clone())),
        Shared(summarizer.clone()),
        load_fixture(),
        params(),
    );

    let err = a.answer("what is in the secret file?").await.unwrap_err();
    std::fs::remove_file(&secret).ok();
    match err {
        PvError::RejectedQuery { sql: rejected } => assert_eq!(rejected, sql),
        other => panic!("expected RejectedQuery, got {:?}", other),
    }
    assert!(summarizer.payloads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn execution_failure_carries_the_query() {
    let a = assistant(
        QueryPlan::sql("SELECT Hail FROM solar"),
        CapturingSummarizer::default(),
    );
    match a.answer("how much hail?").await.unwrap_err() {
        PvError::Execution { sql, .. } => assert_eq!(sql, "SELECT Hail FROM solar"),
        other => panic!("expected Execution, got {:?}", other),
    }
}

#[tokio::test]
async fn metric_on_result_without_required_columns_fails() {
    let plan = QueryPlan {
        sql_query: "SELECT MAX(Active_Power) AS peak FROM solar".to_string(),
        metric: Some(MetricKind::PerformanceRatio),
        aggregation: None,
    };
    let a = assistant(plan, CapturingSummarizer::default());
    let err = a.answer("what is the PR?").await.unwrap_err();
    assert!(matches!(err, PvError::MissingColumn(_)));
}

#[tokio::test]
async fn summarizer_failure_still_returns_rows() {
    let summarizer = CapturingSummarizer {
        fail: true,
        ..Default::default()
    };
    let a = assistant(QueryPlan::sql("SELECT * FROM solar"), summarizer);
    let response = a.answer("show rows").await.unwrap();
    assert_eq!(response.answer, SUMMARY_FAILURE_MESSAGE);
    assert!(response.summary_error.unwrap().contains("timeout"));
    assert_eq!(response.row_count, 3);
    assert!(response.display_rows.len() <= DISPLAY_ROW_LIMIT);
}

#[tokio::test]
async fn requests_are_independent() {
    let summarizer = CapturingSummarizer::default();
    let a = assistant(QueryPlan::sql("SELECT COUNT(*) AS n FROM solar"), summarizer);

    let first = a.answer("count rows").await.unwrap();
    let second = a.answer("count rows").await.unwrap();
    assert_ne!(first.request_id, second.request_id);
    assert_eq!(first.display_rows, second.display_rows);
}

#[tokio::test]
async fn summary_payload_stays_bounded() {
    let mut body = String::from(
        "timestamp,Active_Power,Global_Horizontal_Radiation,Pyranometer_1,Temperature_Probe_1,Temperature_Probe_2,Weather_Temperature_Celsius\n",
    );
    for day in 1..=3 {
        for slot in 0..100 {
            body.push_str(&format!(
                "2024-07-{:02} {:02}:{:02}:00,50,400,400,30,30,21\n",
                day,
                8 + slot / 12,
                (slot % 12) * 5
            ));
        }
    }
    let path = temp_path("big.csv");
    std::fs::write(&path, body).unwrap();
    let (table, _) = prepare_table(&path, &options()).unwrap();
    std::fs::remove_file(&path).ok();

    let producer = ScriptedProducer::new(QueryPlan::sql("SELECT * FROM solar"));
    let summarizer = Arc::new(CapturingSummarizer::default());
    let a = SolarAssistant::new(producer, Shared(summarizer.clone()), table, params());
    let response = a.answer("list everything").await.unwrap();
    assert_eq!(response.row_count, 300);
    assert_eq!(response.display_rows.len(), DISPLAY_ROW_LIMIT);
    assert_eq!(response.answer, "Answer over 300 rows");

    let payloads = summarizer.payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].rows.len(), SUMMARY_ROW_LIMIT);
    assert_eq!(payloads[0].row_count, 300);
    assert!(payloads[0].truncated);
}
