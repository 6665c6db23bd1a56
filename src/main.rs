use pv_analytics::aggregation::AggregationLevel;
use pv_analytics::assistant::SolarAssistant;
use pv_analytics::config::AppConfig;
use pv_analytics::error::PvError;
use pv_analytics::llm::LlmClient;
use pv_analytics::metrics::{compute_metric, MetricKind};
use pv_analytics::prepare::{prepare_table, write_table_csv, CleaningOptions};
use pv_analytics::result::DISPLAY_ROW_LIMIT;
use pv_analytics::safety::{is_select_only, strip_trailing_semicolon};
use pv_analytics::table::SolarTable;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pv-analytics")]
#[command(about = "Natural-language analytics over solar PV monitoring data")]
#[command(version)]
struct Args {
    /// Raw CSV export (or set PV_DATA_PATH)
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question about the data
    Ask {
        /// The question in natural language
        question: String,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,

        /// Write every result row to this CSV file
        #[arg(long)]
        export_csv: Option<PathBuf>,

        /// Write every result row to this file as JSON records
        #[arg(long)]
        export_json: Option<PathBuf>,

        /// OpenAI API key (or set OPENAI_API_KEY env var)
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Check whether a query would pass the read-only gate
    Validate {
        sql: String,
    },
    /// Compute a metric over the cleaned table
    Metric {
        /// total_energy, specific_yield or performance_ratio
        kind: MetricKind,

        /// default, hourly, daily, monthly or yearly
        #[arg(short, long, default_value = "default")]
        aggregation: AggregationLevel,

        /// First day included (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day included (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Clean the raw export and write the table as CSV
    Prepare {
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(data) = args.data {
        config.data_path = data;
    }

    match args.command {
        Commands::Ask { question, json, export_csv, export_json, api_key } => {
            if let Some(key) = api_key {
                config.api_key = key;
            }
            run_ask(config, question, json, export_csv, export_json).await
        }
        Commands::Validate { sql } => run_validate(&sql),
        Commands::Metric { kind, aggregation, from, to } => {
            run_metric(&config, kind, aggregation, from, to)
        }
        Commands::Prepare { output } => {
            let table = load_table(&config)?;
            write_table_csv(&table, &output)?;
            println!("Wrote {} rows to {}", table.row_count(), output.display());
            Ok(())
        }
    }
}

fn load_table(config: &AppConfig) -> Result<SolarTable> {
    let (table, report) = prepare_table(&config.data_path, &CleaningOptions::default())
        .with_context(|| format!("failed to prepare {}", config.data_path.display()))?;
    info!("Cleaning report: {:?}", report);
    Ok(table)
}

async fn run_ask(
    config: AppConfig,
    question: String,
    json: bool,
    export_csv: Option<PathBuf>,
    export_json: Option<PathBuf>,
) -> Result<()> {
    let table = load_table(&config)?;
    let client = LlmClient::new(config.api_key, config.model, config.base_url);
    if client.is_offline() {
        info!("No OPENAI_API_KEY set, running with canned responses");
    }
    let assistant = SolarAssistant::new(client.clone(), client, table, config.params);

    let response = match assistant.answer(&question).await {
        Ok(response) => response,
        Err(PvError::DestructiveIntent) => {
            println!("This assistant is read-only. I can't modify or delete data.");
            return Ok(());
        }
        Err(PvError::RejectedQuery { sql }) => {
            println!("Blocked a non-SELECT or potentially destructive SQL:");
            println!("{}", sql);
            return Ok(());
        }
        Err(e) => {
            error!("Request failed: {}", e);
            return Err(e.into());
        }
    };

    if let Some(path) = export_csv {
        response.result.write_csv(&path)?;
        info!("Exported {} rows to {:?}", response.row_count, path);
    }
    if let Some(path) = export_json {
        response.result.write_json(&path)?;
        info!("Exported {} rows to {:?}", response.row_count, path);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("\n=== Answer ===");
    println!("{}", response.answer);
    println!("\n=== SQL ===");
    println!("{}", response.sql);
    if let Some(metric) = &response.metric {
        println!(
            "\n=== {} ({}, {}) ===",
            metric.metric, metric.aggregation, metric.unit
        );
        println!("{}", serde_json::to_string_pretty(&metric.result)?);
    }
    println!(
        "\n=== Rows (showing {} of {}) ===",
        response.row_count.min(DISPLAY_ROW_LIMIT),
        response.row_count
    );
    println!("{}", response.result.frame.head(Some(DISPLAY_ROW_LIMIT)));
    Ok(())
}

fn run_validate(sql: &str) -> Result<()> {
    let sql = strip_trailing_semicolon(sql);
    if is_select_only(sql) {
        println!("OK: read-only SELECT");
    } else {
        println!("REJECTED: {}", sql);
    }
    Ok(())
}

fn run_metric(
    config: &AppConfig,
    kind: MetricKind,
    aggregation: AggregationLevel,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<()> {
    let table = load_table(config)?;
    let frame = table.slice_between(
        from.and_then(|d| d.and_hms_opt(0, 0, 0)),
        to.and_then(|d| d.succ_opt())
            .and_then(|d| d.and_hms_opt(0, 0, 0)),
    )?;
    let result = compute_metric(kind, &frame, &config.params, aggregation)?;
    println!("{} ({}, {}) over {} rows:", kind, aggregation, kind.unit(), frame.height());
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
