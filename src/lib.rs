pub mod aggregation;
pub mod assistant;
pub mod config;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod prepare;
pub mod prompts;
pub mod result;
pub mod safety;
pub mod store;
pub mod table;

pub use aggregation::AggregationLevel;
pub use assistant::{AssistantResponse, SolarAssistant};
pub use config::AppConfig;
pub use error::{PvError, Result};
pub use llm::{LlmClient, QueryPlan, QueryProducer, Summarizer};
pub use metrics::{compute_metric, MetricKind, MetricResult, PvParameters};
pub use table::{SolarTable, TimeSeriesRecord};
