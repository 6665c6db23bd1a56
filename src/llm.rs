use crate::aggregation::AggregationLevel;
use crate::error::{PvError, Result};
use crate::metrics::MetricKind;
use crate::prompts::{sql_system_prompt, ANSWER_SYSTEM_PROMPT};
use crate::result::SummaryPayload;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Offline key: canned responses instead of HTTP calls.
pub const DUMMY_API_KEY: &str = "dummy-api-key";

/// What the query producer proposes for a question. Nothing in it is trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub sql_query: String,
    #[serde(default)]
    pub metric: Option<MetricKind>,
    #[serde(default)]
    pub aggregation: Option<String>,
}

impl QueryPlan {
    pub fn sql(sql_query: impl Into<String>) -> Self {
        Self {
            sql_query: sql_query.into(),
            metric: None,
            aggregation: None,
        }
    }

    /// Absent means `default`; anything unrecognised is an error.
    pub fn aggregation_level(&self) -> Result<AggregationLevel> {
        match self.aggregation.as_deref() {
            None => Ok(AggregationLevel::Default),
            Some(raw) => raw.parse(),
        }
    }
}

/// Turns a question into a candidate query.
#[async_trait]
pub trait QueryProducer: Send + Sync {
    async fn produce(&self, question: &str, schema: &str) -> Result<QueryPlan>;
}

/// Turns a bounded result description into prose.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, payload: &SummaryPayload) -> Result<String>;
}

#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
            http: reqwest::Client::new(),
        }
    }

    pub fn is_offline(&self) -> bool {
        self.api_key == DUMMY_API_KEY
    }

    /// One chat completion; returns the assistant message content.
    pub async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
        });

        // Reasoning models spend part of the budget before answering and only
        // accept the default temperature.
        if self.model.starts_with("gpt-5") || self.model.contains("o1") {
            body["max_completion_tokens"] = serde_json::json!(4000);
        } else {
            body["temperature"] = serde_json::json!(0.1);
            body["max_tokens"] = serde_json::json!(1000);
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| PvError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PvError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PvError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(error) = response_json.get("error") {
            return Err(PvError::Llm(format!("LLM API error: {}", error)));
        }

        let choice = response_json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| PvError::Llm(format!("No choices in LLM response: {}", response_json)))?;

        match choice.get("finish_reason").and_then(|r| r.as_str()) {
            Some("length") => warn!("LLM response was truncated due to length limit"),
            Some("content_filter") => {
                return Err(PvError::Llm("LLM response was filtered by content policy".to_string()))
            }
            _ => {}
        }

        let content = choice["message"]["content"].as_str().unwrap_or_default();
        if content.trim().is_empty() {
            return Err(PvError::Llm("Empty content in LLM response".to_string()));
        }
        Ok(content.to_string())
    }
}

#[async_trait]
impl QueryProducer for LlmClient {
    async fn produce(&self, question: &str, schema: &str) -> Result<QueryPlan> {
        if self.is_offline() {
            debug!("Offline mode: returning canned query plan");
            return Ok(QueryPlan {
                sql_query: "SELECT \"timestamp\", Energy_kWh, Pyranometer_1, Temperature_Probe_1 FROM solar".to_string(),
                metric: Some(MetricKind::TotalEnergy),
                aggregation: Some("monthly".to_string()),
            });
        }
        let response = self.chat(&sql_system_prompt(schema), question).await?;
        parse_query_plan(&response)
    }
}

#[async_trait]
impl Summarizer for LlmClient {
    async fn summarize(&self, payload: &SummaryPayload) -> Result<String> {
        if self.is_offline() {
            return Ok(format!(
                "Offline mode: the query returned {} rows over columns {}.",
                payload.row_count,
                payload.columns.join(", ")
            ));
        }
        let response = self.chat(ANSWER_SYSTEM_PROMPT, &payload.to_prompt()?).await?;
        parse_answer(&response)
    }
}

fn strip_code_fences(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```sql")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Read the producer's JSON plan. Bare text is taken as the query itself; the
/// safety gate decides what happens to it either way.
pub fn parse_query_plan(response: &str) -> Result<QueryPlan> {
    let cleaned = strip_code_fences(response);
    if cleaned.starts_with('{') {
        return serde_json::from_str(cleaned).map_err(|e| {
            PvError::Llm(format!("Failed to parse query plan: {}. Response: {}", e, cleaned))
        });
    }
    if cleaned.is_empty() {
        return Err(PvError::Llm("Query producer returned nothing".to_string()));
    }
    Ok(QueryPlan::sql(cleaned))
}

/// Read the summarizer's answer: `{"final_answer": "..."}` or plain prose.
pub fn parse_answer(response: &str) -> Result<String> {
    let cleaned = strip_code_fences(response);
    if cleaned.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(cleaned)
            .map_err(|e| PvError::Summarization(format!("malformed JSON: {}", e)))?;
        return value
            .get("final_answer")
            .and_then(|a| a.as_str())
            .filter(|a| !a.trim().is_empty())
            .map(|a| a.to_string())
            .ok_or_else(|| PvError::Summarization("missing final_answer".to_string()));
    }
    if cleaned.is_empty() {
        return Err(PvError::Summarization("empty answer".to_string()));
    }
    Ok(cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plan_with_fences() {
        let response = "```json\n{\"sql_query\": \"SELECT 1\", \"metric\": \"specific_yield\", \"aggregation\": \"daily\"}\n```";
        let plan = parse_query_plan(response).unwrap();
        assert_eq!(plan.sql_query, "SELECT 1");
        assert_eq!(plan.metric, Some(MetricKind::SpecificYield));
        assert_eq!(plan.aggregation_level().unwrap(), AggregationLevel::Daily);
    }

    #[test]
    fn plan_without_metric_defaults() {
        let plan = parse_query_plan("{\"sql_query\": \"SELECT MAX(Active_Power) FROM solar\"}").unwrap();
        assert_eq!(plan.metric, None);
        assert_eq!(plan.aggregation_level().unwrap(), AggregationLevel::Default);
    }

    #[test]
    fn unknown_aggregation_is_rejected() {
        let plan = parse_query_plan("{\"sql_query\": \"SELECT 1\", \"aggregation\": \"weekly\"}").unwrap();
        assert!(matches!(plan.aggregation_level(), Err(PvError::InvalidAggregation(_))));
    }

    #[test]
    fn bare_sql_is_taken_verbatim() {
        let plan = parse_query_plan("```sql\nDROP TABLE solar\n```").unwrap();
        assert_eq!(plan.sql_query, "DROP TABLE solar");
    }

    #[test]
    fn malformed_plan_is_an_error() {
        assert!(matches!(parse_query_plan("{\"query\": 1}"), Err(PvError::Llm(_))));
        assert!(matches!(parse_query_plan("   "), Err(PvError::Llm(_))));
    }

    #[test]
    fn parses_answers() {
        assert_eq!(parse_answer("{\"final_answer\": \"42 kWh\"}").unwrap(), "42 kWh");
        assert_eq!(parse_answer("Peak power was 900 kW.").unwrap(), "Peak power was 900 kW.");
        assert!(matches!(parse_answer("{\"answer\": 1}"), Err(PvError::Summarization(_))));
        assert!(matches!(parse_answer(""), Err(PvError::Summarization(_))));
    }

    #[tokio::test]
    async fn offline_client_needs_no_network() {
        let client = LlmClient::new(
            DUMMY_API_KEY.to_string(),
            "gpt-5-mini".to_string(),
            "http://localhost:0".to_string(),
        );
        let plan = client.produce("monthly energy?", "timestamp").await.unwrap();
        assert!(crate::safety::is_select_only(&plan.sql_query));
    }
}
