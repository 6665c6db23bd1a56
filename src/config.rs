//! Runtime configuration from the environment (and `.env`).

use crate::error::{PvError, Result};
use crate::llm::DUMMY_API_KEY;
use crate::metrics::{PvParameters, DEFAULT_GAMMA, DEFAULT_RATED_CAPACITY_KWP};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_MODEL: &str = "gpt-5-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_DATA_PATH: &str = "5-Site_DG-PV1-DB-DG-M1A.csv";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub data_path: PathBuf,
    pub params: PvParameters,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: DUMMY_API_KEY.to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            params: PvParameters::default(),
        }
    }
}

impl AppConfig {
    /// Read `OPENAI_API_KEY`, `OPENAI_MODEL`, `OPENAI_BASE_URL`, `PV_DATA_PATH`,
    /// `PV_RATED_CAPACITY_KWP` and `PV_GAMMA`, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            api_key: lookup("OPENAI_API_KEY").unwrap_or(defaults.api_key),
            model: lookup("OPENAI_MODEL").unwrap_or(defaults.model),
            base_url: lookup("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            data_path: lookup("PV_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_path),
            params: PvParameters {
                rated_capacity_kwp: parse_var(&lookup, "PV_RATED_CAPACITY_KWP")?
                    .unwrap_or(DEFAULT_RATED_CAPACITY_KWP),
                gamma: parse_var(&lookup, "PV_GAMMA")?.unwrap_or(DEFAULT_GAMMA),
            },
        })
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PvError::Config(format!("{} is not a valid number: '{}'", key, raw))),
    }
}
