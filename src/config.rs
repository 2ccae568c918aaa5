//! Runtime configuration
//!
//! Read from the process environment (after `.env` is loaded by the
//! binaries). CLI flags may override individual values for a single run.

use crate::error::PipelineError;
use crate::models::RiskTolerance;
use crate::Result;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_SIMILAR_CASES_TOP_K: usize = 5;
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_RETRIEVAL_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_ARTIFACTS_DIR: &str = "./artifacts";
pub const DEFAULT_QDRANT_COLLECTION: &str = "loan_cases";
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_retries: u32,
    pub similar_cases_top_k: usize,
    pub oracle_timeout: Duration,
    pub retrieval_timeout: Duration,
    pub risk_tolerance: RiskTolerance,
    pub artifacts_dir: PathBuf,
    pub gemini_api_key: Option<String>,
    /// Generation model override; the client default applies when unset.
    pub gemini_model: Option<String>,
    pub qdrant_url: Option<String>,
    pub qdrant_api_key: Option<String>,
    pub qdrant_collection: String,
    pub database_url: Option<String>,
    pub port: u16,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            similar_cases_top_k: DEFAULT_SIMILAR_CASES_TOP_K,
            oracle_timeout: Duration::from_secs(DEFAULT_ORACLE_TIMEOUT_SECS),
            retrieval_timeout: Duration::from_secs(DEFAULT_RETRIEVAL_TIMEOUT_SECS),
            risk_tolerance: RiskTolerance::Medium,
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            gemini_api_key: None,
            gemini_model: None,
            qdrant_url: None,
            qdrant_api_key: None,
            qdrant_collection: DEFAULT_QDRANT_COLLECTION.to_string(),
            database_url: None,
            port: DEFAULT_PORT,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        Ok(Self {
            max_retries: parse_or(get("MAX_RETRIES"), "MAX_RETRIES", defaults.max_retries)?,
            similar_cases_top_k: parse_or(
                get("SIMILAR_CASES_TOP_K"),
                "SIMILAR_CASES_TOP_K",
                defaults.similar_cases_top_k,
            )?,
            oracle_timeout: Duration::from_secs(parse_or(
                get("ORACLE_TIMEOUT_SECS"),
                "ORACLE_TIMEOUT_SECS",
                DEFAULT_ORACLE_TIMEOUT_SECS,
            )?),
            retrieval_timeout: Duration::from_secs(parse_or(
                get("RETRIEVAL_TIMEOUT_SECS"),
                "RETRIEVAL_TIMEOUT_SECS",
                DEFAULT_RETRIEVAL_TIMEOUT_SECS,
            )?),
            risk_tolerance: get("RISK_TOLERANCE")
                .map(|v| RiskTolerance::parse(&v))
                .unwrap_or(defaults.risk_tolerance),
            artifacts_dir: get("ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifacts_dir),
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL"),
            qdrant_url: get("QDRANT_URL"),
            qdrant_api_key: get("QDRANT_API_KEY"),
            qdrant_collection: get("QDRANT_COLLECTION").unwrap_or(defaults.qdrant_collection),
            database_url: get("DATABASE_URL").or_else(|| get("POSTGRES_URL")),
            port: parse_or(
                get("PORT").or_else(|| get("API_PORT")),
                "PORT",
                defaults.port,
            )?,
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| PipelineError::Config(format!("{} must be a number, got '{}'", key, raw))),
    }
}
