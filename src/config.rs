//! Environment-driven configuration for the connection and for each run.

use std::env;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{CatalogError, EntityCatalog};
use crate::generate::GenerateConfig;
use crate::pivot::DuplicatePolicy;
use crate::returns::ReturnsRequest;
use crate::statement::TableName;

const DEFAULT_CATALOG_SPEC: &str = "1-200";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

/// Storage connection settings, applied once when the sink is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub db_path: PathBuf,
    pub threads: u32,
    pub cache_size_mib: u64,
    pub soft_heap_limit_mib: u64,
    /// Log the query plan of every read and update statement.
    pub profile: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/stocks.sqlite"),
            threads: 4,
            cache_size_mib: 256,
            soft_heap_limit_mib: 1024,
            profile: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub source_table: String,
    pub batch_size: usize,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            source_table: "raw".to_string(),
            batch_size: 20,
            duplicate_policy: DuplicatePolicy::Max,
        }
    }
}

/// Unparsable logging values fall back to defaults so a typo never blocks a run.
pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Some(level) = non_empty_var("STOCKWIDE_LOG_LEVEL") {
        config.level = level;
    }
    if let Some(format) =
        non_empty_var("STOCKWIDE_LOG_FORMAT").and_then(|raw| parse_log_format(&raw))
    {
        config.format = format;
    }
    if let Some(include_target) =
        non_empty_var("STOCKWIDE_LOG_TARGET").and_then(|raw| parse_bool(&raw))
    {
        config.include_target = include_target;
    }

    config
}

pub fn connection_config_from_env() -> Result<ConnectionConfig, ConfigError> {
    let mut config = ConnectionConfig::default();

    if let Some(path) = non_empty_var("STOCKWIDE_DB_PATH") {
        config.db_path = PathBuf::from(path);
    }
    if let Some(raw) = non_empty_var("STOCKWIDE_THREADS") {
        config.threads = parse_positive("STOCKWIDE_THREADS", &raw)?;
    }
    if let Some(raw) = non_empty_var("STOCKWIDE_CACHE_MIB") {
        config.cache_size_mib = parse_positive("STOCKWIDE_CACHE_MIB", &raw)?;
    }
    if let Some(raw) = non_empty_var("STOCKWIDE_MEMORY_LIMIT_MIB") {
        config.soft_heap_limit_mib = parse_positive("STOCKWIDE_MEMORY_LIMIT_MIB", &raw)?;
    }
    if let Some(raw) = non_empty_var("STOCKWIDE_PROFILE") {
        config.profile = parse_bool(&raw).ok_or_else(|| ConfigError::InvalidValue {
            key: "STOCKWIDE_PROFILE",
            value: raw.clone(),
            reason: "expected true or false".to_string(),
        })?;
    }

    Ok(config)
}

pub fn run_config_from_env() -> Result<RunConfig, ConfigError> {
    let mut config = RunConfig::default();

    if let Some(table) = non_empty_var("STOCKWIDE_SOURCE_TABLE") {
        config.source_table = table;
    }
    if let Some(raw) = non_empty_var("STOCKWIDE_BATCH_SIZE") {
        config.batch_size = parse_positive("STOCKWIDE_BATCH_SIZE", &raw)?;
    }
    if let Some(raw) = non_empty_var("STOCKWIDE_DUPLICATE_POLICY") {
        config.duplicate_policy =
            DuplicatePolicy::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "STOCKWIDE_DUPLICATE_POLICY",
                value: raw.clone(),
                reason: "expected max, latest or reject".to_string(),
            })?;
    }

    Ok(config)
}

/// Source and target of the returns run. The batch size is shared with the
/// pivot through `STOCKWIDE_BATCH_SIZE`.
pub fn returns_config_from_env() -> Result<ReturnsRequest, ConfigError> {
    let mut config = ReturnsRequest::default();

    if let Some(raw) = non_empty_var("STOCKWIDE_RETURNS_SOURCE") {
        config.source_table = parse_table("STOCKWIDE_RETURNS_SOURCE", &raw)?;
    }
    if let Some(raw) = non_empty_var("STOCKWIDE_RETURNS_TARGET") {
        config.target_table = parse_table("STOCKWIDE_RETURNS_TARGET", &raw)?;
    }
    if let Some(raw) = non_empty_var("STOCKWIDE_BATCH_SIZE") {
        config.batch_size = parse_positive("STOCKWIDE_BATCH_SIZE", &raw)?;
    }

    Ok(config)
}

pub fn generate_config_from_env() -> Result<GenerateConfig, ConfigError> {
    let mut config = GenerateConfig::default();

    if let Some(dir) = non_empty_var("STOCKWIDE_GENERATE_DIR") {
        config.output_dir = PathBuf::from(dir);
    }
    if let Some(raw) = non_empty_var("STOCKWIDE_GENERATE_FILES") {
        config.num_files = parse_positive("STOCKWIDE_GENERATE_FILES", &raw)?;
    }
    if let Some(raw) = non_empty_var("STOCKWIDE_GENERATE_STOCKS") {
        config.num_stocks = parse_positive("STOCKWIDE_GENERATE_STOCKS", &raw)?;
    }
    if let Some(raw) = non_empty_var("STOCKWIDE_GENERATE_START") {
        config.start_date = parse_date("STOCKWIDE_GENERATE_START", &raw)?;
    }
    if let Some(raw) = non_empty_var("STOCKWIDE_GENERATE_END") {
        config.end_date = parse_date("STOCKWIDE_GENERATE_END", &raw)?;
    }
    if let Some(raw) = non_empty_var("STOCKWIDE_GENERATE_SEED") {
        config.seed = Some(raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: "STOCKWIDE_GENERATE_SEED",
            value: raw.clone(),
            reason: "not an unsigned integer".to_string(),
        })?);
    }
    if let Some(raw) = non_empty_var("STOCKWIDE_GENERATE_FILE_SIZE_MIB") {
        let size: f64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: "STOCKWIDE_GENERATE_FILE_SIZE_MIB",
            value: raw.clone(),
            reason: "not a number".to_string(),
        })?;
        if !size.is_finite() || size <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "STOCKWIDE_GENERATE_FILE_SIZE_MIB",
                value: raw,
                reason: "must be > 0".to_string(),
            });
        }
        config.file_size_mib = Some(size);
    }

    Ok(config)
}

/// `STOCKWIDE_CATALOG_PATH` (JSON file) wins over `STOCKWIDE_CATALOG` (inline spec).
pub fn catalog_from_env() -> Result<EntityCatalog, ConfigError> {
    if let Some(path) = non_empty_var("STOCKWIDE_CATALOG_PATH") {
        return Ok(EntityCatalog::from_json_file(&PathBuf::from(path))?);
    }

    let spec =
        non_empty_var("STOCKWIDE_CATALOG").unwrap_or_else(|| DEFAULT_CATALOG_SPEC.to_string());
    Ok(EntityCatalog::from_spec(&spec)?)
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_table(key: &'static str, raw: &str) -> Result<TableName, ConfigError> {
    TableName::parse(raw).map_err(|err| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason: err.to_string(),
    })
}

fn parse_date(key: &'static str, raw: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|err| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason: err.to_string(),
    })
}

fn parse_positive<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let invalid = |reason: &str| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    let value: T = raw.parse().map_err(|_| invalid("not an unsigned integer"))?;
    if value <= T::default() {
        return Err(invalid("must be >= 1"));
    }
    Ok(value)
}
