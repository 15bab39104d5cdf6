//! Environment-selected pipeline configuration.
//!
//! One [`EnvironmentConfig`] exists per [`Environment`]. The defaults are
//! embedded from `config/environments.yaml`; provisioning can override single
//! values through Lambda environment variables. Every loaded configuration is
//! validated before any AWS client is created.

use crate::error::{PipelineError, Result};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::info;

const ENVIRONMENTS_YAML: &str = include_str!("../config/environments.yaml");

/// Environment variable selecting the deployment environment.
pub const PIPELINE_ENV_VAR: &str = "PIPELINE_ENV";

const LAMBDA_MAX_TIMEOUT_SECONDS: u64 = 900;
const BATCH_MAX_TIMEOUT_SECONDS: u64 = 48 * 60 * 60;
const MIN_MEMORY_MB: u32 = 128;
const MAX_MEMORY_MB: u32 = 10240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }

    /// Reads [`PIPELINE_ENV_VAR`]. A missing value is a configuration error.
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(PIPELINE_ENV_VAR).map_err(|_| {
            PipelineError::InvalidConfiguration(format!("{PIPELINE_ENV_VAR} is not set"))
        })?;
        raw.parse()
    }
}

impl FromStr for Environment {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            other => Err(PipelineError::UnknownEnvironment(other.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(skip, default = "default_environment")]
    pub environment: Environment,
    pub storage: StorageConfig,
    pub tables: TableConfig,
    pub schedules: ScheduleSettings,
    pub compute: ComputeSettings,
    pub date_ranges: DateRangeSettings,
    pub pricing: PricingConfig,
    pub query: QueryConfig,
    pub topology: TopologyConfig,
    pub functions: FunctionNames,
    pub stacks: Vec<String>,
}

fn default_environment() -> Environment {
    Environment::Dev
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,
    /// Extract-stage output; new objects here arm the transform stage.
    pub normalized_prefix: String,
    pub curated_prefix: String,
    pub tokens_prefix: String,
    pub historical_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Conversation table with the current message schema.
    pub current: String,
    /// Legacy conversation table, read once by the archival job.
    pub legacy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub enabled: bool,
    pub expression: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    pub normalize: Schedule,
    pub tokens_consolidated: Schedule,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StageResources {
    pub timeout_seconds: u64,
    pub memory_mb: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeSettings {
    pub normalize: StageResources,
    pub tokens_archival: StageResources,
    pub tokens_consolidated: StageResources,
    pub router: StageResources,
    /// Batch transform job; not bound by the Lambda timeout ceiling.
    pub curate: StageResources,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfiguredRange {
    pub start: NaiveDate,
    /// Open-ended ranges run up to the current day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
}

impl ConfiguredRange {
    pub fn resolve(&self, today: NaiveDate) -> DateRange {
        DateRange {
            start: self.start,
            end: self.end.unwrap_or(today),
        }
    }

    pub fn resolve_today(&self) -> DateRange {
        self.resolve(Utc::now().date_naive())
    }
}

/// Inclusive calendar-day range, evaluated in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// First millisecond of `start`.
    pub fn start_millis(&self) -> i64 {
        self.start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or(i64::MIN)
    }

    /// Last millisecond of `end`.
    pub fn end_millis(&self) -> i64 {
        self.end
            .and_hms_milli_opt(23, 59, 59, 999)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or(i64::MAX)
    }

    pub fn contains_millis(&self, millis: i64) -> bool {
        millis >= self.start_millis() && millis <= self.end_millis()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRangeSettings {
    pub archival: ConfiguredRange,
    pub consolidated: ConfiguredRange,
    pub normalize: ConfiguredRange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub input_per_1k: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub output_per_1k: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub database: String,
    pub workgroup: String,
    pub results_location: String,
    pub view: String,
    pub tokens_table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub transform_job: String,
    pub crawler: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionNames {
    pub normalize: String,
    pub tokens_archival: String,
    pub tokens_consolidated: String,
    pub router: String,
}

impl EnvironmentConfig {
    /// Loads the embedded defaults for `environment`, applies process
    /// environment overrides and validates the result.
    pub fn load(environment: Environment) -> Result<Self> {
        let mut config = Self::from_yaml(ENVIRONMENTS_YAML, environment)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;

        info!(
            environment = %environment,
            bucket = %config.storage.bucket,
            "Loaded pipeline configuration"
        );

        Ok(config)
    }

    /// Shorthand for `load(Environment::from_env()?)`.
    pub fn load_from_env() -> Result<Self> {
        Self::load(Environment::from_env()?)
    }

    /// The embedded defaults for `environment`, without overrides.
    pub fn embedded(environment: Environment) -> Result<Self> {
        Self::from_yaml(ENVIRONMENTS_YAML, environment)
    }

    /// Parses one environment's section without overrides or validation.
    pub fn from_yaml(yaml: &str, environment: Environment) -> Result<Self> {
        let mut sections: BTreeMap<String, EnvironmentConfig> = serde_yaml::from_str(yaml)?;
        let mut config = sections.remove(environment.as_str()).ok_or_else(|| {
            PipelineError::InvalidConfiguration(format!(
                "no configuration section for environment '{environment}'"
            ))
        })?;
        config.environment = environment;
        Ok(config)
    }

    /// Applies the variables provisioning sets on the Lambda functions.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("S3_BUCKET_NAME") {
            self.storage.bucket = v;
        }
        if let Some(v) = get("S3_OUTPUT_PREFIX") {
            self.storage.tokens_prefix = v;
        }
        if let Some(v) = get("S3_OLD_DATA_PREFIX") {
            self.storage.historical_prefix = v;
        }
        if let Some(v) = get("S3_NORMALIZED_PREFIX") {
            self.storage.normalized_prefix = v;
        }
        if let Some(v) = get("S3_CURATED_PREFIX") {
            self.storage.curated_prefix = v;
        }
        if let Some(v) = get("DYNAMODB_TABLE_NAME") {
            self.tables.current = v;
        }
        if let Some(v) = get("OLD_DYNAMODB_TABLE_NAME") {
            self.tables.legacy = v;
        }
        if let Some(v) = get("FILTER_DATE_START") {
            self.date_ranges.archival.start = parse_date("FILTER_DATE_START", &v)?;
        }
        if let Some(v) = get("FILTER_DATE_END") {
            self.date_ranges.archival.end = Some(parse_date("FILTER_DATE_END", &v)?);
        }
        if let Some(v) = get("CONSOLIDATED_DATE_START") {
            self.date_ranges.consolidated.start = parse_date("CONSOLIDATED_DATE_START", &v)?;
        }
        if let Some(v) = get("ATHENA_DATABASE") {
            self.query.database = v;
        }
        if let Some(v) = get("ATHENA_WORKGROUP") {
            self.query.workgroup = v;
        }
        if let Some(v) = get("ATHENA_OUTPUT_LOCATION") {
            self.query.results_location = v;
        }
        if let Some(v) = get("ATHENA_VIEW_NAME") {
            self.query.view = v;
        }
        if let Some(v) = get("INPUT_PRICE_PER_1K") {
            self.pricing.input_per_1k = parse_price("INPUT_PRICE_PER_1K", &v)?;
        }
        if let Some(v) = get("OUTPUT_PRICE_PER_1K") {
            self.pricing.output_per_1k = parse_price("OUTPUT_PRICE_PER_1K", &v)?;
        }
        if let Some(v) = get("TRANSFORM_JOB_NAME") {
            self.topology.transform_job = v;
        }
        if let Some(v) = get("CRAWLER_NAME") {
            self.topology.crawler = v;
        }

        Ok(())
    }

    /// Rejects configurations that would fail or misroute at run time.
    pub fn validate(&self) -> Result<()> {
        require_bucket_name("storage.bucket", &self.storage.bucket)?;
        require_prefix("storage.normalized_prefix", &self.storage.normalized_prefix)?;
        require_prefix("storage.curated_prefix", &self.storage.curated_prefix)?;
        require_prefix("storage.tokens_prefix", &self.storage.tokens_prefix)?;
        require_prefix("storage.historical_prefix", &self.storage.historical_prefix)?;

        if self.storage.normalized_prefix == self.storage.curated_prefix {
            return Err(invalid(
                "storage.curated_prefix must differ from storage.normalized_prefix",
            ));
        }

        require_non_empty("tables.current", &self.tables.current)?;
        require_non_empty("tables.legacy", &self.tables.legacy)?;

        require_schedule("schedules.normalize", &self.schedules.normalize)?;
        require_schedule(
            "schedules.tokens_consolidated",
            &self.schedules.tokens_consolidated,
        )?;

        require_resources("compute.normalize", self.compute.normalize, LAMBDA_MAX_TIMEOUT_SECONDS)?;
        require_resources(
            "compute.tokens_archival",
            self.compute.tokens_archival,
            LAMBDA_MAX_TIMEOUT_SECONDS,
        )?;
        require_resources(
            "compute.tokens_consolidated",
            self.compute.tokens_consolidated,
            LAMBDA_MAX_TIMEOUT_SECONDS,
        )?;
        require_resources("compute.router", self.compute.router, LAMBDA_MAX_TIMEOUT_SECONDS)?;
        require_resources("compute.curate", self.compute.curate, BATCH_MAX_TIMEOUT_SECONDS)?;

        require_range("date_ranges.archival", &self.date_ranges.archival)?;
        require_range("date_ranges.consolidated", &self.date_ranges.consolidated)?;
        require_range("date_ranges.normalize", &self.date_ranges.normalize)?;

        if self.pricing.input_per_1k.is_sign_negative()
            || self.pricing.output_per_1k.is_sign_negative()
        {
            return Err(invalid("pricing values must not be negative"));
        }

        require_non_empty("query.database", &self.query.database)?;
        require_non_empty("query.workgroup", &self.query.workgroup)?;
        require_non_empty("query.view", &self.query.view)?;
        require_non_empty("query.tokens_table", &self.query.tokens_table)?;
        if !self.query.results_location.starts_with("s3://") {
            return Err(invalid("query.results_location must be an s3:// URL"));
        }

        require_non_empty("topology.transform_job", &self.topology.transform_job)?;
        require_non_empty("topology.crawler", &self.topology.crawler)?;

        require_non_empty("functions.normalize", &self.functions.normalize)?;
        require_non_empty("functions.tokens_archival", &self.functions.tokens_archival)?;
        require_non_empty("functions.tokens_consolidated", &self.functions.tokens_consolidated)?;
        require_non_empty("functions.router", &self.functions.router)?;

        if self.stacks.is_empty() {
            return Err(invalid("stacks must list at least one deployable unit"));
        }

        Ok(())
    }

    pub fn historical_key(&self) -> String {
        format!("{}tokens_analysis_old_table.csv", self.storage.historical_prefix)
    }

    pub fn consolidated_key(&self) -> String {
        format!("{}tokens_analysis_consolidated.csv", self.storage.tokens_prefix)
    }

    pub fn normalized_key(&self) -> String {
        format!("{}conversations_normalized.csv", self.storage.normalized_prefix)
    }

    pub fn curated_key(&self) -> String {
        format!("{}conversations_curated.parquet", self.storage.curated_prefix)
    }
}

fn invalid(message: impl Into<String>) -> PipelineError {
    PipelineError::InvalidConfiguration(message.into())
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_bucket_name(field: &str, value: &str) -> Result<()> {
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let valid_edges = value
        .chars()
        .next()
        .zip(value.chars().last())
        .map(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric())
        .unwrap_or(false);

    if !(3..=63).contains(&value.len()) || !valid_chars || !valid_edges {
        return Err(invalid(format!("{field} '{value}' is not a valid bucket name")));
    }
    Ok(())
}

fn require_prefix(field: &str, value: &str) -> Result<()> {
    require_non_empty(field, value)?;
    if value.starts_with('/') || !value.ends_with('/') {
        return Err(invalid(format!(
            "{field} '{value}' must be relative and end with '/'"
        )));
    }
    Ok(())
}

fn require_schedule(field: &str, schedule: &Schedule) -> Result<()> {
    let expr = schedule.expression.trim();
    let well_formed =
        (expr.starts_with("cron(") || expr.starts_with("rate(")) && expr.ends_with(')');
    if !well_formed {
        return Err(invalid(format!(
            "{field}.expression '{expr}' must be cron(...) or rate(...)"
        )));
    }
    Ok(())
}

fn require_resources(field: &str, resources: StageResources, max_timeout: u64) -> Result<()> {
    if resources.timeout_seconds == 0 || resources.timeout_seconds > max_timeout {
        return Err(invalid(format!(
            "{field}.timeout_seconds must be within 1..={max_timeout}"
        )));
    }
    if !(MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&resources.memory_mb) {
        return Err(invalid(format!(
            "{field}.memory_mb must be within {MIN_MEMORY_MB}..={MAX_MEMORY_MB}"
        )));
    }
    Ok(())
}

fn require_range(field: &str, range: &ConfiguredRange) -> Result<()> {
    if let Some(end) = range.end {
        if end < range.start {
            return Err(invalid(format!(
                "{field}: end {end} is before start {}",
                range.start
            )));
        }
    }
    Ok(())
}

fn parse_date(name: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| invalid(format!("{name} '{value}' is not a YYYY-MM-DD date: {e}")))
}

fn parse_price(name: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value.trim())
        .map_err(|e| invalid(format!("{name} '{value}' is not a decimal: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn dev() -> EnvironmentConfig {
        EnvironmentConfig::from_yaml(ENVIRONMENTS_YAML, Environment::Dev).unwrap()
    }

    #[test]
    fn test_embedded_configs_are_valid() {
        for env in [Environment::Dev, Environment::Prod] {
            let config = EnvironmentConfig::from_yaml(ENVIRONMENTS_YAML, env).unwrap();
            assert_eq!(config.environment, env);
            config.validate().unwrap();
        }
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!(" PROD ".parse::<Environment>().unwrap(), Environment::Prod);
        assert!(matches!(
            "staging".parse::<Environment>(),
            Err(PipelineError::UnknownEnvironment(_))
        ));
    }

    #[test]
    fn test_schedules_differ_per_environment() {
        let dev = dev();
        let prod = EnvironmentConfig::from_yaml(ENVIRONMENTS_YAML, Environment::Prod).unwrap();
        assert!(!dev.schedules.tokens_consolidated.enabled);
        assert!(prod.schedules.tokens_consolidated.enabled);
        assert_ne!(dev.storage.bucket, prod.storage.bucket);
    }

    #[test]
    fn test_overrides_replace_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("S3_BUCKET_NAME", "other-bucket"),
            ("FILTER_DATE_START", "2025-09-01"),
            ("INPUT_PRICE_PER_1K", "0.004"),
            ("DYNAMODB_TABLE_NAME", ""),
        ]);
        let mut config = dev();
        let original_table = config.tables.current.clone();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.storage.bucket, "other-bucket");
        assert_eq!(
            config.date_ranges.archival.start,
            NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
        );
        assert_eq!(config.pricing.input_per_1k, dec!(0.004));
        // Blank values are ignored.
        assert_eq!(config.tables.current, original_table);
    }

    #[test]
    fn test_malformed_override_fails_fast() {
        let mut config = dev();
        let err = config
            .apply_overrides(|name| (name == "FILTER_DATE_END").then(|| "30/12/2025".to_string()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = dev();
        config.storage.bucket = "Bad_Bucket".to_string();
        assert!(config.validate().is_err());

        let mut config = dev();
        config.storage.normalized_prefix = "normalized".to_string();
        assert!(config.validate().is_err());

        let mut config = dev();
        config.schedules.normalize.expression = "0 5 * * *".to_string();
        assert!(config.validate().is_err());

        let mut config = dev();
        config.compute.tokens_archival.timeout_seconds = 901;
        assert!(config.validate().is_err());

        let mut config = dev();
        config.compute.curate.timeout_seconds = 3600;
        assert!(config.validate().is_ok());

        let mut config = dev();
        config.date_ranges.archival.end = NaiveDate::from_ymd_opt(2025, 1, 1);
        assert!(config.validate().is_err());

        let mut config = dev();
        config.topology.transform_job = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_date_range_bounds_are_inclusive() {
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2025, 8, 4).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 8, 4).unwrap(),
        };
        // 2025-08-04T00:00:00Z and 2025-08-04T23:59:59.999Z
        assert!(range.contains_millis(1_754_265_600_000));
        assert!(range.contains_millis(1_754_351_999_999));
        assert!(!range.contains_millis(1_754_352_000_000));
        assert!(!range.contains_millis(1_754_265_599_999));
    }

    #[test]
    fn test_open_range_resolves_to_today() {
        let config = dev();
        let today = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        let range = config.date_ranges.consolidated.resolve(today);
        assert_eq!(range.end, today);
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2025, 12, 27).unwrap());
    }

    #[test]
    fn test_object_keys_follow_prefixes() {
        let config = dev();
        assert_eq!(
            config.historical_key(),
            "tokens-analysis/historical/tokens_analysis_old_table.csv"
        );
        assert_eq!(
            config.consolidated_key(),
            "tokens-analysis/tokens_analysis_consolidated.csv"
        );
        assert!(config.normalized_key().starts_with(&config.storage.normalized_prefix));
    }
}
