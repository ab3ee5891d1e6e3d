//! Configuration management for the campaign scheduler
//!
//! This module handles loading and validating configuration from
//! environment variables and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::Frequency;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Executor configuration
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Budget orchestration configuration
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Metrics and scoring configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduler-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Dispatch loop poll interval in milliseconds
    pub tick_ms: u64,

    /// Maximum number of concurrently executing campaigns
    pub max_concurrent_campaigns: usize,

    /// Misfire grace period in seconds
    pub misfire_grace_secs: u64,

    /// Planning horizon for generated occurrences, in months
    pub horizon_months: u32,

    /// Terminal occurrences older than this many days are cleaned up
    pub cleanup_retention_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            max_concurrent_campaigns: 10,
            misfire_grace_secs: 30,
            horizon_months: 6,
            cleanup_retention_days: 30,
        }
    }
}

/// Campaign execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Execution attempts per occurrence before permanent failure
    pub retry_attempts: u32,

    /// Fixed delay between retry attempts, in seconds
    pub retry_delay_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_secs: 60,
        }
    }
}

/// Budget orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Total budget pool shared by active campaigns. Zero means "use the
    /// sum of current campaign budgets" at rebalance time.
    pub total_budget: f64,

    /// Floor for any single campaign's budget
    pub min_budget: f64,

    /// Ceiling for any single campaign, as a fraction of the total pool
    pub max_allocation_fraction: f64,

    /// Relative change below which a proposed budget is not applied
    pub rebalance_threshold: f64,

    /// Weight of the evenness penalty in the optimizer objective
    pub evenness_penalty: f64,

    /// Cadence of the periodic rebalancing pass
    pub rebalance_frequency: Frequency,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            total_budget: 0.0,
            min_budget: 100.0,
            max_allocation_fraction: 0.5,
            rebalance_threshold: 0.15,
            evenness_penalty: 0.2,
            rebalance_frequency: Frequency::Weekly,
        }
    }
}

/// Metrics collection and scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Scoring window in days
    pub window_days: i64,

    /// Periodic metrics collection interval, in seconds
    pub collection_interval_secs: u64,

    /// Scoring weight for click-through rate
    pub weight_ctr: f64,

    /// Scoring weight for engagement rate
    pub weight_engagement: f64,

    /// Scoring weight for conversion rate
    pub weight_conversion: f64,

    /// Scoring weight for normalized cost-per-acquisition
    pub weight_cpa: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            collection_interval_secs: 3_600,
            weight_ctr: 0.2,
            weight_engagement: 0.3,
            weight_conversion: 0.3,
            weight_cpa: 0.2,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/cadence.db"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            executor: ExecutorConfig::default(),
            budget: BudgetConfig::default(),
            metrics: MetricsConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Some(v) = env_parse::<u64>("CADENCE_TICK_MS") {
            config.scheduler.tick_ms = v;
        }
        if let Some(v) = env_parse::<usize>("CADENCE_MAX_CONCURRENT_CAMPAIGNS") {
            config.scheduler.max_concurrent_campaigns = v;
        }
        if let Some(v) = env_parse::<u64>("CADENCE_MISFIRE_GRACE_SECS") {
            config.scheduler.misfire_grace_secs = v;
        }
        if let Some(v) = env_parse::<u32>("CADENCE_HORIZON_MONTHS") {
            config.scheduler.horizon_months = v;
        }

        if let Some(v) = env_parse::<u32>("CADENCE_RETRY_ATTEMPTS") {
            config.executor.retry_attempts = v;
        }
        if let Some(v) = env_parse::<u64>("CADENCE_RETRY_DELAY_SECS") {
            config.executor.retry_delay_secs = v;
        }

        if let Some(v) = env_parse::<f64>("CADENCE_TOTAL_BUDGET") {
            config.budget.total_budget = v;
        }
        if let Some(v) = env_parse::<f64>("CADENCE_MIN_BUDGET") {
            config.budget.min_budget = v;
        }
        if let Some(v) = env_parse::<f64>("CADENCE_MAX_ALLOCATION_FRACTION") {
            config.budget.max_allocation_fraction = v;
        }
        if let Some(v) = env_parse::<f64>("CADENCE_REBALANCE_THRESHOLD") {
            config.budget.rebalance_threshold = v;
        }
        if let Ok(v) = std::env::var("CADENCE_REBALANCE_FREQUENCY") {
            config.budget.rebalance_frequency = v
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid CADENCE_REBALANCE_FREQUENCY")?;
        }

        if let Some(v) = env_parse::<i64>("CADENCE_METRICS_WINDOW_DAYS") {
            config.metrics.window_days = v;
        }
        if let Some(v) = env_parse::<u64>("CADENCE_METRICS_INTERVAL_SECS") {
            config.metrics.collection_interval_secs = v;
        }

        if let Ok(v) = std::env::var("CADENCE_DB_PATH") {
            config.database.path = v.into();
        }
        if let Ok(v) = std::env::var("CADENCE_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("CADENCE_LOG_FORMAT") {
            config.logging.format = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent_campaigns == 0 {
            anyhow::bail!("max_concurrent_campaigns must be at least 1");
        }
        if self.scheduler.horizon_months == 0 {
            anyhow::bail!("horizon_months must be at least 1");
        }
        if self.executor.retry_attempts == 0 {
            anyhow::bail!("retry_attempts must be at least 1");
        }
        if self.budget.min_budget < 0.0 {
            anyhow::bail!("min_budget must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.budget.max_allocation_fraction)
            || self.budget.max_allocation_fraction == 0.0
        {
            anyhow::bail!("max_allocation_fraction must be in (0, 1]");
        }
        if self.budget.rebalance_threshold < 0.0 {
            anyhow::bail!("rebalance_threshold must be non-negative");
        }
        if self.budget.evenness_penalty < 0.0 {
            anyhow::bail!("evenness_penalty must be non-negative");
        }

        let weight_sum = self.metrics.weight_ctr
            + self.metrics.weight_engagement
            + self.metrics.weight_conversion
            + self.metrics.weight_cpa;
        if (weight_sum - 1.0).abs() > 1e-6 {
            anyhow::bail!("scoring weights must sum to 1.0 (got {weight_sum})");
        }
        if self.metrics.window_days <= 0 {
            anyhow::bail!("window_days must be positive");
        }

        Ok(())
    }

    /// Dispatch loop tick as a std Duration
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.scheduler.tick_ms)
    }

    /// Misfire grace as a chrono Duration
    pub fn misfire_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.scheduler.misfire_grace_secs as i64)
    }

    /// Retry delay as a chrono Duration
    pub fn retry_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.executor.retry_delay_secs as i64)
    }

    /// Metrics collection interval as a chrono Duration
    pub fn metrics_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.metrics.collection_interval_secs as i64)
    }

    /// Rebalancing interval derived from the configured frequency
    pub fn rebalance_interval(&self) -> chrono::Duration {
        self.budget
            .rebalance_frequency
            .interval()
            .unwrap_or_else(|| chrono::Duration::days(7))
    }
}

/// Parse an environment variable, ignoring unset or malformed values
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.max_concurrent_campaigns, 10);
        assert_eq!(config.executor.retry_attempts, 3);
        assert!((config.budget.rebalance_threshold - 0.15).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.scheduler.max_concurrent_campaigns = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fraction() {
        let mut config = Config::default();
        config.budget.max_allocation_fraction = 1.5;
        assert!(config.validate().is_err());

        config.budget.max_allocation_fraction = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unbalanced_weights() {
        let mut config = Config::default();
        config.metrics.weight_ctr = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let toml_src = r#"
            [scheduler]
            tick_ms = 500
            max_concurrent_campaigns = 4
            misfire_grace_secs = 10
            horizon_months = 3
            cleanup_retention_days = 14

            [budget]
            total_budget = 5000.0
            min_budget = 50.0
            max_allocation_fraction = 0.7
            rebalance_threshold = 0.1
            evenness_penalty = 0.2
            rebalance_frequency = "daily"
        "#;

        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.scheduler.max_concurrent_campaigns, 4);
        assert_eq!(config.budget.rebalance_frequency, Frequency::Daily);
        assert!((config.budget.total_budget - 5000.0).abs() < f64::EPSILON);
        // Sections not present fall back to defaults
        assert_eq!(config.executor.retry_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_interval_helpers() {
        let config = Config::default();
        assert_eq!(config.tick(), Duration::from_secs(1));
        assert_eq!(config.rebalance_interval(), chrono::Duration::days(7));
        assert_eq!(config.metrics_interval(), chrono::Duration::hours(1));
    }
}
