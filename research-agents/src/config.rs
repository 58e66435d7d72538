//! Screener configuration
//!
//! Settings come from an optional TOML file layered under `SCREENER__*`
//! environment variables, e.g. `SCREENER__UNIVERSE__MIN_AVG_VOLUME=500000`.

use crate::agents::TechnicalSettings;
use crate::orchestrator::PipelineConfig;
use crate::sentiment::SentimentConfig;
use analytics::{FundamentalOptions, UniverseCriteria};
use config::{Config, Environment, File};
use data_ingestion::{RetryPolicy, RetryPolicyError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const ENV_PREFIX: &str = "SCREENER";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode configuration: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] RetryPolicyError),
}

/// Complete configuration for one screening run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenerConfig {
    /// Default tracing level when `RUST_LOG` is unset
    pub log_level: String,

    /// Applied to every data fetch and collaborator call
    pub retry: RetryPolicy,

    pub universe: UniverseCriteria,
    pub fundamentals: FundamentalOptions,
    pub technicals: TechnicalSettings,
    pub sentiment: SentimentConfig,
    pub pipeline: PipelineConfig,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            retry: RetryPolicy::default(),
            universe: UniverseCriteria::default(),
            fundamentals: FundamentalOptions::default(),
            technicals: TechnicalSettings::default(),
            sentiment: SentimentConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Load configuration from an optional TOML file plus environment overrides
pub fn load_config(path: Option<&Path>) -> Result<ScreenerConfig, ConfigError> {
    load_with_prefix(path, ENV_PREFIX)
}

fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<ScreenerConfig, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        debug!(path = %path.display(), "Reading configuration file");
        builder = builder.add_source(File::from(path).required(true));
    }

    let config: ScreenerConfig = builder
        .add_source(
            Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;
    config.retry.validate()?;
    Ok(config)
}

/// Save configuration to TOML file
pub fn save_config(config: &ScreenerConfig, path: &Path) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    write(path, &content)
}

/// Create a commented configuration file holding the defaults
pub fn create_config_template(path: &Path) -> Result<(), ConfigError> {
    write(path, TEMPLATE)
}

fn write(path: &Path, content: &str) -> Result<(), ConfigError> {
    std::fs::write(path, content).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

const TEMPLATE: &str = "# Equity Screener Configuration
# Every value below is the default; delete what you do not change.
# Environment variables override the file, e.g. SCREENER__TECHNICALS__BENCHMARK=SPY

# Used when RUST_LOG is not set
log_level = \"info\"

[retry]
# Total attempts per external call, including the first
max_attempts = 5

# Delay multiplier between attempts
exp_base = 7.0

# Delay before the second attempt (milliseconds)
initial_delay_ms = 1000

# Status codes worth retrying
retryable_status = [429, 500, 503, 504]

[universe]
# Minimum average daily share volume
min_avg_volume = 200000.0

# Minimum years of financial statements, per statement
min_financial_years = 5

max_concurrency = 4

[fundamentals]
# Fiscal years dropped from normalized tables
stale_years = [2020, 2021]

max_concurrency = 4

[technicals]
# Lookback: <n>d, <n>mo, <n>y, ytd or max
period = \"1y\"

# Bar size: 1d, 1wk, 1mo
interval = \"1d\"

max_concurrency = 4

# Market series for beta and R-squared (omit to skip)
# benchmark = \"SPY\"

[sentiment]
# Below this many articles confidence is scaled down
min_articles_threshold = 3

# Blend of vendor tone and headline keywords
tone_weight = 0.4
keyword_weight = 0.6

# Days covered by the short-term horizon
short_term_days = 7

max_themes = 5

[pipeline]
# Parallel-group members running at once
max_concurrent_stages = 8
";

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(format!("screener-{}-{}.toml", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_template_matches_defaults() {
        let parsed: ScreenerConfig = toml::from_str(TEMPLATE).unwrap();
        assert_eq!(parsed, ScreenerConfig::default());
    }

    #[test]
    fn test_partial_file_with_env_override() {
        let path = temp_path("partial");
        std::fs::write(
            &path,
            "log_level = \"debug\"\n[universe]\nmin_avg_volume = 500000.0\n[technicals]\nbenchmark = \"SPY\"\n",
        )
        .unwrap();
        env::set_var("SCREENER_TEST__UNIVERSE__MIN_FINANCIAL_YEARS", "7");

        let config = load_with_prefix(Some(&path), "SCREENER_TEST").unwrap();
        env::remove_var("SCREENER_TEST__UNIVERSE__MIN_FINANCIAL_YEARS");
        std::fs::remove_file(&path).ok();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.universe.min_avg_volume, 500_000.0);
        assert_eq!(config.universe.min_financial_years, 7);
        assert_eq!(config.universe.max_concurrency, 4);
        assert_eq!(config.technicals.benchmark.as_deref(), Some("SPY"));
        assert_eq!(config.technicals.options.period, "1y");
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = temp_path("missing");
        let err = load_with_prefix(Some(&path), "SCREENER_MISSING").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn test_negative_backoff_base_rejected() {
        let path = temp_path("backoff");
        std::fs::write(&path, "[retry]\nexp_base = -2.0\n").unwrap();

        let err = load_with_prefix(Some(&path), "SCREENER_BACKOFF").unwrap_err();
        std::fs::remove_file(&path).ok();

        assert!(matches!(
            err,
            ConfigError::Invalid(RetryPolicyError::InvalidExpBase(base)) if base == -2.0
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let path = temp_path("roundtrip");
        let mut config = ScreenerConfig::default();
        config.sentiment.max_themes = 3;
        config.pipeline.max_concurrent_stages = 2;

        save_config(&config, &path).unwrap();
        let reloaded = load_with_prefix(Some(&path), "SCREENER_ROUNDTRIP").unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_write_failure_reports_path() {
        let path = env::temp_dir().join("no-such-dir").join("screener.toml");
        let err = create_config_template(&path).unwrap_err();
        assert!(err.to_string().contains("no-such-dir"));
    }
}
