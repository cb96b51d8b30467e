use crate::budget::{
    ceiling_for, DEFAULT_MAX_WEIGHT_PER_WINDOW, DEFAULT_SAFETY_MARGIN, DEFAULT_WINDOW,
};
use crate::scheduler::{SchedulerSettings, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES};
use candlekeep_domain::errors::IngestError;
use candlekeep_domain::repositories::candle_store::validate_table_name;
use candlekeep_domain::services::cost_model::{
    request_weight, DEFAULT_MAX_ROWS_PER_REQUEST, PROVIDER_MAX_ROWS,
};
use candlekeep_domain::value_objects::interval::Interval;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CANDLES_TABLE: &str = "binance_candles";

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub budget: BudgetConfig,
    pub scheduler: SchedulerConfig,
    pub db: DbConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub max_rows_per_request: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_rows_per_request: DEFAULT_MAX_ROWS_PER_REQUEST,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct BudgetConfig {
    pub max_weight_per_window: u32,
    pub window_secs: u64,
    pub safety_margin: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_weight_per_window: DEFAULT_MAX_WEIGHT_PER_WINDOW,
            window_secs: DEFAULT_WINDOW.as_secs(),
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    pub concurrency: usize,
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct DbConfig {
    pub url: Option<String>,
    pub candles_table: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: None,
            candles_table: DEFAULT_CANDLES_TABLE.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct IngestConfig {
    /// Intervals used when `--interval all` is requested. Empty means every interval.
    pub intervals: Vec<Interval>,
}

impl Config {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.provider.base_url.trim().is_empty() {
            return Err(IngestError::Config("provider.base_url is empty".to_string()));
        }
        if self.provider.timeout_ms == 0 {
            return Err(IngestError::Config(
                "provider.timeout_ms must be positive".to_string(),
            ));
        }
        let cap = self.provider.max_rows_per_request;
        if cap == 0 || cap > PROVIDER_MAX_ROWS {
            return Err(IngestError::Config(format!(
                "provider.max_rows_per_request must be in 1..={PROVIDER_MAX_ROWS}, got {cap}"
            )));
        }
        if self.budget.window_secs == 0 {
            return Err(IngestError::Config(
                "budget.window_secs must be positive".to_string(),
            ));
        }
        let ceiling = ceiling_for(self.budget.max_weight_per_window, self.budget.safety_margin)?;
        let cost = request_weight(cap);
        if cost > ceiling {
            return Err(IngestError::CostExceedsCeiling { cost, ceiling });
        }
        if self.scheduler.concurrency == 0 {
            return Err(IngestError::Config(
                "scheduler.concurrency must be positive".to_string(),
            ));
        }
        validate_table_name(&self.db.candles_table)?;
        Ok(())
    }

    pub fn budget_window(&self) -> Duration {
        Duration::from_secs(self.budget.window_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.provider.timeout_ms)
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            concurrency: self.scheduler.concurrency,
            max_retries: self.scheduler.max_retries,
            fetch_timeout: self.fetch_timeout(),
            max_rows_per_request: self.provider.max_rows_per_request,
        }
    }

    /// Intervals covered by an `all` request.
    pub fn all_intervals(&self) -> Vec<Interval> {
        if self.ingest.intervals.is_empty() {
            Interval::ALL.to_vec()
        } else {
            let mut intervals = self.ingest.intervals.clone();
            intervals.sort();
            intervals.dedup();
            intervals
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config, IngestError> {
    let contents = fs::read_to_string(path).map_err(|err| {
        IngestError::Config(format!("failed to read config {}: {}", path.display(), err))
    })?;
    parse_config(&contents)
        .map_err(|err| IngestError::Config(format!("{}: {}", path.display(), err)))
}

pub fn parse_config(contents: &str) -> Result<Config, String> {
    toml::from_str(contents).map_err(|err| format!("failed to parse TOML: {err}"))
}
