use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DistributionMethod {
    Cpu,
    Memory,
    Weighted,
}

impl Default for DistributionMethod {
    fn default() -> Self {
        DistributionMethod::Cpu
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DistributionWeights {
    pub cpu_weight: f64,
    pub memory_weight: f64,
}

impl Default for DistributionWeights {
    fn default() -> Self {
        // AWS defaults per the cost attributor's weighted method.
        DistributionWeights { cpu_weight: 0.73, memory_weight: 0.27 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    pub method: DistributionMethod,
    pub weights: BTreeMap<String, DistributionWeights>,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        let mut weights = BTreeMap::new();
        weights.insert("aws".to_string(), DistributionWeights::default());
        DistributionConfig { method: DistributionMethod::Cpu, weights }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub markup: f64,
    pub distribution: DistributionConfig,
    pub low_match_rate_threshold: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        CostConfig {
            markup: 0.10,
            distribution: DistributionConfig::default(),
            low_match_rate_threshold: 0.50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub use_streaming: bool,
    pub chunk_size: usize,
    pub parallel_chunks: bool,
    pub max_workers: usize,
    /// Accepted for config-surface compatibility; this engine has no
    /// columnar compute path for label batch-processing, so the flag is
    /// read and otherwise unused.
    pub use_arrow_compute: bool,
    /// Accepted for config-surface compatibility; this engine has no
    /// built-in persistence sink to bulk-load into (`SummarySink` is
    /// implemented by the caller), so the flag is read and otherwise
    /// unused.
    pub use_bulk_copy: bool,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        PerformanceConfig {
            use_streaming: false,
            chunk_size: 50_000,
            parallel_chunks: false,
            max_workers: 4,
            use_arrow_compute: false,
            use_bulk_copy: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OcpConfig {
    pub cluster_id: String,
    pub cluster_alias: String,
    pub provider_uuid: String,
    pub report_period_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub provider_uuid: String,
    pub markup: f64,
    pub cost_entry_bill_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Console,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Console
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: "info".to_string(), format: LogFormat::default() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub performance: PerformanceConfig,
    pub cost: CostConfig,
    pub ocp: OcpConfig,
    pub aws: AwsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Overlays `OCP_COST__<SECTION>__<KEY>=value` environment variables onto an
    /// already-loaded config. Only the handful of scalar fields operators need to
    /// override at deploy time are supported; structural overrides go through the file.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("OCP_COST__PERFORMANCE__PARALLEL_CHUNKS") {
            self.performance.parallel_chunks = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("OCP_COST__PERFORMANCE__CHUNK_SIZE") {
            if let Ok(n) = v.parse() {
                self.performance.chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("OCP_COST__COST__MARKUP") {
            if let Ok(n) = v.parse() {
                self.cost.markup = n;
            }
        }
        if let Ok(v) = std::env::var("OCP_COST__LOGGING__LEVEL") {
            self.logging.level = v;
        }
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cost.markup < 0.0 {
            return Err(ConfigError::NegativeMarkup(self.cost.markup));
        }
        if self.performance.max_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if !(0.0..=1.0).contains(&self.cost.low_match_rate_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.cost.low_match_rate_threshold));
        }
        Ok(())
    }
}
