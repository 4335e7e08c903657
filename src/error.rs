use thiserror::Error;

/// Configuration construction failures: malformed TOML, unknown enum values,
/// or cross-field constraints that don't hold.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cost markup must be non-negative, got {0}")]
    NegativeMarkup(f64),

    #[error("performance.max_workers must be at least 1")]
    ZeroWorkers,

    #[error("low_match_rate_threshold must be in [0, 1], got {0}")]
    ThresholdOutOfRange(f64),
}

/// Errors raised while preparing a chunk of raw rows (schema and parse failures).
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("required column `{0}` is missing")]
    MissingColumn(&'static str),

    #[error("enabled-keys set was not provided")]
    MissingEnabledKeys,

    #[error("could not parse timestamp `{raw}`: {reason}")]
    BadTimestamp { raw: String, reason: String },
}

/// Top-level error type returned by every phase of the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("chunk {index} failed: {source}")]
    ChunkFailed {
        index: usize,
        #[source]
        source: Box<EngineError>,
    },

    #[error("downstream sink failed: {0}")]
    Sink(String),

    #[error("run was cancelled after {completed} of {total} chunks")]
    Cancelled { completed: usize, total: usize },

    #[error("worker pool could not be built: {0}")]
    PoolBuild(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
