//! Error taxonomy for the session core.
//!
//! Only two kinds of failure escape `run_session`: an invalid parameter set
//! ([`ConfigError`], rejected before the wave loop) and an unrecoverable
//! collaborator failure ([`DataSourceError`]). Per-signal issues are skips,
//! not errors (see `signal::SkipReason`).

/// Invalid strategy parameters, rejected before any simulation work.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    NonPositivePositionSize(f64),
    LeverageBelowOne(u32),
    NegativePercent { field: &'static str, value: f64 },
    WaveCapBelowOne(u32),
    NonPositiveInitialCapital(f64),
    OutOfUnitRange { field: &'static str, value: f64 },
    UnknownParameter(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NonPositivePositionSize(v) => {
                write!(f, "position_size must be positive, got {v}")
            }
            ConfigError::LeverageBelowOne(v) => write!(f, "leverage must be >= 1, got {v}"),
            ConfigError::NegativePercent { field, value } => {
                write!(f, "{field} must be non-negative, got {value}")
            }
            ConfigError::WaveCapBelowOne(v) => {
                write!(f, "max_trades_per_wave must be >= 1, got {v}")
            }
            ConfigError::NonPositiveInitialCapital(v) => {
                write!(f, "initial_capital must be positive, got {v}")
            }
            ConfigError::OutOfUnitRange { field, value } => {
                write!(f, "{field} must be in (0, 1], got {value}")
            }
            ConfigError::UnknownParameter(name) => write!(f, "unknown parameter override: {name}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Unrecoverable upstream failure (candle store, signal source, params source,
/// or result sink). Aborts the session.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceError {
    pub source_name: &'static str,
    pub message: String,
}

impl DataSourceError {
    pub fn new(source_name: &'static str, message: impl Into<String>) -> Self {
        Self {
            source_name,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source_name, self.message)
    }
}

impl std::error::Error for DataSourceError {}

/// Top-level session failure.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    Config(ConfigError),
    DataSource(DataSourceError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Config(e) => write!(f, "config: {e}"),
            SessionError::DataSource(e) => write!(f, "data source: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ConfigError> for SessionError {
    fn from(e: ConfigError) -> Self {
        SessionError::Config(e)
    }
}

impl From<DataSourceError> for SessionError {
    fn from(e: DataSourceError) -> Self {
        SessionError::DataSource(e)
    }
}
