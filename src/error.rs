//! Error types shared across the crate

use thiserror::Error;

/// Errors raised while validating job configuration
///
/// A configuration error is fatal to the job it belongs to, never to the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A numeric field is outside its allowed range
    #[error("job '{job}': invalid {field} = {value} ({expected})")]
    InvalidValue {
        job: String,
        field: &'static str,
        value: i64,
        expected: &'static str,
    },

    /// No constructor is registered for the module tag
    #[error("job '{job}': unknown module '{module}'")]
    UnknownModule { job: String, module: String },

    /// Two jobs resolve to the same full name
    #[error("duplicate job '{0}'")]
    DuplicateJob(String),

    /// The module rejected its `options` block
    #[error("job '{job}': invalid module options: {reason}")]
    ModuleOptions { job: String, reason: String },
}

/// Errors raised by the chart registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChartError {
    #[error("chart '{0}' already exists")]
    DuplicateChart(String),

    #[error("chart '{chart}' already has dimension '{dim}'")]
    DuplicateDim { chart: String, dim: String },

    #[error("chart '{0}' not found")]
    UnknownChart(String),

    #[error("chart '{chart}' has no dimension '{dim}'")]
    UnknownDim { chart: String, dim: String },

    /// Ids end up quoted inside protocol lines, so they must be non-empty and free of
    /// whitespace and quotes.
    #[error("invalid id '{0}'")]
    InvalidId(String),
}

pub(crate) fn validate_id(id: &str) -> Result<(), ChartError> {
    if id.is_empty() || id.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
        return Err(ChartError::InvalidId(id.to_string()));
    }

    Ok(())
}
