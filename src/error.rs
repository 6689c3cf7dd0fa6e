use thiserror::Error;

/// Errors raised while building variables, configuring or running the sampler.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HmcError {
    #[error("Invalid metric type '{0}', expected a matrix or one of {{'unit', 'diag', 'dense'}}")]
    InvalidMetric(String),

    #[error("Invalid sampler type '{0}', expected one of {{'dynamic', 'static'}}")]
    InvalidSamplerType(String),

    #[error(
        "Metric matrix must be square with side {expected} (number of free variables), got {rows}x{cols}"
    )]
    MetricShape {
        expected: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Metric matrix is not positive definite")]
    MetricNotPositiveDefinite,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("No step has been sampled yet")]
    NoSamples,

    #[error("Driver is in phase {found:?}, expected {expected}")]
    InvalidPhase {
        expected: &'static str,
        found: crate::driver::DriverPhase,
    },

    #[error("Interval bounds must satisfy lower < upper, got ({lower}, {upper})")]
    InvalidBounds { lower: f64, upper: f64 },

    #[error("Non-finite {what} ({value}) at the starting point, is an attribute on the boundary of its domain?")]
    NonFiniteStart { what: &'static str, value: f64 },

    #[error("Divergent transition at draw {draw}")]
    Divergence { draw: u64 },

    #[error("Model error")]
    Model(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl HmcError {
    pub(crate) fn model<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        HmcError::Model(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, HmcError>;
