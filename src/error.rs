use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("particle count must be positive")]
    InvalidParticleCount,

    #[error("state dimension must be positive")]
    InvalidStateDim,

    #[error("resampling threshold must lie in [0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("unknown resampling method: {0}")]
    UnknownResamplingMethod(String),

    #[error("{what} has length {found}, expected {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid value for {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("column not found: {0}")]
    MissingColumn(String),

    #[error("score updates must be time-ordered: {next} follows {previous}")]
    NonMonotonicTime { previous: f64, next: f64 },
}

impl FilterError {
    /// True for errors raised while building a filter, as opposed to
    /// errors raised by a call with malformed inputs.
    pub fn is_configuration(&self) -> bool {
        match self {
            FilterError::InvalidParticleCount => true,
            FilterError::InvalidStateDim => true,
            FilterError::InvalidThreshold(_) => true,
            FilterError::UnknownResamplingMethod(_) => true,
            FilterError::InvalidParameter { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;
