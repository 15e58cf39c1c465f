use thiserror::Error;

pub type Result<T> = std::result::Result<T, DrqnError>;

#[derive(Debug, Error)]
pub enum DrqnError {
    /// An observation did not have the configured number of elements.
    #[error("observation shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("cannot sample {requested} sequences from {available} stored transitions")]
    InsufficientTransitions { requested: usize, available: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("parameter map lock poisoned")]
    PoisonedParameters,

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Polars(#[from] polars::error::PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}
