use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Training window of {window_days} days contains no usable transactions")]
    EmptyTrainingWindow { window_days: u32 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RiskError {
    /// True for errors caused by the caller's input (4xx-equivalent).
    /// Everything else is a system-side failure (5xx-equivalent).
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            RiskError::MissingField { .. } | RiskError::InvalidField { .. }
        )
    }
}

pub type RiskResult<T> = Result<T, RiskError>;
