use thiserror::Error;

/// Request-scoped failures of the prediction path.
///
/// The first four variants are caller mistakes and map to 4xx;
/// `ModelInput` means the loaded artifacts disagree with the feature schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictError {
    #[error("Missing data for required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid number format for field: {0}")]
    InvalidFormat(&'static str),

    #[error("Invalid purpose: {value}. Must be one of {valid:?}")]
    UnknownCategory { value: String, valid: Vec<String> },

    #[error("Non-finite value for numeric field: {0}")]
    InvalidNumericValue(&'static str),

    #[error("model input shape mismatch: expected {expected} columns, got {got}")]
    ModelInput { expected: usize, got: usize },
}

impl PredictError {
    #[inline]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, PredictError::ModelInput { .. })
    }

    /// Stable short name, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::MissingField(_) => "missing_field",
            PredictError::InvalidFormat(_) => "invalid_format",
            PredictError::UnknownCategory { .. } => "unknown_category",
            PredictError::InvalidNumericValue(_) => "invalid_numeric_value",
            PredictError::ModelInput { .. } => "model_input",
        }
    }
}
