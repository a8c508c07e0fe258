use std::io;

use thiserror::Error;

/// Errors produced while unrolling, evaluating or training a model.
#[derive(Debug, Error)]
pub enum CrfError {
    /// A template's weight array was re-allocated with a different number of
    /// assignments.
    #[error("weights length changed for template {template}: was {was}, now {now}")]
    WeightsLengthChanged {
        template: String,
        was: usize,
        now: usize,
    },

    /// A clique has more joint assignments than its template allocated
    /// weight vectors for.
    #[error(
        "instantiating {template} on clique {clique}: assignment {index} exceeds the {num_weights} allocated weight vectors"
    )]
    AssignmentOutOfRange {
        template: String,
        clique: usize,
        index: usize,
        num_weights: usize,
    },

    #[error("{0}")]
    InvalidParameter(String),

    #[error("invalid instance: {0}")]
    InvalidInstance(String),

    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("optimizer failed: {0}")]
    Optimizer(String),

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CrfError {
    pub(crate) fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    pub(crate) fn invalid_instance(message: impl Into<String>) -> Self {
        Self::InvalidInstance(message.into())
    }

    /// Structural errors abort training; everything else may be retried.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::WeightsLengthChanged { .. } | Self::AssignmentOutOfRange { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CrfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CrfError::WeightsLengthChanged {
            template: "bigram(0)".to_string(),
            was: 4,
            now: 9,
        };
        assert_eq!(
            err.to_string(),
            "weights length changed for template bigram(0): was 4, now 9"
        );
        assert!(err.is_structural());

        let err = CrfError::invalid_parameter("variance must be positive");
        assert_eq!(err.to_string(), "variance must be positive");
        assert!(!err.is_structural());
    }
}
