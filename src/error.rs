//! Error types for Synheart Gaze

use thiserror::Error;

/// Errors that can occur during calibration and configuration
#[derive(Debug, Error)]
pub enum GazeError {
    #[error("Not enough calibration pairs to fit an affine map: got {got}, need at least 3")]
    InsufficientData { got: usize },

    #[error("Calibration points are degenerate (normal matrix determinant {det:e})")]
    SingularSystem { det: f64 },

    #[error("No source samples observed during the collection window")]
    NoSamples,

    #[error("Calibration failed, not enough samples: collected {got} of at least 3 targets")]
    InsufficientSamples { got: usize },

    #[error("Could not compute mapping: every calibration variant failed")]
    NoViableVariant,

    #[error("Calibration cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GazeError {
    /// Whether this error ends a calibration attempt with a user-visible failure.
    ///
    /// Cancellation is not a failure: the previous status is restored instead.
    pub fn is_calibration_failure(&self) -> bool {
        matches!(
            self,
            GazeError::InsufficientData { .. }
                | GazeError::SingularSystem { .. }
                | GazeError::InsufficientSamples { .. }
                | GazeError::NoViableVariant
        )
    }
}
