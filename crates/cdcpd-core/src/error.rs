//! Error kinds of the tracking pipeline
//!
//! Every kind except [`TrackingError::Configuration`] is non-fatal: the
//! caller keeps (or corrects) its estimate and reports the condition.

use thiserror::Error;

/// Errors raised by the template builder, registration and optimizer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackingError {
    #[error("Observation has {found} usable points, at least {required} required")]
    InsufficientObservation { found: usize, required: usize },
    #[error("All template vertices are occluded")]
    FullOcclusion,
    #[error("Non-finite values during {stage} at EM iteration {iteration}")]
    NumericDivergence { iteration: usize, stage: &'static str },
    #[error("Constraint solve failed after {iterations} iterations (max violation {max_violation:.3e} m)")]
    ConstraintInfeasible { iterations: usize, max_violation: f64 },
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Observation mask has {mask} entries for {points} points")]
    InvalidObservation { points: usize, mask: usize },
}

impl TrackingError {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        TrackingError::Configuration(msg.into())
    }

    /// Whether the frame that raised this error still produced an output
    pub fn is_degraded_output(&self) -> bool {
        matches!(self, TrackingError::ConstraintInfeasible { .. })
    }

    /// Whether this error is fatal at initialization
    pub fn is_fatal(&self) -> bool {
        matches!(self, TrackingError::Configuration(_))
    }
}
