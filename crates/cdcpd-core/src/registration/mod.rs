//! Probabilistic registration
//!
//! Coherent point drift with a visibility-weighted E-step and a
//! motion-coherence regularizer over the template's edge structure:
//! - [`cpd`]: the EM engine
//!
//! The configuration mirrors the parameters of the mixture model:
//! - β: width of the Gaussian coherence kernel G
//! - w: prior weight of the uniform outlier component
//! - λ: weight of the edge-smoothness penalty (annealed per iteration)
//! - α: ridge weight on the displacement coefficients

pub mod cpd;

pub use cpd::*;

use serde::{Deserialize, Serialize};

use crate::error::TrackingError;

/// Registration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Coherence kernel width β [m]
    pub beta: f64,
    /// Outlier weight w ∈ [0, 1)
    pub outlier_weight: f64,
    /// Motion-coherence trade-off λ
    pub lambda: f64,
    /// Per-iteration decay of λ (λₖ = λ · annealingᵏ⁺¹)
    pub lambda_annealing: f64,
    /// Ridge weight α on the displacement coefficients
    pub alpha: f64,
    /// Convergence tolerance on the maximum per-vertex change [m]
    pub tolerance: f64,
    /// Maximum EM iterations per frame
    pub max_iterations: usize,
    /// Scale applied to the data-driven initial variance
    pub initial_sigma_scale: f64,
    /// Minimum number of observed points to attempt registration
    pub min_points: usize,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            beta: 1.0,
            outlier_weight: 0.1,
            lambda: 1.0,
            lambda_annealing: 0.6,
            alpha: 3.0,
            tolerance: 1e-4,
            max_iterations: 100,
            initial_sigma_scale: 1.0 / 8.0,
            min_points: 2,
        }
    }
}

impl RegistrationConfig {
    pub fn validate(&self) -> Result<(), TrackingError> {
        let positive = [
            ("beta", self.beta),
            ("tolerance", self.tolerance),
            ("initial_sigma_scale", self.initial_sigma_scale),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(TrackingError::config(format!("{} must be positive, got {}", name, value)));
            }
        }
        let non_negative = [("lambda", self.lambda), ("alpha", self.alpha)];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(TrackingError::config(format!("{} must be non-negative, got {}", name, value)));
            }
        }
        if !(self.outlier_weight >= 0.0 && self.outlier_weight < 1.0) {
            return Err(TrackingError::config(format!(
                "outlier weight must lie in [0, 1), got {}",
                self.outlier_weight
            )));
        }
        if !(self.lambda_annealing > 0.0 && self.lambda_annealing <= 1.0) {
            return Err(TrackingError::config(format!(
                "lambda annealing must lie in (0, 1], got {}",
                self.lambda_annealing
            )));
        }
        if self.max_iterations == 0 {
            return Err(TrackingError::config("max_iterations must be at least 1"));
        }
        if self.min_points == 0 {
            return Err(TrackingError::config("min_points must be at least 1"));
        }
        Ok(())
    }

    /// Variance floor: σ² never drops below tolerance / 10
    pub fn sigma2_floor(&self) -> f64 {
        self.tolerance / 10.0
    }
}
