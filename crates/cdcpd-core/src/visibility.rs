//! Visibility prior
//!
//! Down-weights template vertices that are likely hidden behind observed
//! surfaces. Each vertex of the previous estimate is projected into the
//! depth image rendered from the current observation and its depth is
//! compared with the observed depth at that pixel:
//!
//! δᵢ = zᵢ − z_obs(πᵢ) − τ
//!
//! where τ is the occlusion threshold. For δᵢ ≤ 0 the vertex is considered
//! visible (weight 1); beyond the threshold the weight falls off
//! monotonically to 0. Vertices projecting outside the image, behind the
//! camera, or onto pixels without a depth return receive no penalty.

use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::{CameraIntrinsics, DepthImage};
use crate::cloud::Observation;
use crate::error::TrackingError;

/// Shape of the weight decay beyond the occlusion threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum VisibilityFalloff {
    /// w = max(0, 1 − δ / width)
    Linear { width: f64 },
    /// w = exp(−rate · δ)
    Exponential { rate: f64 },
}

impl VisibilityFalloff {
    /// Weight for an excess depth discrepancy δ ≥ 0 [m]
    pub fn weight(&self, excess: f64) -> f64 {
        if !(excess > 0.0) {
            return 1.0;
        }
        match *self {
            VisibilityFalloff::Linear { width } => (1.0 - excess / width).clamp(0.0, 1.0),
            VisibilityFalloff::Exponential { rate } => (-rate * excess).exp().clamp(0.0, 1.0),
        }
    }
}

/// Visibility prior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// Depth by which a vertex may lie behind the observed surface before
    /// it is considered occluded [m]
    pub occlusion_threshold: f64,
    /// Decay beyond the threshold
    pub falloff: VisibilityFalloff,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            occlusion_threshold: 0.02,
            falloff: VisibilityFalloff::Linear { width: 0.05 },
        }
    }
}

impl VisibilityConfig {
    pub fn validate(&self) -> Result<(), TrackingError> {
        if !(self.occlusion_threshold.is_finite() && self.occlusion_threshold >= 0.0) {
            return Err(TrackingError::config(format!(
                "occlusion threshold must be non-negative, got {}",
                self.occlusion_threshold
            )));
        }
        match self.falloff {
            VisibilityFalloff::Linear { width } if !(width.is_finite() && width > 0.0) => {
                Err(TrackingError::config(format!("linear falloff width must be positive, got {}", width)))
            }
            VisibilityFalloff::Exponential { rate } if !(rate.is_finite() && rate > 0.0) => {
                Err(TrackingError::config(format!("exponential falloff rate must be positive, got {}", rate)))
            }
            _ => Ok(()),
        }
    }
}

/// Occlusion-testing visibility prior
///
/// Holds only the fixed camera model and configuration; weights are
/// recomputed from scratch every frame.
#[derive(Debug, Clone)]
pub struct VisibilityPrior {
    intrinsics: CameraIntrinsics,
    config: VisibilityConfig,
}

impl VisibilityPrior {
    pub fn new(intrinsics: CameraIntrinsics, config: VisibilityConfig) -> Self {
        Self { intrinsics, config }
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Weight for a single depth discrepancy zᵢ − z_obs [m]
    pub fn weight_for_discrepancy(&self, discrepancy: f64) -> f64 {
        self.config.falloff.weight(discrepancy - self.config.occlusion_threshold)
    }

    /// Per-vertex weights in [0, 1] for the previous estimate
    pub fn weights(&self, vertices: &[Vector3<f64>], observation: &Observation) -> DVector<f64> {
        let depth = DepthImage::render(observation.points(), &self.intrinsics);
        self.weights_from_depth(vertices, &depth)
    }

    /// Per-vertex weights against an already rendered depth image
    pub fn weights_from_depth(&self, vertices: &[Vector3<f64>], depth: &DepthImage) -> DVector<f64> {
        DVector::from_iterator(
            vertices.len(),
            vertices.iter().map(|v| {
                self.intrinsics
                    .project(v)
                    .and_then(|px| depth.depth_at(px))
                    .map_or(1.0, |observed| self.weight_for_discrepancy(v.z - observed))
            }),
        )
    }
}
