//! # CDCPD Core
//!
//! Constrained Deformable Coherent Point Drift - core library
//!
//! This library implements the per-frame numeric pipeline for tracking a
//! deformable, topologically linear object (rope, cable) from depth-sensor
//! point clouds against a known template.
//!
//! ## Modules
//!
//! - [`template`]: Reference chain/graph with per-edge rest lengths
//! - [`camera`]: Pinhole intrinsics, projection and depth rendering
//! - [`cloud`]: Observations and point cloud preprocessing
//! - [`visibility`]: Occlusion-aware per-vertex visibility prior
//! - [`math`]: Gaussian kernels and mixture-model helpers
//! - [`registration`]: Coherent point drift (EM) with a motion-coherence regularizer
//! - [`constraints`]: Distance-constrained projection and its local-correction fallback
//! - [`error`]: Error kinds shared by the pipeline

pub mod error;
pub mod template;
pub mod camera;
pub mod cloud;
pub mod visibility;
pub mod math;
pub mod registration;
pub mod constraints;

// Common type aliases
use nalgebra::Vector3;

pub use error::TrackingError;

/// 3D vector type
pub type Vec3 = Vector3<f64>;

/// Spatial dimension of template vertices and observed points
pub const DIM: usize = 3;
