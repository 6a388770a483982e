//! Observations and point cloud preprocessing
//!
//! An observation is the raw cloud delivered by the sensor plus an aligned
//! foreground mask from the segmentation stage. Before registration the
//! foreground is optionally cropped to the neighborhood of the previous
//! estimate and downsampled on a voxel grid.

use std::collections::BTreeMap;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::TrackingError;

/// One frame of sensor data
#[derive(Debug, Clone)]
pub struct Observation {
    points: Vec<Vector3<f64>>,
    mask: Vec<bool>,
}

impl Observation {
    /// Points with an aligned foreground mask
    pub fn new(points: Vec<Vector3<f64>>, mask: Vec<bool>) -> Result<Self, TrackingError> {
        if points.len() != mask.len() {
            return Err(TrackingError::InvalidObservation {
                points: points.len(),
                mask: mask.len(),
            });
        }
        Ok(Self { points, mask })
    }

    /// Every point belongs to the tracked object
    pub fn all_foreground(points: Vec<Vector3<f64>>) -> Self {
        let mask = vec![true; points.len()];
        Self { points, mask }
    }

    /// Observation with no points
    pub fn empty() -> Self {
        Self {
            points: Vec::new(),
            mask: Vec::new(),
        }
    }

    /// All points, foreground or not
    pub fn points(&self) -> &[Vector3<f64>] {
        &self.points
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Finite points flagged as foreground
    pub fn foreground(&self) -> impl Iterator<Item = &Vector3<f64>> + '_ {
        self.points
            .iter()
            .zip(self.mask.iter())
            .filter(|(p, m)| **m && p.iter().all(|c| c.is_finite()))
            .map(|(p, _)| p)
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl BoundingBox {
    /// Tightest box around `points`, or `None` for an empty set
    pub fn around(points: &[Vector3<f64>]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = Self { min: *first, max: *first };
        for p in &points[1..] {
            bbox.min = bbox.min.inf(p);
            bbox.max = bbox.max.sup(p);
        }
        Some(bbox)
    }

    /// Box grown by `margin` on every side
    pub fn expanded(&self, margin: f64) -> Self {
        let m = Vector3::repeat(margin);
        Self {
            min: self.min - m,
            max: self.max + m,
        }
    }

    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }
}

/// Preprocessing applied to the foreground before registration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Voxel edge length for downsampling [m]; `None` keeps every point
    pub voxel_leaf_size: Option<f64>,
    /// Keep only points within this distance of the previous estimate's
    /// bounding box [m]; `None` disables cropping
    pub crop_margin: Option<f64>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            voxel_leaf_size: Some(0.02),
            crop_margin: None,
        }
    }
}

impl PreprocessConfig {
    pub fn validate(&self) -> Result<(), TrackingError> {
        if let Some(leaf) = self.voxel_leaf_size {
            if !(leaf.is_finite() && leaf > 0.0) {
                return Err(TrackingError::config(format!(
                    "voxel leaf size must be positive, got {}",
                    leaf
                )));
            }
        }
        if let Some(margin) = self.crop_margin {
            if !(margin.is_finite() && margin >= 0.0) {
                return Err(TrackingError::config(format!(
                    "crop margin must be non-negative, got {}",
                    margin
                )));
            }
        }
        Ok(())
    }

    /// Extract the registration targets from an observation
    ///
    /// `previous` is the last vertex estimate, used for cropping.
    pub fn apply(&self, observation: &Observation, previous: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        let crop = self
            .crop_margin
            .and_then(|margin| BoundingBox::around(previous).map(|b| b.expanded(margin)));

        let foreground: Vec<Vector3<f64>> = observation
            .foreground()
            .filter(|p| crop.map_or(true, |b| b.contains(p)))
            .copied()
            .collect();

        match self.voxel_leaf_size {
            Some(leaf) => voxel_downsample(&foreground, leaf),
            None => foreground,
        }
    }
}

/// Replace the points in each occupied voxel by their centroid
///
/// Output order follows the voxel key, so the result does not depend on
/// the input order beyond floating-point summation.
pub fn voxel_downsample(points: &[Vector3<f64>], leaf_size: f64) -> Vec<Vector3<f64>> {
    let mut voxels: BTreeMap<(i64, i64, i64), (Vector3<f64>, usize)> = BTreeMap::new();

    for p in points {
        let key = (
            (p.x / leaf_size).floor() as i64,
            (p.y / leaf_size).floor() as i64,
            (p.z / leaf_size).floor() as i64,
        );
        let entry = voxels.entry(key).or_insert((Vector3::zeros(), 0));
        entry.0 += p;
        entry.1 += 1;
    }

    voxels
        .into_values()
        .map(|(sum, count)| sum / count as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mask_length_mismatch() {
        let err = Observation::new(vec![Vector3::zeros(); 3], vec![true; 2]).unwrap_err();
        assert_eq!(err, TrackingError::InvalidObservation { points: 3, mask: 2 });
    }

    #[test]
    fn test_foreground_skips_masked_and_non_finite() {
        let obs = Observation::new(
            vec![
                Vector3::new(0.0, 0.0, 1.0),
                Vector3::new(0.1, 0.0, 1.0),
                Vector3::new(f64::NAN, 0.0, 1.0),
                Vector3::new(0.2, 0.0, f64::INFINITY),
            ],
            vec![true, false, true, true],
        )
        .unwrap();
        let fg: Vec<_> = obs.foreground().collect();
        assert_eq!(fg.len(), 1);
        assert_relative_eq!(fg[0].x, 0.0);
    }

    #[test]
    fn test_voxel_downsample_centroids() {
        let points = vec![
            Vector3::new(0.001, 0.001, 0.001),
            Vector3::new(0.003, 0.003, 0.003),
            Vector3::new(0.5, 0.5, 0.5),
        ];
        let out = voxel_downsample(&points, 0.02);
        assert_eq!(out.len(), 2);
        assert_relative_eq!(out[0], Vector3::new(0.002, 0.002, 0.002), epsilon = 1e-12);
        assert_relative_eq!(out[1], Vector3::new(0.5, 0.5, 0.5), epsilon = 1e-12);
    }

    #[test]
    fn test_voxel_downsample_is_order_independent() {
        let points: Vec<Vector3<f64>> = (0..40)
            .map(|i| Vector3::new(0.013 * i as f64, (0.007 * i as f64).sin(), 1.0))
            .collect();
        let mut reversed = points.clone();
        reversed.reverse();
        let a = voxel_downsample(&points, 0.05);
        let b = voxel_downsample(&reversed, 0.05);
        assert_eq!(a.len(), b.len());
        for (p, q) in a.iter().zip(b.iter()) {
            assert_relative_eq!(p, q, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_crop_to_previous_estimate() {
        let config = PreprocessConfig {
            voxel_leaf_size: None,
            crop_margin: Some(0.1),
        };
        let previous = vec![Vector3::new(0.0, 0.0, 1.0), Vector3::new(1.0, 0.0, 1.0)];
        let obs = Observation::all_foreground(vec![
            Vector3::new(0.5, 0.05, 1.0),
            Vector3::new(0.5, 0.5, 1.0),
            Vector3::new(-0.05, 0.0, 1.05),
        ]);
        let kept = config.apply(&obs, &previous);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_invalid_preprocess_config() {
        let config = PreprocessConfig {
            voxel_leaf_size: Some(0.0),
            crop_margin: None,
        };
        assert!(config.validate().is_err());
        let config = PreprocessConfig {
            voxel_leaf_size: None,
            crop_margin: Some(-1.0),
        };
        assert!(config.validate().is_err());
    }
}
