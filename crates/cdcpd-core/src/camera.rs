//! Pinhole camera model
//!
//! Projects camera-frame points into the depth image:
//!
//! u = fx · x / z + cx,   v = fy · y / z + cy
//!
//! and renders a z-buffer from an observed point cloud so the visibility
//! prior can compare vertex depth against observed depth per pixel.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::TrackingError;

/// Camera intrinsics with image size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length along x [px]
    pub fx: f64,
    /// Focal length along y [px]
    pub fy: f64,
    /// Principal point x [px]
    pub cx: f64,
    /// Principal point y [px]
    pub cy: f64,
    /// Image width [px]
    pub width: usize,
    /// Image height [px]
    pub height: usize,
}

/// Integer pixel coordinate inside the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pixel {
    pub u: usize,
    pub v: usize,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, width: usize, height: usize) -> Result<Self, TrackingError> {
        let intrinsics = Self { fx, fy, cx, cy, width, height };
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    /// Build from a 3×3 intrinsic matrix K = [fx 0 cx; 0 fy cy; 0 0 1]
    pub fn from_matrix(k: &Matrix3<f64>, width: usize, height: usize) -> Result<Self, TrackingError> {
        if (k[(2, 2)] - 1.0).abs() > 1e-9 || k[(2, 0)] != 0.0 || k[(2, 1)] != 0.0 {
            return Err(TrackingError::config("intrinsic matrix must have last row [0, 0, 1]"));
        }
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)], width, height)
    }

    pub fn validate(&self) -> Result<(), TrackingError> {
        if !(self.fx.is_finite() && self.fx > 0.0 && self.fy.is_finite() && self.fy > 0.0) {
            return Err(TrackingError::config(format!(
                "focal lengths must be positive, got fx={} fy={}",
                self.fx, self.fy
            )));
        }
        if !(self.cx.is_finite() && self.cy.is_finite()) {
            return Err(TrackingError::config("principal point must be finite"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(TrackingError::config("image size must be non-zero"));
        }
        Ok(())
    }

    /// Intrinsic matrix K
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx,
            0.0, self.fy, self.cy,
            0.0, 0.0, 1.0,
        )
    }

    /// Project a camera-frame point to continuous image coordinates
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project_continuous(&self, p: &Vector3<f64>) -> Option<(f64, f64)> {
        if !(p.z > 0.0) || !p.x.is_finite() || !p.y.is_finite() {
            return None;
        }
        let u = self.fx * p.x / p.z + self.cx;
        let v = self.fy * p.y / p.z + self.cy;
        Some((u, v))
    }

    /// Project a camera-frame point to the pixel containing it
    ///
    /// Returns `None` when the point is behind the camera or outside the image.
    pub fn project(&self, p: &Vector3<f64>) -> Option<Pixel> {
        let (u, v) = self.project_continuous(p)?;
        if !(u >= 0.0 && v >= 0.0) {
            return None;
        }
        let (u, v) = (u.floor() as usize, v.floor() as usize);
        if u >= self.width || v >= self.height {
            return None;
        }
        Some(Pixel { u, v })
    }
}

/// Nearest observed depth per pixel
#[derive(Debug, Clone)]
pub struct DepthImage {
    width: usize,
    height: usize,
    /// Row-major depths [m], `f64::INFINITY` where nothing was observed
    depth: Vec<f64>,
}

impl DepthImage {
    /// Empty image with no observed depth
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            depth: vec![f64::INFINITY; width * height],
        }
    }

    /// Z-buffer of all finite points in front of the camera
    pub fn render<'a, I>(points: I, intrinsics: &CameraIntrinsics) -> Self
    where
        I: IntoIterator<Item = &'a Vector3<f64>>,
    {
        let mut image = Self::empty(intrinsics.width, intrinsics.height);
        for p in points {
            if !p.z.is_finite() {
                continue;
            }
            if let Some(px) = intrinsics.project(p) {
                let slot = &mut image.depth[px.v * image.width + px.u];
                if p.z < *slot {
                    *slot = p.z;
                }
            }
        }
        image
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Observed depth at a pixel, if any
    pub fn depth_at(&self, px: Pixel) -> Option<f64> {
        if px.u >= self.width || px.v >= self.height {
            return None;
        }
        let d = self.depth[px.v * self.width + px.u];
        d.is_finite().then_some(d)
    }

    /// Number of pixels holding a depth value
    pub fn coverage(&self) -> usize {
        self.depth.iter().filter(|d| d.is_finite()).count()
    }
}
