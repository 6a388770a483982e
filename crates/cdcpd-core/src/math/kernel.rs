//! Gaussian kernels and mixture helpers
//!
//! Coherence kernel over template vertices (Eq. of motion coherence):
//!
//! Gᵢₖ = exp(−‖yᵢ − yₖ‖² / (2β²))
//!
//! Initial isotropic variance of the mixture:
//!
//! σ₀² = Σᵢ Σⱼ ‖xⱼ − yᵢ‖² / (M · N · D)

use nalgebra::{DMatrix, Vector3};

use crate::DIM;

/// Stack points as rows of an N×3 matrix
pub fn points_to_matrix(points: &[Vector3<f64>]) -> DMatrix<f64> {
    DMatrix::from_fn(points.len(), DIM, |i, j| points[i][j])
}

/// Rows of an N×3 matrix as points
pub fn matrix_to_points(m: &DMatrix<f64>) -> Vec<Vector3<f64>> {
    (0..m.nrows())
        .map(|i| Vector3::new(m[(i, 0)], m[(i, 1)], m[(i, 2)]))
        .collect()
}

/// Gaussian affinity between every pair of points, with width `beta`
pub fn gaussian_kernel(points: &[Vector3<f64>], beta: f64) -> DMatrix<f64> {
    let m = points.len();
    let scale = 1.0 / (2.0 * beta * beta);
    let mut g = DMatrix::zeros(m, m);
    for i in 0..m {
        g[(i, i)] = 1.0;
        for k in (i + 1)..m {
            let value = (-(points[i] - points[k]).norm_squared() * scale).exp();
            g[(i, k)] = value;
            g[(k, i)] = value;
        }
    }
    g
}

/// Mean squared distance between two point sets, per dimension
pub fn initial_sigma2(x: &[Vector3<f64>], y: &[Vector3<f64>]) -> f64 {
    if x.is_empty() || y.is_empty() {
        return 0.0;
    }
    let total: f64 = y
        .iter()
        .map(|yi| x.iter().map(|xj| (xj - yi).norm_squared()).sum::<f64>())
        .sum();
    total / (x.len() * y.len() * DIM) as f64
}

/// Largest per-point displacement between two configurations
pub fn max_displacement(a: &[Vector3<f64>], b: &[Vector3<f64>]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(p, q)| (p - q).norm())
        .fold(0.0, f64::max)
}

/// Whether every entry of the matrix is finite
pub fn all_finite(m: &DMatrix<f64>) -> bool {
    m.iter().all(|v| v.is_finite())
}
