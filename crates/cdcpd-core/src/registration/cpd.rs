//! Coherent point drift engine
//!
//! Template vertices Y (M×3) are the centers of a Gaussian mixture that
//! generated the observed points X (N×3), plus a uniform outlier component
//! with weight w. The deformed template is TY = Y + G·W.
//!
//! E-step (visibility weighted):
//!
//! Pᵢⱼ = vᵢ exp(−‖xⱼ − TYᵢ‖² / 2σ²) / (Σₖ vₖ exp(−‖xⱼ − TYₖ‖² / 2σ²) + c)
//!
//! c = (2πσ²)^(D/2) · w / (1 − w) · M / N
//!
//! M-step (coherence + edge smoothness):
//!
//! (diag(P1) G + ασ² I + σ²λₖ L G) W = P X − diag(P1) Y
//!
//! σ² = (tr(Xᵀ diag(Pᵀ1) X) − 2 tr((P X)ᵀ TY) + tr(TYᵀ diag(P1) TY)) / (N_P · D)
//!
//! where L is the template Laplacian, so the σ²λₖ term penalizes
//! Σₑ ‖Δ_a − Δ_b‖² over edges for the displacement Δ = G W.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector, Vector3};
use tracing::debug;

use super::RegistrationConfig;
use crate::error::TrackingError;
use crate::math::{all_finite, gaussian_kernel, initial_sigma2, matrix_to_points, max_displacement, points_to_matrix};
use crate::template::Template;
use crate::DIM;

/// Result of one registration run
#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    /// Candidate vertex positions (not yet distance constrained)
    pub vertices: Vec<Vector3<f64>>,
    /// EM iterations performed
    pub iterations: usize,
    /// Whether the change tolerance was reached before the iteration cap
    pub converged: bool,
    /// Final mixture variance [m²]
    pub sigma2: f64,
}

/// Visibility-weighted coherent point drift
#[derive(Debug, Clone)]
pub struct CoherentPointDrift {
    config: RegistrationConfig,
    /// Template Laplacian (M×M)
    laplacian: DMatrix<f64>,
}

impl CoherentPointDrift {
    pub fn new(config: RegistrationConfig, template: &Template) -> Self {
        Self {
            config,
            laplacian: template.laplacian(),
        }
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    /// Register the vertices `start` to the observed `points`
    ///
    /// # Arguments
    /// * `points` - Preprocessed foreground points X
    /// * `visibility` - Per-vertex visibility weights in [0, 1]
    /// * `start` - Previous vertex estimate Y
    ///
    /// # Errors
    /// * `InsufficientObservation` when fewer than `min_points` points are given
    /// * `FullOcclusion` when every visibility weight is zero
    /// * `NumericDivergence` on a singular M-step or non-finite intermediates
    pub fn register(
        &self,
        points: &[Vector3<f64>],
        visibility: &DVector<f64>,
        start: &[Vector3<f64>],
    ) -> Result<RegistrationOutcome, TrackingError> {
        let cfg = &self.config;
        let n = points.len();
        let m = start.len();
        debug_assert_eq!(visibility.len(), m);
        debug_assert_eq!(self.laplacian.nrows(), m);

        if n < cfg.min_points {
            return Err(TrackingError::InsufficientObservation {
                found: n,
                required: cfg.min_points,
            });
        }
        if visibility.iter().all(|&v| !(v > 0.0)) {
            return Err(TrackingError::FullOcclusion);
        }

        let x = points_to_matrix(points);
        let y = points_to_matrix(start);
        let g = gaussian_kernel(start, cfg.beta);
        let lg = &self.laplacian * &g;

        // |x_j|² is constant over iterations
        let x_sq: Vec<f64> = points.iter().map(|p| p.norm_squared()).collect();

        let floor = cfg.sigma2_floor();
        let mut sigma2 = initial_sigma2(points, start) * cfg.initial_sigma_scale;
        if !(sigma2 > floor) {
            sigma2 = floor;
        }

        let mut ty: Vec<Vector3<f64>> = start.to_vec();
        let mut p = DMatrix::zeros(m, n);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < cfg.max_iterations {
            // === E-step ===
            let c = (2.0 * PI * sigma2).powf(DIM as f64 / 2.0) * cfg.outlier_weight
                / (1.0 - cfg.outlier_weight)
                * m as f64
                / n as f64;
            let inv_two_sigma2 = 1.0 / (2.0 * sigma2);

            for (j, xj) in points.iter().enumerate() {
                let mut den = 0.0;
                for (i, tyi) in ty.iter().enumerate() {
                    let value = visibility[i] * (-(xj - tyi).norm_squared() * inv_two_sigma2).exp();
                    p[(i, j)] = value;
                    den += value;
                }
                den += c;
                if den > 0.0 {
                    for i in 0..m {
                        p[(i, j)] /= den;
                    }
                }
            }
            if !all_finite(&p) {
                return Err(self.diverged(iterations, "E-step"));
            }

            // Responsibility marginals
            let p1 = DVector::from_iterator(m, (0..m).map(|i| p.row(i).sum()));
            let pt1 = DVector::from_iterator(n, (0..n).map(|j| p.column(j).sum()));
            let np = p1.sum();
            if !(np > 0.0) {
                return Err(self.diverged(iterations, "E-step"));
            }

            // === M-step ===
            let lambda_k = cfg.lambda * cfg.lambda_annealing.powi(iterations as i32 + 1);
            let px = &p * &x;

            let mut a = DMatrix::from_fn(m, m, |i, k| p1[i] * g[(i, k)]);
            a += &lg * (sigma2 * lambda_k);
            for i in 0..m {
                a[(i, i)] += cfg.alpha * sigma2;
            }
            let b = DMatrix::from_fn(m, DIM, |i, d| px[(i, d)] - p1[i] * y[(i, d)]);

            let w = a
                .lu()
                .solve(&b)
                .ok_or_else(|| self.diverged(iterations, "M-step"))?;
            let ty_mat = &y + &g * &w;
            if !all_finite(&ty_mat) {
                return Err(self.diverged(iterations, "M-step"));
            }
            let ty_next = matrix_to_points(&ty_mat);

            // === Variance update ===
            let x_px: f64 = pt1.iter().zip(x_sq.iter()).map(|(w, s)| w * s).sum();
            let y_py: f64 = p1
                .iter()
                .zip(ty_next.iter())
                .map(|(w, v)| w * v.norm_squared())
                .sum();
            let tr_pxy = ty_mat.component_mul(&px).sum();
            sigma2 = (x_px - 2.0 * tr_pxy + y_py) / (np * DIM as f64);
            if !sigma2.is_finite() {
                return Err(self.diverged(iterations, "variance update"));
            }
            if sigma2 <= floor {
                sigma2 = floor;
            }

            let change = max_displacement(&ty, &ty_next);
            ty = ty_next;
            iterations += 1;

            if change < cfg.tolerance {
                converged = true;
                break;
            }
        }

        debug!(
            "CPD: {} points, {} vertices, {} iterations, sigma2={:.3e}, converged={}",
            n, m, iterations, sigma2, converged
        );

        Ok(RegistrationOutcome {
            vertices: ty,
            iterations,
            converged,
            sigma2,
        })
    }

    fn diverged(&self, iteration: usize, stage: &'static str) -> TrackingError {
        TrackingError::NumericDivergence { iteration, stage }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn engine(template: &Template) -> CoherentPointDrift {
        CoherentPointDrift::new(RegistrationConfig::default(), template)
    }

    fn translated(points: &[Vector3<f64>], t: Vector3<f64>) -> Vec<Vector3<f64>> {
        points.iter().map(|p| p + t).collect()
    }

    #[test]
    fn test_recovers_translation() {
        let template = Template::line(1.0, 5).unwrap();
        let start = template.rest_positions();
        let offset = Vector3::new(0.1, 0.0, 0.0);
        let target = translated(start, offset);
        let visibility = DVector::from_element(5, 1.0);

        let outcome = engine(&template).register(&target, &visibility, start).unwrap();

        for (v, t) in outcome.vertices.iter().zip(target.iter()) {
            assert!((v - t).norm() < 0.01, "vertex {:?} far from {:?}", v, t);
        }
    }

    #[test]
    fn test_identity_observation_stays_put() {
        let template = Template::line(1.0, 8).unwrap();
        let start = template.rest_positions();
        let visibility = DVector::from_element(8, 1.0);

        let outcome = engine(&template).register(start, &visibility, start).unwrap();
        for (v, s) in outcome.vertices.iter().zip(start.iter()) {
            assert_relative_eq!(v, s, epsilon = 5e-3);
        }
    }

    #[test]
    fn test_too_few_points() {
        let template = Template::line(1.0, 5).unwrap();
        let visibility = DVector::from_element(5, 1.0);
        let err = engine(&template)
            .register(&[Vector3::zeros()], &visibility, template.rest_positions())
            .unwrap_err();
        assert_eq!(err, TrackingError::InsufficientObservation { found: 1, required: 2 });

        let err = engine(&template)
            .register(&[], &visibility, template.rest_positions())
            .unwrap_err();
        assert_eq!(err, TrackingError::InsufficientObservation { found: 0, required: 2 });
    }

    #[test]
    fn test_full_occlusion() {
        let template = Template::line(1.0, 5).unwrap();
        let visibility = DVector::zeros(5);
        let err = engine(&template)
            .register(template.rest_positions(), &visibility, template.rest_positions())
            .unwrap_err();
        assert_eq!(err, TrackingError::FullOcclusion);
    }

    #[test]
    fn test_non_finite_input_diverges() {
        let template = Template::line(1.0, 5).unwrap();
        let visibility = DVector::from_element(5, 1.0);
        let points = vec![Vector3::new(f64::NAN, 0.0, 0.0), Vector3::new(0.5, 0.0, 0.0)];
        let err = engine(&template)
            .register(&points, &visibility, template.rest_positions())
            .unwrap_err();
        assert!(matches!(err, TrackingError::NumericDivergence { iteration: 0, .. }));
    }

    #[test]
    fn test_occluded_vertices_are_not_pulled() {
        let template = Template::line(1.0, 5).unwrap();
        let start = template.rest_positions();
        // Spurious points sit right next to vertex 4, which is marked occluded
        let points = vec![
            start[0],
            start[1],
            start[2],
            start[3],
            start[4] + Vector3::new(0.0, 0.05, 0.0),
            start[4] + Vector3::new(0.0, 0.06, 0.0),
        ];
        let open = DVector::from_element(5, 1.0);
        let mut hidden = open.clone();
        hidden[4] = 0.0;

        let cpd = engine(&template);
        let pulled = cpd.register(&points, &open, start).unwrap();
        let shielded = cpd.register(&points, &hidden, start).unwrap();

        let pull_open = (pulled.vertices[4] - start[4]).y;
        let pull_hidden = (shielded.vertices[4] - start[4]).y;
        assert!(pull_hidden < pull_open);
    }

    #[test]
    fn test_deterministic() {
        let template = Template::line(1.0, 10).unwrap();
        let start = template.rest_positions();
        let points: Vec<Vector3<f64>> = (0..30)
            .map(|i| {
                let s = i as f64 / 29.0;
                Vector3::new(s, 0.1 * (3.0 * s).sin(), 0.02 * s)
            })
            .collect();
        let visibility = DVector::from_element(10, 1.0);

        let cpd = engine(&template);
        let a = cpd.register(&points, &visibility, start).unwrap();
        let b = cpd.register(&points, &visibility, start).unwrap();
        assert_eq!(a.iterations, b.iterations);
        for (p, q) in a.vertices.iter().zip(b.vertices.iter()) {
            assert_eq!(p, q);
        }
    }
}
