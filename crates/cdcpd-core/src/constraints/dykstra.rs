//! Dykstra's alternating projections
//!
//! The feasible set is the intersection of one convex set per edge
//! (‖y_a − y_b‖ ≤ r) and the affine anchor set. Plain cyclic projection
//! only finds *a* feasible point; Dykstra's correction terms qᵢ make the
//! iteration converge to the Euclidean projection of the candidate:
//!
//! z = x + qᵢ,   x ← Pᵢ(z),   qᵢ ← z − x
//!
//! Edge sets are targeted at rest + ε/2 so that an iterate that has not
//! fully settled still satisfies rest + ε.

use nalgebra::Vector3;

use super::{ProjectionProblem, ProjectionSolution, ProjectionSolver};
use crate::error::TrackingError;
use crate::math::max_displacement;

/// Default [`ProjectionSolver`]
#[derive(Debug, Clone, Copy)]
pub struct DykstraSolver {
    /// Maximum full sweeps over all constraint sets
    pub max_iterations: usize,
    /// Convergence tolerance on the per-sweep change [m]
    pub tolerance: f64,
}

impl DykstraSolver {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
        }
    }
}

impl ProjectionSolver for DykstraSolver {
    fn solve(&self, problem: &ProjectionProblem<'_>) -> Result<ProjectionSolution, TrackingError> {
        let edges = problem.template.edges();
        let slack = problem.epsilon * 0.5;

        let mut x = problem.candidate.to_vec();
        let mut edge_corrections = vec![(Vector3::zeros(), Vector3::zeros()); edges.len()];
        let mut anchor_corrections = vec![Vector3::zeros(); problem.anchors.len()];

        for iteration in 1..=self.max_iterations {
            let previous = x.clone();

            for (edge, q) in edges.iter().zip(edge_corrections.iter_mut()) {
                let za = x[edge.a] + q.0;
                let zb = x[edge.b] + q.1;
                let (pa, pb) = project_edge(&za, &zb, edge.rest_length + slack);
                *q = (za - pa, zb - pb);
                x[edge.a] = pa;
                x[edge.b] = pb;
            }

            for (anchor, q) in problem.anchors.iter().zip(anchor_corrections.iter_mut()) {
                let z = x[anchor.index] + *q;
                x[anchor.index] = anchor.position;
                *q = z - anchor.position;
            }

            let change = max_displacement(&previous, &x);
            if !change.is_finite() {
                return Err(TrackingError::ConstraintInfeasible {
                    iterations: iteration,
                    max_violation: f64::NAN,
                });
            }
            if change < self.tolerance && problem.template.max_violation(&x, problem.epsilon) <= 0.0 {
                return Ok(ProjectionSolution {
                    vertices: x,
                    iterations: iteration,
                });
            }
        }

        Err(TrackingError::ConstraintInfeasible {
            iterations: self.max_iterations,
            max_violation: problem.template.max_violation(&x, problem.epsilon),
        })
    }
}

/// Project a pair of points onto ‖a − b‖ ≤ bound
///
/// Both ends move symmetrically toward their midpoint. Coincident points
/// are already feasible.
fn project_edge(a: &Vector3<f64>, b: &Vector3<f64>, bound: f64) -> (Vector3<f64>, Vector3<f64>) {
    let d = b - a;
    let length = d.norm();
    if length <= bound {
        return (*a, *b);
    }
    let mid = (a + b) * 0.5;
    let half = d * (bound / (2.0 * length));
    (mid - half, mid + half)
}
