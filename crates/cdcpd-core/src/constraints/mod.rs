//! Distance-constrained optimization
//!
//! Projects a registration candidate Ŷ onto the configurations of an
//! inextensible but freely bendable linkage:
//!
//! minimize    Σᵢ ‖yᵢ − ŷᵢ‖²
//! subject to  ‖y_a − y_b‖ ≤ d_ab + ε     for every edge (a, b)
//!             y_k = p_k                  for every anchor k
//!
//! Each edge constraint is a convex (second-order cone) set, so the problem
//! is a convex projection. The rest configuration is always feasible
//! without anchors.
//!
//! - [`dykstra`]: default solver (Dykstra's alternating projections)
//! - [`correction`]: local-correction fallback used when a solve fails

pub mod correction;
pub mod dykstra;

pub use correction::*;
pub use dykstra::*;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::TrackingError;
use crate::template::Template;

/// A vertex pinned to a fixed position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// Template vertex index
    pub index: usize,
    /// Fixed position [m]
    pub position: Vector3<f64>,
}

/// Optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Stretch tolerance ε on every edge [m]
    pub epsilon: f64,
    /// Maximum solver sweeps
    pub max_iterations: usize,
    /// Convergence tolerance on the per-sweep change [m]
    pub tolerance: f64,
    /// Anchored vertices
    pub anchors: Vec<Anchor>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-3,
            max_iterations: 10_000,
            tolerance: 1e-6,
            anchors: Vec::new(),
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self, num_vertices: usize) -> Result<(), TrackingError> {
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(TrackingError::config(format!("epsilon must be positive, got {}", self.epsilon)));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(TrackingError::config(format!(
                "optimizer tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(TrackingError::config("optimizer max_iterations must be at least 1"));
        }
        let mut seen = vec![false; num_vertices];
        for anchor in &self.anchors {
            if anchor.index >= num_vertices {
                return Err(TrackingError::config(format!(
                    "anchor index {} outside 0..{}",
                    anchor.index, num_vertices
                )));
            }
            if std::mem::replace(&mut seen[anchor.index], true) {
                return Err(TrackingError::config(format!("vertex {} anchored twice", anchor.index)));
            }
            if !anchor.position.iter().all(|c| c.is_finite()) {
                return Err(TrackingError::config(format!(
                    "anchor {} has a non-finite position",
                    anchor.index
                )));
            }
        }
        Ok(())
    }

    /// Indices of anchored vertices
    pub fn anchor_indices(&self) -> Vec<usize> {
        self.anchors.iter().map(|a| a.index).collect()
    }
}

/// A constrained projection handed to a solver
#[derive(Debug, Clone, Copy)]
pub struct ProjectionProblem<'a> {
    pub template: &'a Template,
    /// Raw candidate Ŷ from registration
    pub candidate: &'a [Vector3<f64>],
    pub anchors: &'a [Anchor],
    /// Stretch tolerance ε [m]
    pub epsilon: f64,
}

/// Solver output
#[derive(Debug, Clone)]
pub struct ProjectionSolution {
    pub vertices: Vec<Vector3<f64>>,
    pub iterations: usize,
}

/// Solver for [`ProjectionProblem`]s
///
/// Implementations report non-convergence and infeasibility as
/// `TrackingError::ConstraintInfeasible`.
pub trait ProjectionSolver: Send {
    fn solve(&self, problem: &ProjectionProblem<'_>) -> Result<ProjectionSolution, TrackingError>;
}

/// How the optimizer produced its output
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizerStatus {
    /// The solver converged to a feasible configuration
    Solved { iterations: usize },
    /// The solver failed; the local-correction fallback was applied
    Corrected {
        cause: TrackingError,
        corrected_edges: usize,
        residual_violation: f64,
    },
}

/// Optimizer result
#[derive(Debug, Clone)]
pub struct OptimizerOutcome {
    pub vertices: Vec<Vector3<f64>>,
    pub status: OptimizerStatus,
}

impl OptimizerOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, OptimizerStatus::Corrected { .. })
    }
}

/// Distance-constrained optimizer with a local-correction fallback
pub struct DistanceConstrainedOptimizer {
    config: OptimizerConfig,
    template: Template,
    solver: Box<dyn ProjectionSolver>,
    /// Edge visiting order of the fallback
    correction_order: Vec<usize>,
}

impl DistanceConstrainedOptimizer {
    /// Optimizer using the default [`DykstraSolver`]
    pub fn new(config: OptimizerConfig, template: Template) -> Result<Self, TrackingError> {
        let solver = DykstraSolver::new(config.max_iterations, config.tolerance);
        Self::with_solver(config, template, Box::new(solver))
    }

    /// Optimizer with a custom solver
    pub fn with_solver(
        config: OptimizerConfig,
        template: Template,
        solver: Box<dyn ProjectionSolver>,
    ) -> Result<Self, TrackingError> {
        config.validate(template.num_vertices())?;
        let correction_order = correction_order(&template, &config.anchor_indices());
        Ok(Self {
            config,
            template,
            solver,
            correction_order,
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Project a raw candidate onto the constraint set
    ///
    /// Never fails: solver failures fall back to local correction and are
    /// reported through [`OptimizerStatus::Corrected`].
    pub fn project(&self, candidate: &[Vector3<f64>]) -> OptimizerOutcome {
        let problem = ProjectionProblem {
            template: &self.template,
            candidate,
            anchors: &self.config.anchors,
            epsilon: self.config.epsilon,
        };

        let cause = match self.solver.solve(&problem) {
            Ok(solution) => match self.check(&solution) {
                Ok(()) => {
                    debug!("Constraint projection converged in {} iterations", solution.iterations);
                    return OptimizerOutcome {
                        vertices: solution.vertices,
                        status: OptimizerStatus::Solved {
                            iterations: solution.iterations,
                        },
                    };
                }
                Err(e) => e,
            },
            Err(e) => e,
        };

        let report = local_correction(
            &self.template,
            candidate,
            &self.config.anchors,
            self.config.epsilon,
            &self.correction_order,
        );
        warn!(
            "Constraint solve failed ({}); local correction moved {} vertices, residual violation {:.3e} m",
            cause, report.corrected_edges, report.residual_violation
        );

        OptimizerOutcome {
            vertices: report.vertices,
            status: OptimizerStatus::Corrected {
                cause,
                corrected_edges: report.corrected_edges,
                residual_violation: report.residual_violation,
            },
        }
    }

    /// Reject solutions that do not actually satisfy the constraints
    fn check(&self, solution: &ProjectionSolution) -> Result<(), TrackingError> {
        let infeasible = |max_violation| TrackingError::ConstraintInfeasible {
            iterations: solution.iterations,
            max_violation,
        };
        if solution.vertices.len() != self.template.num_vertices()
            || solution.vertices.iter().any(|v| !v.iter().all(|c| c.is_finite()))
        {
            return Err(infeasible(f64::NAN));
        }
        let violation = self.template.max_violation(&solution.vertices, self.config.epsilon);
        if violation > 0.0 {
            return Err(infeasible(violation));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct FailingSolver;

    impl ProjectionSolver for FailingSolver {
        fn solve(&self, _problem: &ProjectionProblem<'_>) -> Result<ProjectionSolution, TrackingError> {
            Err(TrackingError::ConstraintInfeasible {
                iterations: 0,
                max_violation: f64::INFINITY,
            })
        }
    }

    /// Claims success but returns the stretched candidate untouched
    struct LyingSolver;

    impl ProjectionSolver for LyingSolver {
        fn solve(&self, problem: &ProjectionProblem<'_>) -> Result<ProjectionSolution, TrackingError> {
            Ok(ProjectionSolution {
                vertices: problem.candidate.to_vec(),
                iterations: 1,
            })
        }
    }

    fn stretched(template: &Template, factor: f64) -> Vec<Vector3<f64>> {
        template.rest_positions().iter().map(|v| v * factor).collect()
    }

    #[test]
    fn test_feasible_candidate_is_unchanged() {
        let template = Template::line(1.0, 6).unwrap();
        let optimizer = DistanceConstrainedOptimizer::new(OptimizerConfig::default(), template.clone()).unwrap();
        // Compressed chains are feasible
        let candidate = stretched(&template, 0.5);
        let outcome = optimizer.project(&candidate);
        assert!(!outcome.is_degraded());
        for (v, c) in outcome.vertices.iter().zip(candidate.iter()) {
            assert_relative_eq!(v, c, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_stretched_candidate_is_projected() {
        let template = Template::line(1.0, 6).unwrap();
        let config = OptimizerConfig::default();
        let optimizer = DistanceConstrainedOptimizer::new(config.clone(), template.clone()).unwrap();
        let candidate = stretched(&template, 1.2);
        let outcome = optimizer.project(&candidate);
        assert!(!outcome.is_degraded(), "{:?}", outcome.status);
        for e in template.edges() {
            assert!(e.length_in(&outcome.vertices) <= e.rest_length + config.epsilon);
        }
        // Symmetric stretch about x = 0.6 shrinks symmetrically
        let mid = (outcome.vertices[0] + outcome.vertices[5]) / 2.0;
        assert_relative_eq!(mid.x, 0.6, epsilon = 1e-3);
    }

    #[test]
    fn test_anchor_is_respected() {
        let template = Template::line(1.0, 5).unwrap();
        let anchor = Anchor {
            index: 0,
            position: Vector3::new(0.0, 0.0, 0.0),
        };
        let config = OptimizerConfig {
            anchors: vec![anchor],
            ..Default::default()
        };
        let optimizer = DistanceConstrainedOptimizer::new(config.clone(), template.clone()).unwrap();
        let candidate: Vec<Vector3<f64>> = template
            .rest_positions()
            .iter()
            .map(|v| v + Vector3::new(0.3, 0.0, 0.0))
            .collect();
        let outcome = optimizer.project(&candidate);
        assert!(!outcome.is_degraded(), "{:?}", outcome.status);
        assert_relative_eq!(outcome.vertices[0], anchor.position, epsilon = 1e-12);
        for e in template.edges() {
            assert!(e.length_in(&outcome.vertices) <= e.rest_length + config.epsilon);
        }
    }

    #[test]
    fn test_failed_solve_falls_back() {
        let template = Template::line(1.0, 5).unwrap();
        let config = OptimizerConfig::default();
        let optimizer =
            DistanceConstrainedOptimizer::with_solver(config.clone(), template.clone(), Box::new(FailingSolver))
                .unwrap();
        let outcome = optimizer.project(&stretched(&template, 2.0));
        match &outcome.status {
            OptimizerStatus::Corrected { corrected_edges, residual_violation, .. } => {
                assert_eq!(*corrected_edges, 4);
                assert_relative_eq!(*residual_violation, 0.0);
            }
            other => panic!("expected fallback, got {:?}", other),
        }
        for e in template.edges() {
            assert!(e.length_in(&outcome.vertices) <= e.rest_length + config.epsilon);
        }
    }

    #[test]
    fn test_infeasible_solution_is_rejected() {
        let template = Template::line(1.0, 5).unwrap();
        let optimizer = DistanceConstrainedOptimizer::with_solver(
            OptimizerConfig::default(),
            template.clone(),
            Box::new(LyingSolver),
        )
        .unwrap();
        let outcome = optimizer.project(&stretched(&template, 1.5));
        assert!(outcome.is_degraded());
    }

    #[test]
    fn test_invalid_config() {
        let bad_eps = OptimizerConfig {
            epsilon: 0.0,
            ..Default::default()
        };
        assert!(bad_eps.validate(5).is_err());

        let out_of_range = OptimizerConfig {
            anchors: vec![Anchor { index: 5, position: Vector3::zeros() }],
            ..Default::default()
        };
        assert!(out_of_range.validate(5).is_err());

        let twice = OptimizerConfig {
            anchors: vec![
                Anchor { index: 1, position: Vector3::zeros() },
                Anchor { index: 1, position: Vector3::x() },
            ],
            ..Default::default()
        };
        assert!(twice.validate(5).is_err());
    }
}
