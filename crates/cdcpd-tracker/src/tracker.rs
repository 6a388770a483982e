//! Tracking step loop
//!
//! The tracker owns its configuration, the template and the running vertex
//! estimate. A step either completes (possibly degraded) and replaces the
//! estimate, or aborts and leaves it untouched.

use nalgebra::Vector3;
use tracing::{debug, info, warn};

use cdcpd_core::camera::CameraIntrinsics;
use cdcpd_core::cloud::Observation;
use cdcpd_core::constraints::{
    DistanceConstrainedOptimizer, DykstraSolver, OptimizerStatus, ProjectionSolver,
};
use cdcpd_core::registration::CoherentPointDrift;
use cdcpd_core::template::Template;
use cdcpd_core::visibility::VisibilityPrior;
use cdcpd_core::TrackingError;

use crate::config::TrackerConfig;
use crate::result::{StepDiagnostics, StepResult, StepStatus, TrackerStats};

/// Deformable object tracker
pub struct Tracker {
    config: TrackerConfig,
    template: Template,
    prior: VisibilityPrior,
    registration: CoherentPointDrift,
    optimizer: DistanceConstrainedOptimizer,
    /// Current vertex estimate, the only state carried between frames
    estimate: Vec<Vector3<f64>>,
    stats: TrackerStats,
}

impl Tracker {
    /// Tracker for the straight chain described by `config.template`
    pub fn new(config: TrackerConfig, intrinsics: CameraIntrinsics) -> Result<Self, TrackingError> {
        let solver = DykstraSolver::new(config.optimizer.max_iterations, config.optimizer.tolerance);
        Self::with_solver(config, intrinsics, Box::new(solver))
    }

    /// Tracker using a custom constraint solver
    pub fn with_solver(
        config: TrackerConfig,
        intrinsics: CameraIntrinsics,
        solver: Box<dyn ProjectionSolver>,
    ) -> Result<Self, TrackingError> {
        let template = config.template.build()?;
        Self::assemble(config, template, intrinsics, solver)
    }

    /// Tracker for an arbitrary template graph
    ///
    /// `config.template` is ignored.
    pub fn with_template(
        config: TrackerConfig,
        template: Template,
        intrinsics: CameraIntrinsics,
    ) -> Result<Self, TrackingError> {
        let solver = DykstraSolver::new(config.optimizer.max_iterations, config.optimizer.tolerance);
        Self::assemble(config, template, intrinsics, Box::new(solver))
    }

    fn assemble(
        config: TrackerConfig,
        template: Template,
        intrinsics: CameraIntrinsics,
        solver: Box<dyn ProjectionSolver>,
    ) -> Result<Self, TrackingError> {
        config.validate_for(template.num_vertices())?;
        intrinsics.validate()?;

        let prior = VisibilityPrior::new(intrinsics, config.visibility.clone());
        let registration = CoherentPointDrift::new(config.registration.clone(), &template);
        let optimizer =
            DistanceConstrainedOptimizer::with_solver(config.optimizer.clone(), template.clone(), solver)?;
        let estimate = template.rest_positions().to_vec();

        info!(
            "Tracker ready: {} vertices, {} edges, rest length {:.3} m",
            template.num_vertices(),
            template.edges().len(),
            template.total_rest_length()
        );

        Ok(Self {
            config,
            template,
            prior,
            registration,
            optimizer,
            estimate,
            stats: TrackerStats::default(),
        })
    }

    /// Process one frame
    ///
    /// Runs visibility prior, registration and constraint projection. On an
    /// aborted frame the previous estimate is returned unchanged with
    /// [`StepStatus::Skipped`].
    pub fn step(&mut self, observation: &Observation) -> StepResult {
        self.stats.frames_processed += 1;

        let points = self.config.preprocess.apply(observation, &self.estimate);
        let weights = self.prior.weights(&self.estimate, observation);
        let mut diagnostics = StepDiagnostics {
            foreground_points: points.len(),
            visibility: weights.iter().copied().collect(),
            ..Default::default()
        };

        let registered = match self.registration.register(&points, &weights, &self.estimate) {
            Ok(outcome) => outcome,
            Err(e) => return self.skip(e, diagnostics),
        };
        diagnostics.em_iterations = registered.iterations;
        diagnostics.em_converged = registered.converged;
        diagnostics.sigma2 = Some(registered.sigma2);

        let projected = self.optimizer.project(&registered.vertices);
        let status = match projected.status {
            OptimizerStatus::Solved { iterations } => {
                diagnostics.optimizer_iterations = Some(iterations);
                self.stats.frames_tracked += 1;
                StepStatus::Tracked
            }
            OptimizerStatus::Corrected { cause, corrected_edges, .. } => {
                diagnostics.corrected_edges = corrected_edges;
                self.stats.frames_degraded += 1;
                StepStatus::Degraded(cause)
            }
        };
        self.estimate = projected.vertices;

        debug!(
            "Frame {}: {} points, {} EM iterations, status {:?}",
            self.stats.frames_processed, diagnostics.foreground_points, diagnostics.em_iterations, status
        );

        StepResult {
            vertices: self.estimate.clone(),
            status,
            diagnostics,
        }
    }

    fn skip(&mut self, error: TrackingError, diagnostics: StepDiagnostics) -> StepResult {
        self.stats.frames_skipped += 1;
        match &error {
            TrackingError::NumericDivergence { .. } => warn!("Frame {} aborted: {}", self.stats.frames_processed, error),
            _ => debug!("Frame {} skipped: {}", self.stats.frames_processed, error),
        }
        StepResult {
            vertices: self.estimate.clone(),
            status: StepStatus::Skipped(error),
            diagnostics,
        }
    }

    /// Reinitialize the estimate to the template's rest configuration
    pub fn reset(&mut self) {
        self.estimate = self.template.rest_positions().to_vec();
        info!("Tracker reset to rest configuration");
    }

    /// Current vertex estimate
    pub fn estimate(&self) -> &[Vector3<f64>] {
        &self.estimate
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> CameraIntrinsics {
        CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0, 640, 480).unwrap()
    }

    fn small_config() -> TrackerConfig {
        let mut config = TrackerConfig::default();
        config.template.num_vertices = 6;
        config.template.length = 0.5;
        config.template.origin = Vector3::new(-0.25, 0.0, 1.0);
        config.preprocess.voxel_leaf_size = None;
        config
    }

    #[test]
    fn test_starts_at_rest() {
        let tracker = Tracker::new(small_config(), camera()).unwrap();
        assert_eq!(tracker.estimate(), tracker.template().rest_positions());
        assert_eq!(tracker.stats(), TrackerStats::default());
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let mut config = small_config();
        config.template.num_vertices = 1;
        assert!(matches!(
            Tracker::new(config, camera()),
            Err(TrackingError::Configuration(_))
        ));
    }

    #[test]
    fn test_empty_observation_is_skipped() {
        let mut tracker = Tracker::new(small_config(), camera()).unwrap();
        let before = tracker.estimate().to_vec();
        let result = tracker.step(&Observation::empty());
        assert_eq!(
            result.status,
            StepStatus::Skipped(TrackingError::InsufficientObservation { found: 0, required: 2 })
        );
        assert_eq!(result.vertices, before);
        assert_eq!(tracker.estimate(), &before[..]);
        assert_eq!(tracker.stats().frames_skipped, 1);
    }

    #[test]
    fn test_background_only_is_skipped() {
        let mut tracker = Tracker::new(small_config(), camera()).unwrap();
        let points = tracker.template().rest_positions().to_vec();
        let mask = vec![false; points.len()];
        let result = tracker.step(&Observation::new(points, mask).unwrap());
        assert!(result.status.is_skipped());
        assert_eq!(result.diagnostics.foreground_points, 0);
    }

    #[test]
    fn test_reset_restores_rest_configuration() {
        let mut tracker = Tracker::new(small_config(), camera()).unwrap();
        let shifted: Vec<Vector3<f64>> = tracker
            .template()
            .rest_positions()
            .iter()
            .map(|v| v + Vector3::new(0.0, 0.05, 0.0))
            .collect();
        let result = tracker.step(&Observation::all_foreground(shifted));
        assert!(result.status.updated_estimate());
        assert_ne!(tracker.estimate(), tracker.template().rest_positions());

        tracker.reset();
        assert_eq!(tracker.estimate(), tracker.template().rest_positions());
    }
}
