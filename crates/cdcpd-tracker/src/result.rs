//! Per-frame results and diagnostics
//!
//! Every call to [`Tracker::step`](crate::Tracker::step) returns the current
//! estimate together with a status, so skipped and degraded frames are
//! always visible to the caller.

use nalgebra::Vector3;

use cdcpd_core::TrackingError;

/// Outcome of one frame
#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    /// Registration and constraint projection both succeeded
    Tracked,
    /// The constraint solve failed and the local correction was applied;
    /// the estimate was still updated
    Degraded(TrackingError),
    /// The frame was aborted; the previous estimate is returned unchanged
    Skipped(TrackingError),
}

impl StepStatus {
    pub fn is_tracked(&self) -> bool {
        matches!(self, StepStatus::Tracked)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, StepStatus::Degraded(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StepStatus::Skipped(_))
    }

    /// Whether the estimate changed this frame
    pub fn updated_estimate(&self) -> bool {
        !self.is_skipped()
    }

    /// Condition reported alongside the estimate, if any
    pub fn error(&self) -> Option<&TrackingError> {
        match self {
            StepStatus::Tracked => None,
            StepStatus::Degraded(e) | StepStatus::Skipped(e) => Some(e),
        }
    }
}

/// Diagnostics for a single frame
#[derive(Debug, Clone, Default)]
pub struct StepDiagnostics {
    /// Points left after masking, cropping and downsampling
    pub foreground_points: usize,
    /// Per-vertex visibility weights used by the E-step
    pub visibility: Vec<f64>,
    /// EM iterations run
    pub em_iterations: usize,
    /// Whether EM reached its tolerance
    pub em_converged: bool,
    /// Final mixture variance [m²]
    pub sigma2: Option<f64>,
    /// Iterations of the constraint solver when it succeeded
    pub optimizer_iterations: Option<usize>,
    /// Edges repaired by the local correction
    pub corrected_edges: usize,
}

/// Result of one tracking step
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Vertex estimate after this frame (template order)
    pub vertices: Vec<Vector3<f64>>,
    pub status: StepStatus,
    pub diagnostics: StepDiagnostics,
}

/// Running frame counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackerStats {
    /// Frames passed to `step`
    pub frames_processed: usize,
    /// Frames fully tracked
    pub frames_tracked: usize,
    /// Frames that needed the local correction
    pub frames_degraded: usize,
    /// Frames aborted without updating the estimate
    pub frames_skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_accessors() {
        assert!(StepStatus::Tracked.is_tracked());
        assert!(StepStatus::Tracked.error().is_none());

        let skipped = StepStatus::Skipped(TrackingError::FullOcclusion);
        assert!(skipped.is_skipped());
        assert!(!skipped.updated_estimate());
        assert_eq!(skipped.error(), Some(&TrackingError::FullOcclusion));

        let degraded = StepStatus::Degraded(TrackingError::ConstraintInfeasible {
            iterations: 10,
            max_violation: 0.2,
        });
        assert!(degraded.is_degraded());
        assert!(degraded.updated_estimate());
    }
}
