//! Tracker configuration
//!
//! Groups the per-component parameter sets. A configuration is validated
//! once when the tracker is built and is immutable afterwards.

use serde::{Deserialize, Serialize};

use cdcpd_core::cloud::PreprocessConfig;
use cdcpd_core::constraints::OptimizerConfig;
use cdcpd_core::registration::RegistrationConfig;
use cdcpd_core::template::TemplateConfig;
use cdcpd_core::visibility::VisibilityConfig;
use cdcpd_core::TrackingError;

/// Main tracker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Straight-chain template layout
    pub template: TemplateConfig,
    /// Foreground cropping and downsampling
    pub preprocess: PreprocessConfig,
    /// Occlusion weighting
    pub visibility: VisibilityConfig,
    /// Coherent point drift parameters
    pub registration: RegistrationConfig,
    /// Edge-length projection and anchors
    pub optimizer: OptimizerConfig,
}

impl TrackerConfig {
    /// Validate every group against a template with `num_vertices` vertices
    pub fn validate_for(&self, num_vertices: usize) -> Result<(), TrackingError> {
        self.preprocess.validate()?;
        self.visibility.validate()?;
        self.registration.validate()?;
        self.optimizer.validate(num_vertices)
    }

    /// Validate every group, including the template layout
    pub fn validate(&self) -> Result<(), TrackingError> {
        self.template.validate()?;
        self.validate_for(self.template.num_vertices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdcpd_core::constraints::Anchor;
    use nalgebra::Vector3;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TrackerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_template_errors_are_fatal() {
        let mut config = TrackerConfig::default();
        config.template.num_vertices = 1;
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());

        let mut config = TrackerConfig::default();
        config.template.length = 0.0;
        assert!(config.validate().unwrap_err().is_fatal());
    }

    #[test]
    fn test_anchor_checked_against_template() {
        let mut config = TrackerConfig::default();
        config.template.num_vertices = 10;
        config.optimizer.anchors.push(Anchor {
            index: 10,
            position: Vector3::zeros(),
        });
        assert!(config.validate().is_err());
    }
}
