//! # CDCPD Tracker
//!
//! Per-frame tracking engine for deformable linear objects.
//!
//! Each frame runs the pipeline
//!
//! ```text
//! observation ─► preprocess ─► visibility prior ─► coherent point drift
//!                                                         │
//!          estimate ◄── distance-constrained projection ◄─┘
//! ```
//!
//! and the resulting vertex estimate seeds the next frame.
//!
//! ## Modules
//!
//! - [`config`]: Aggregated, validated configuration
//! - [`tracker`]: The step loop owning the persisted estimate
//! - [`result`]: Per-frame status and diagnostics
//! - [`worker`]: Background thread with a drop-oldest frame slot

pub mod config;
pub mod result;
pub mod tracker;
pub mod worker;

pub use config::TrackerConfig;
pub use result::{StepDiagnostics, StepResult, StepStatus, TrackerStats};
pub use tracker::Tracker;
pub use worker::{FrameSlot, SubmitOutcome, TrackerWorker};

// Core types most callers need alongside the tracker
pub use cdcpd_core::camera::CameraIntrinsics;
pub use cdcpd_core::cloud::Observation;
pub use cdcpd_core::TrackingError;
