//! Mathematical utilities for CDCPD
//!
//! Gaussian kernels over point sets, the mixture-model variance
//! initialisation, and conversions between point lists and matrices.

pub mod kernel;

pub use kernel::*;
