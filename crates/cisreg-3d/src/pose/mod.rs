//! # Pose estimation
//!
//! Tracked rigid bodies and tool calibration.
//!
//! - [`tracking`]: rigid body marker geometry, body poses and derived points
//! - [`pivot`]: pivot calibration of a tool tip from multiple tracked orientations

mod pivot;
pub use pivot::*;

mod tracking;
pub use tracking::*;
