#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Rigid coordinate frames and closed-form point registration.
pub mod frame;

/// I/O utilities for reading and writing tracker, mesh and mode files.
pub mod io;

/// Linear algebra utilities.
pub mod linalg;

/// Triangle surface elements and indexed surface meshes.
pub mod mesh;

/// Registration error metrics.
pub mod metrics;

/// Tracked-body pose estimation and pivot calibration.
pub mod pose;

/// 3D transforms algorithms.
pub mod transforms;

pub use frame::{FrameError, RigidFrame};
pub use mesh::{Mesh, MeshError, Triangle};
