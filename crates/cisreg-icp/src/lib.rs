#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Statistical shape atlas and barycentric mode fitting.
pub mod atlas;

/// Covariance tree for closest-point queries on triangle meshes.
pub mod cov_tree;

mod icp_surface;
pub use icp_surface::*;

/// Correspondence search and residual statistics.
pub mod ops;

pub use atlas::{fit_shape, fit_weights, AtlasError, ShapeAtlas, ShapeFitConfig, ShapeFitResult};
pub use cov_tree::{ClosestPoint, CovarianceTree, TreeConfig, TreeError};
