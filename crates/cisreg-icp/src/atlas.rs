use cisreg_3d::{linalg, Mesh};
use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::cov_tree::{ClosestPoint, CovarianceTree, TreeConfig};
use crate::icp_surface::IcpError;
use crate::ops::{find_correspondences, mean_distance};

/// Relative singular-value threshold for the stacked mode system.
const FIT_RANK_TOLERANCE: f64 = 1e-10;

/// Error types for shape atlas operations.
#[derive(Debug, thiserror::Error)]
pub enum AtlasError {
    /// The atlas has no mean shape.
    #[error("Shape atlas needs at least the mean shape")]
    NoModes,

    /// A mode or mesh does not have the expected number of vertices.
    #[error("Expected {expected} vertices, got {actual}")]
    VertexCountMismatch {
        /// Number of vertices of the mean shape.
        expected: usize,
        /// Number of vertices found.
        actual: usize,
    },

    /// A weight vector does not match the number of modes.
    #[error("Expected {expected} mode weights, got {actual}")]
    WeightCountMismatch {
        /// Number of modes of the atlas.
        expected: usize,
        /// Number of weights provided.
        actual: usize,
    },

    /// Not enough correspondences to determine the mode weights.
    #[error("Fitting requires at least {required} correspondences, got {actual}")]
    InsufficientObservations {
        /// Minimum number of correspondences required.
        required: usize,
        /// Number of usable correspondences provided.
        actual: usize,
    },

    /// The least-squares system for the mode weights is singular.
    #[error("Mode weight system is singular")]
    SingularFit,
}

/// A statistical shape model: a mean shape plus displacement modes.
///
/// `modes[0]` holds the mean vertex positions and `modes[m]` for `m >= 1` the
/// per-vertex displacement of mode `m`. Vertex indices match the mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAtlas")]
pub struct ShapeAtlas {
    modes: Vec<Vec<DVec3>>,
}

#[derive(Deserialize)]
struct RawAtlas {
    modes: Vec<Vec<DVec3>>,
}

impl TryFrom<RawAtlas> for ShapeAtlas {
    type Error = AtlasError;

    fn try_from(raw: RawAtlas) -> Result<Self, Self::Error> {
        ShapeAtlas::from_modes(raw.modes)
    }
}

/// One correspondence used to fit mode weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeObservation {
    /// Point the deformed surface should pass through.
    pub target: DVec3,
    /// Vertex indices of the triangle holding the correspondence.
    pub vertices: [usize; 3],
    /// Barycentric weights of the correspondence on that triangle.
    pub barycentric: [f64; 3],
}

impl ShapeAtlas {
    /// Create an atlas from the mean shape followed by the mode displacements.
    pub fn from_modes(modes: Vec<Vec<DVec3>>) -> Result<Self, AtlasError> {
        let Some(mean) = modes.first() else {
            return Err(AtlasError::NoModes);
        };
        let expected = mean.len();
        if let Some(mode) = modes.iter().find(|m| m.len() != expected) {
            return Err(AtlasError::VertexCountMismatch {
                expected,
                actual: mode.len(),
            });
        }
        Ok(Self { modes })
    }

    /// Number of displacement modes, not counting the mean shape.
    pub fn num_modes(&self) -> usize {
        self.modes.len() - 1
    }

    /// Number of vertices of every mode.
    pub fn num_vertices(&self) -> usize {
        self.modes[0].len()
    }

    /// The mean vertex positions.
    pub fn mean_shape(&self) -> &[DVec3] {
        &self.modes[0]
    }

    /// Check that the atlas matches the vertex count of a mesh.
    pub fn check_mesh(&self, mesh: &Mesh) -> Result<(), AtlasError> {
        if mesh.num_vertices() != self.num_vertices() {
            return Err(AtlasError::VertexCountMismatch {
                expected: self.num_vertices(),
                actual: mesh.num_vertices(),
            });
        }
        Ok(())
    }

    /// Vertex positions `mean[v] + Σ_m weights[m - 1] * mode_m[v]`.
    pub fn deform(&self, weights: &[f64]) -> Result<Vec<DVec3>, AtlasError> {
        if weights.len() != self.num_modes() {
            return Err(AtlasError::WeightCountMismatch {
                expected: self.num_modes(),
                actual: weights.len(),
            });
        }
        let mut vertices = self.modes[0].clone();
        for (mode, &w) in self.modes[1..].iter().zip(weights) {
            for (v, d) in vertices.iter_mut().zip(mode) {
                *v += w * *d;
            }
        }
        Ok(vertices)
    }

    /// Interpolate mode `m` at a point given by barycentric weights on a triangle.
    pub fn interpolate(&self, m: usize, vertices: [usize; 3], barycentric: [f64; 3]) -> DVec3 {
        let mode = &self.modes[m];
        vertices
            .iter()
            .zip(barycentric)
            .fold(DVec3::ZERO, |acc, (&v, w)| acc + w * mode[v])
    }
}

/// Solve for the weights of modes `1..=M` from a set of correspondences.
///
/// Every observation contributes the three equations
/// `Σ_m λ_m q_m = target - q_0` where `q_m` is mode `m` interpolated at the
/// observation's barycentric weights. The mean shape enters with the fixed
/// weight 1.
///
/// PRECONDITION: the observations' vertex indices are valid for the atlas.
pub fn fit_weights(
    atlas: &ShapeAtlas,
    observations: &[ShapeObservation],
) -> Result<Vec<f64>, AtlasError> {
    let num_modes = atlas.num_modes();
    if num_modes == 0 {
        return Ok(Vec::new());
    }

    let required = num_modes.div_ceil(3);
    if observations.len() < required {
        return Err(AtlasError::InsufficientObservations {
            required,
            actual: observations.len(),
        });
    }

    // interpolated modes per observation, mode 0 included
    let q: Vec<Vec<DVec3>> = observations
        .iter()
        .map(|o| {
            (0..=num_modes)
                .map(|m| atlas.interpolate(m, o.vertices, o.barycentric))
                .collect()
        })
        .collect();

    let rows = 3 * observations.len();
    let mat_a = faer::Mat::<f64>::from_fn(rows, num_modes, |i, j| q[i / 3][j + 1][i % 3]);
    let b: Vec<f64> = observations
        .iter()
        .zip(q.iter())
        .flat_map(|(o, qk)| {
            let r = o.target - qk[0];
            [r.x, r.y, r.z]
        })
        .collect();

    if linalg::numerical_rank(mat_a.as_ref(), FIT_RANK_TOLERANCE) < num_modes {
        return Err(AtlasError::SingularFit);
    }

    let weights = linalg::solve_lstsq(mat_a, &b);
    if weights.iter().any(|w| !w.is_finite()) {
        return Err(AtlasError::SingularFit);
    }

    Ok(weights)
}

/// Parameters of the iterative shape fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeFitConfig {
    /// Maximum number of fit and re-query rounds.
    pub max_iterations: usize,
    /// Stop when the mean closest-point distance changes by less than this.
    pub tolerance: f64,
}

impl Default for ShapeFitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            tolerance: 1e-3,
        }
    }
}

/// Result of [`fit_shape`].
#[derive(Debug)]
pub struct ShapeFitResult {
    /// Weights of modes `1..=M`.
    pub weights: Vec<f64>,
    /// Deformed mesh.
    pub mesh: Mesh,
    /// Search tree over the deformed mesh.
    pub tree: CovarianceTree,
    /// Closest points of the targets on the deformed mesh.
    pub matches: Vec<Option<ClosestPoint>>,
    /// Mean distance of the matched targets to the deformed mesh.
    pub mean_distance: f64,
    /// Number of fit rounds performed.
    pub num_iterations: usize,
}

/// Build the fit observations from closest-point matches on `mesh`.
///
/// Unmatched targets and matches on zero-area triangles are skipped.
pub fn shape_observations(
    mesh: &Mesh,
    targets: &[DVec3],
    matches: &[Option<ClosestPoint>],
) -> Vec<ShapeObservation> {
    targets
        .iter()
        .zip(matches)
        .filter_map(|(&target, m)| {
            let m = m.as_ref()?;
            let vertices = *mesh.triangles().get(m.element)?;
            let barycentric = mesh.triangle(m.element)?.barycentric(m.point)?;
            Some(ShapeObservation {
                target,
                vertices,
                barycentric,
            })
        })
        .collect()
}

/// Deform `mesh` with the atlas so that its surface passes through `targets`.
///
/// Alternates closest-point queries on the current mesh with a joint least
/// squares fit of the mode weights, rebuilding the search tree after every
/// deformation. Stops after `config.max_iterations` rounds or when the mean
/// closest-point distance changes by less than `config.tolerance`.
pub fn fit_shape(
    atlas: &ShapeAtlas,
    mesh: &Mesh,
    targets: &[DVec3],
    config: &ShapeFitConfig,
    tree_config: &TreeConfig,
    search_radius: f64,
) -> Result<ShapeFitResult, IcpError> {
    atlas.check_mesh(mesh)?;

    let mut current = mesh.clone();
    let mut tree = CovarianceTree::from_mesh(&current, tree_config)?;
    let mut matches = find_correspondences(&tree, targets, search_radius);
    let mut prev_mean = mean_distance(&matches).unwrap_or(f64::INFINITY);
    let mut mean = prev_mean;
    let mut weights = vec![0.0; atlas.num_modes()];
    let mut num_iterations = 0;

    for _ in 0..config.max_iterations {
        let observations = shape_observations(&current, targets, &matches);
        weights = fit_weights(atlas, &observations)?;

        current = current.with_vertices(atlas.deform(&weights)?)?;
        tree = CovarianceTree::from_mesh(&current, tree_config)?;
        matches = find_correspondences(&tree, targets, search_radius);
        mean = mean_distance(&matches).unwrap_or(f64::INFINITY);
        num_iterations += 1;

        log::trace!("shape fit round {num_iterations}: mean distance {mean:.6}, weights {weights:?}");

        if (prev_mean - mean).abs() < config.tolerance {
            break;
        }
        prev_mean = mean;
    }

    Ok(ShapeFitResult {
        weights,
        mesh: current,
        tree,
        matches,
        mean_distance: mean,
        num_iterations,
    })
}
