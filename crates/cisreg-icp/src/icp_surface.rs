use cisreg_3d::{FrameError, Mesh, MeshError, RigidFrame};
use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::atlas::{fit_shape, AtlasError, ShapeAtlas, ShapeFitConfig};
use crate::cov_tree::{ClosestPoint, CovarianceTree, TreeConfig, TreeError};
use crate::ops::{find_correspondences, matched_pairs, mean_distance};

/// Error types for surface registration.
#[derive(Debug, thiserror::Error)]
pub enum IcpError {
    /// Rigid registration failed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The mesh is invalid.
    #[error(transparent)]
    Mesh(#[from] MeshError),

    /// The search tree could not be built.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Shape fitting failed.
    #[error(transparent)]
    Atlas(#[from] AtlasError),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Structure to define the ICP parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpConvergenceCriteria {
    /// Maximum number of iterations to perform.
    pub max_iterations: usize,
    /// Convergence tolerance as the difference in mean residual between two consecutive iterations.
    pub tolerance: f64,
}

impl Default for IcpConvergenceCriteria {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }
}

fn default_search_radius() -> f64 {
    f64::INFINITY
}

/// Parameters of [`icp_surface`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceIcpConfig {
    /// Convergence criteria of the rigid loop.
    #[serde(default)]
    pub criteria: IcpConvergenceCriteria,
    /// Maximum distance between a sample and its surface correspondence.
    #[serde(default = "default_search_radius")]
    pub search_radius: f64,
    /// Search tree parameters.
    #[serde(default)]
    pub tree: TreeConfig,
    /// Shape fitting parameters. Shape fitting runs only when this is set and an atlas is given.
    #[serde(default)]
    pub shape_fit: Option<ShapeFitConfig>,
}

impl Default for SurfaceIcpConfig {
    fn default() -> Self {
        Self {
            criteria: IcpConvergenceCriteria::default(),
            search_radius: default_search_radius(),
            tree: TreeConfig::default(),
            shape_fit: None,
        }
    }
}

impl SurfaceIcpConfig {
    /// Check that every parameter is in range.
    pub fn validate(&self) -> Result<(), IcpError> {
        if self.criteria.max_iterations == 0 {
            return Err(IcpError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.criteria.tolerance.is_nan() || self.criteria.tolerance <= 0.0 {
            return Err(IcpError::InvalidConfig(format!(
                "tolerance must be positive, got {}",
                self.criteria.tolerance
            )));
        }
        if self.search_radius.is_nan() || self.search_radius <= 0.0 {
            return Err(IcpError::InvalidConfig(format!(
                "search_radius must be positive, got {}",
                self.search_radius
            )));
        }
        if self.tree.min_count == 0 {
            return Err(IcpError::InvalidConfig(
                "tree.min_count must be at least 1".to_string(),
            ));
        }
        if let Some(shape) = &self.shape_fit {
            if shape.max_iterations == 0 {
                return Err(IcpError::InvalidConfig(
                    "shape_fit.max_iterations must be at least 1".to_string(),
                ));
            }
            if shape.tolerance.is_nan() || shape.tolerance <= 0.0 {
                return Err(IcpError::InvalidConfig(format!(
                    "shape_fit.tolerance must be positive, got {}",
                    shape.tolerance
                )));
            }
        }
        Ok(())
    }
}

/// Termination state of a registration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IcpStatus {
    /// The mean residual changed by less than the tolerance.
    Converged,
    /// The iteration budget ran out first.
    MaxIterationsReached,
}

/// Result of [`icp_surface`].
///
/// The frame, the transformed samples and the correspondences always belong
/// to the same iteration.
#[derive(Debug, Clone)]
pub struct SurfaceIcpResult {
    /// Estimated frame mapping the samples onto the surface.
    pub frame: RigidFrame,
    /// Samples mapped by `frame`.
    pub transformed: Vec<DVec3>,
    /// Closest surface point of every transformed sample, `None` if none lies within the search radius.
    pub matches: Vec<Option<ClosestPoint>>,
    /// Mean distance of the matched samples to the surface.
    pub mean_residual: f64,
    /// Number of iterations performed.
    pub num_iterations: usize,
    /// How the loop ended.
    pub status: IcpStatus,
    /// Weights of modes `1..=M`, when shape fitting ran.
    pub mode_weights: Option<Vec<f64>>,
    /// Vertices of the deformed mesh, when shape fitting ran.
    pub deformed_vertices: Option<Vec<DVec3>>,
}

impl SurfaceIcpResult {
    /// Indices of the samples without a correspondence.
    pub fn missed_samples(&self) -> Vec<usize> {
        self.matches
            .iter()
            .enumerate()
            .filter_map(|(k, m)| m.is_none().then_some(k))
            .collect()
    }

    /// Closest surface points, `None` for missed samples.
    pub fn closest_points(&self) -> Vec<Option<DVec3>> {
        self.matches.iter().map(|m| m.as_ref().map(|m| m.point)).collect()
    }

    /// Residual distances, `None` for missed samples.
    pub fn residuals(&self) -> Vec<Option<f64>> {
        self.matches.iter().map(|m| m.as_ref().map(|m| m.distance)).collect()
    }

    /// Check whether the loop converged.
    pub fn is_converged(&self) -> bool {
        self.status == IcpStatus::Converged
    }
}

fn require_matches(count: usize) -> Result<(), FrameError> {
    if count < 3 {
        return Err(FrameError::InsufficientPoints {
            required: 3,
            actual: count,
        });
    }
    Ok(())
}

/// Iterative Closest Point registration of a point cloud to a triangle mesh.
///
/// Each iteration maps the samples with the current frame, finds their closest
/// points on the surface, optionally deforms the mesh with the shape atlas and
/// re-estimates the frame from the matched pairs.
///
/// # Arguments
///
/// * `samples` - Source points `d_k`.
/// * `mesh` - Target surface. It is the mean shape when an atlas is given.
/// * `atlas` - Optional statistical shape model matching the mesh vertices.
/// * `initial` - Initial frame, [`RigidFrame::IDENTITY`] when nothing is known.
/// * `config` - Loop, search and shape fit parameters.
///
/// # Returns
///
/// The registration result. Exhausting the iteration budget is reported
/// through [`IcpStatus::MaxIterationsReached`], not as an error.
///
/// # Errors
///
/// * [`IcpError::InvalidConfig`] for out of range parameters.
/// * [`IcpError::Frame`] if fewer than 3 samples find a correspondence, or the
///   rigid fit degenerates.
pub fn icp_surface(
    samples: &[DVec3],
    mesh: &Mesh,
    atlas: Option<&ShapeAtlas>,
    initial: RigidFrame,
    config: &SurfaceIcpConfig,
) -> Result<SurfaceIcpResult, IcpError> {
    config.validate()?;

    let shape = match (atlas, config.shape_fit) {
        (Some(atlas), Some(shape_config)) => {
            atlas.check_mesh(mesh)?;
            Some((atlas, shape_config))
        }
        _ => None,
    };

    let radius = config.search_radius;
    let mut current_mesh = mesh.clone();
    let mut tree = CovarianceTree::from_mesh(&current_mesh, &config.tree)?;

    let mut frame = initial;
    let mut transformed = Vec::new();
    let mut matches = Vec::new();
    let mut mean = f64::INFINITY;
    let mut prev_mean = f64::INFINITY;
    let mut mode_weights = None;
    let mut status = IcpStatus::MaxIterationsReached;
    let mut num_iterations = 0;

    // main icp loop
    for i in 0..config.criteria.max_iterations {
        log::debug!("Iteration: {}", i);
        let now = std::time::Instant::now();

        transformed = frame.apply_points(samples);
        matches = find_correspondences(&tree, &transformed, radius);

        if let Some((atlas, shape_config)) = &shape {
            let fit = fit_shape(
                atlas,
                &current_mesh,
                &transformed,
                shape_config,
                &config.tree,
                radius,
            )?;
            log::debug!(
                "shape fit: {} rounds, weights {:?}",
                fit.num_iterations,
                fit.weights
            );
            current_mesh = fit.mesh;
            tree = fit.tree;
            matches = fit.matches;
            mode_weights = Some(fit.weights);
        }

        let (source_match, target_match) = matched_pairs(samples, &matches);
        require_matches(source_match.len())?;

        log::debug!(
            "Num correspondences: {}/{}",
            source_match.len(),
            samples.len()
        );

        mean = mean_distance(&matches).unwrap_or(f64::INFINITY);
        num_iterations += 1;

        // check convergence and exit if below tolerance
        if (prev_mean - mean).abs() < config.criteria.tolerance {
            log::info!(
                "ICP converged in {} iterations with mean residual {}",
                num_iterations,
                mean
            );
            status = IcpStatus::Converged;
            break;
        }
        prev_mean = mean;

        frame = RigidFrame::from_points(&source_match, &target_match)?;

        log::debug!("mean residual: {mean}, elapsed: {:?}", now.elapsed());
    }

    if status == IcpStatus::MaxIterationsReached {
        log::warn!(
            "ICP did not converge in {} iterations, last mean residual {}",
            num_iterations,
            mean
        );
        // the frame was updated after the last correspondence pass
        transformed = frame.apply_points(samples);
        matches = find_correspondences(&tree, &transformed, radius);
        let matched = matches.iter().flatten().count();
        require_matches(matched)?;
        mean = mean_distance(&matches).unwrap_or(f64::INFINITY);
    }

    let missed = matches.iter().filter(|m| m.is_none()).count();
    if missed > 0 {
        log::warn!("{missed} of {} samples have no correspondence within radius {radius}", samples.len());
    }

    let deformed_vertices = shape.map(|_| current_mesh.vertices().to_vec());

    Ok(SurfaceIcpResult {
        frame,
        transformed,
        matches,
        mean_residual: mean,
        num_iterations,
        status,
        mode_weights,
        deformed_vertices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_mesh() -> Mesh {
        Mesh::new(vec![DVec3::ZERO, DVec3::X, DVec3::Y], vec![[0, 1, 2]]).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(SurfaceIcpConfig::default().validate().is_ok());

        let mut config = SurfaceIcpConfig::default();
        config.criteria.max_iterations = 0;
        assert!(matches!(config.validate(), Err(IcpError::InvalidConfig(_))));

        let mut config = SurfaceIcpConfig::default();
        config.search_radius = f64::NAN;
        assert!(matches!(config.validate(), Err(IcpError::InvalidConfig(_))));

        let mut config = SurfaceIcpConfig::default();
        config.tree.min_count = 0;
        assert!(matches!(config.validate(), Err(IcpError::InvalidConfig(_))));

        let config = SurfaceIcpConfig {
            shape_fit: Some(ShapeFitConfig {
                max_iterations: 5,
                tolerance: -1.0,
            }),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(IcpError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_from_json() -> Result<(), serde_json::Error> {
        let config: SurfaceIcpConfig = serde_json::from_str(
            r#"{"criteria": {"max_iterations": 20}, "search_radius": 5.0, "shape_fit": {}}"#,
        )?;
        assert_eq!(config.criteria.max_iterations, 20);
        assert_eq!(config.criteria.tolerance, 1e-6);
        assert_eq!(config.search_radius, 5.0);
        assert_eq!(config.tree, TreeConfig::default());
        assert_eq!(config.shape_fit, Some(ShapeFitConfig::default()));

        let config: SurfaceIcpConfig = serde_json::from_str("{}")?;
        assert!(config.search_radius.is_infinite());
        assert!(config.shape_fit.is_none());
        Ok(())
    }

    #[test]
    fn test_too_few_matches() {
        let samples = vec![DVec3::new(0.2, 0.2, 0.0), DVec3::new(0.3, 0.1, 0.0)];
        let res = icp_surface(
            &samples,
            &triangle_mesh(),
            None,
            RigidFrame::IDENTITY,
            &SurfaceIcpConfig::default(),
        );
        assert!(matches!(
            res,
            Err(IcpError::Frame(FrameError::InsufficientPoints {
                required: 3,
                actual: 2
            }))
        ));
    }

    #[test]
    fn test_misses_are_reported() -> Result<(), IcpError> {
        let samples = vec![
            DVec3::new(0.2, 0.2, 0.0),
            DVec3::new(0.5, 0.1, 0.0),
            DVec3::new(0.1, 0.6, 0.0),
            DVec3::new(0.2, 0.2, 100.0),
        ];
        let config = SurfaceIcpConfig {
            search_radius: 1.0,
            ..Default::default()
        };
        let result = icp_surface(&samples, &triangle_mesh(), None, RigidFrame::IDENTITY, &config)?;
        assert!(result.is_converged());
        assert_eq!(result.missed_samples(), vec![3]);
        assert_eq!(result.residuals()[3], None);
        assert!(result.mean_residual < 1e-12);
        assert!(result.frame.abs_diff_eq(&RigidFrame::IDENTITY, 1e-9));
        Ok(())
    }

    #[test]
    fn test_atlas_mismatch() {
        let atlas = ShapeAtlas::from_modes(vec![vec![DVec3::ZERO; 4]]).unwrap();
        let config = SurfaceIcpConfig {
            shape_fit: Some(ShapeFitConfig::default()),
            ..Default::default()
        };
        let res = icp_surface(
            &[DVec3::ZERO; 3],
            &triangle_mesh(),
            Some(&atlas),
            RigidFrame::IDENTITY,
            &config,
        );
        assert!(matches!(
            res,
            Err(IcpError::Atlas(AtlasError::VertexCountMismatch { .. }))
        ));
    }
}
