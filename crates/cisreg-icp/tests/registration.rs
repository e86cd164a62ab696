use approx::assert_relative_eq;
use cisreg_3d::{transforms::axis_angle_to_rotation_matrix, Mesh, RigidFrame};
use cisreg_icp::{
    fit_shape, icp_surface, IcpStatus, ShapeAtlas, ShapeFitConfig, SurfaceIcpConfig, TreeConfig,
};
use glam::DVec3;

/// Axis aligned box centred at the origin with the given half extents.
fn box_mesh(half: DVec3) -> Mesh {
    let vertices = (0..8)
        .map(|v| {
            let sign = |bit: usize| if v & bit == 0 { -1.0 } else { 1.0 };
            DVec3::new(sign(1) * half.x, sign(2) * half.y, sign(4) * half.z)
        })
        .collect();
    let triangles = vec![
        [0, 2, 6],
        [0, 6, 4],
        [1, 3, 7],
        [1, 7, 5],
        [0, 1, 5],
        [0, 5, 4],
        [2, 3, 7],
        [2, 7, 6],
        [0, 1, 3],
        [0, 3, 2],
        [4, 5, 7],
        [4, 7, 6],
    ];
    Mesh::new(vertices, triangles).unwrap()
}

/// Points on the central part of every face of a box.
fn face_samples(half: DVec3) -> Vec<DVec3> {
    let steps = [-0.6, -0.2, 0.2, 0.6];
    let mut points = Vec::new();
    for axis in 0..3 {
        for side in [-1.0, 1.0] {
            for &u in &steps {
                for &v in &steps {
                    let mut p = DVec3::ZERO;
                    p[axis] = side * half[axis];
                    p[(axis + 1) % 3] = u * half[(axis + 1) % 3];
                    p[(axis + 2) % 3] = v * half[(axis + 2) % 3];
                    points.push(p);
                }
            }
        }
    }
    points
}

/// Atlas over the box vertices with an x-scaling and a y-scaling mode.
fn scaling_atlas(mean: &Mesh) -> ShapeAtlas {
    let mean_shape = mean.vertices().to_vec();
    let scale_x = mean_shape.iter().map(|v| DVec3::new(v.x, 0.0, 0.0)).collect();
    let scale_y = mean_shape.iter().map(|v| DVec3::new(0.0, v.y, 0.0)).collect();
    ShapeAtlas::from_modes(vec![mean_shape, scale_x, scale_y]).unwrap()
}

#[test]
fn test_rigid_icp_recovers_motion() -> Result<(), Box<dyn std::error::Error>> {
    let half = DVec3::new(1.0, 1.5, 2.0);
    let mesh = box_mesh(half);

    let rotation = axis_angle_to_rotation_matrix(DVec3::new(1.0, 2.0, 3.0), 0.05)?;
    let f_true = RigidFrame::new(rotation, DVec3::new(0.05, -0.03, 0.04))?;
    let samples: Vec<DVec3> = face_samples(half)
        .into_iter()
        .map(|p| f_true.apply_inverse(p))
        .collect();

    let config = SurfaceIcpConfig {
        criteria: cisreg_icp::IcpConvergenceCriteria {
            max_iterations: 300,
            tolerance: 1e-10,
        },
        tree: TreeConfig {
            min_count: 2,
            min_diagonal: 0.0,
        },
        ..Default::default()
    };

    let result = icp_surface(&samples, &mesh, None, RigidFrame::IDENTITY, &config)?;

    assert_eq!(result.status, IcpStatus::Converged);
    assert!(result.missed_samples().is_empty());
    assert!(result.mean_residual < 1e-6);
    for r in result.residuals().into_iter().flatten() {
        assert!(r < 1e-5);
    }
    assert!(result.frame.abs_diff_eq(&f_true, 1e-5));
    assert!(result.mode_weights.is_none());
    Ok(())
}

#[test]
fn test_max_iterations_keeps_result_consistent() -> Result<(), Box<dyn std::error::Error>> {
    let half = DVec3::new(1.0, 1.5, 2.0);
    let mesh = box_mesh(half);
    let f_true = RigidFrame::from_translation(DVec3::new(0.1, 0.05, -0.08));
    let samples: Vec<DVec3> = face_samples(half)
        .into_iter()
        .map(|p| f_true.apply_inverse(p))
        .collect();

    let config = SurfaceIcpConfig {
        criteria: cisreg_icp::IcpConvergenceCriteria {
            max_iterations: 2,
            tolerance: 1e-12,
        },
        ..Default::default()
    };
    let result = icp_surface(&samples, &mesh, None, RigidFrame::IDENTITY, &config)?;

    assert_eq!(result.status, IcpStatus::MaxIterationsReached);
    assert!(!result.is_converged());
    assert_eq!(result.num_iterations, 2);

    // transformed samples, matches and residuals belong to the returned frame
    for ((d, s), m) in samples
        .iter()
        .zip(result.transformed.iter())
        .zip(result.matches.iter())
    {
        assert!(result.frame.apply(*d).abs_diff_eq(*s, 1e-12));
        if let Some(m) = m {
            assert_relative_eq!(m.distance, m.point.distance(*s), epsilon = 1e-12);
        }
    }
    Ok(())
}

#[test]
fn test_fit_shape_recovers_mode_weights() -> Result<(), Box<dyn std::error::Error>> {
    let half = DVec3::new(1.0, 1.5, 2.0);
    let mean = box_mesh(half);
    let atlas = scaling_atlas(&mean);

    let truth = [0.1, -0.05];
    let true_half = DVec3::new(half.x * (1.0 + truth[0]), half.y * (1.0 + truth[1]), half.z);
    let targets = face_samples(true_half);

    let config = ShapeFitConfig {
        max_iterations: 200,
        tolerance: 1e-13,
    };
    let fit = fit_shape(
        &atlas,
        &mean,
        &targets,
        &config,
        &TreeConfig::default(),
        f64::INFINITY,
    )?;

    assert_relative_eq!(fit.weights[0], truth[0], epsilon = 1e-6);
    assert_relative_eq!(fit.weights[1], truth[1], epsilon = 1e-6);
    assert!(fit.mean_distance < 1e-6);

    let expected = atlas.deform(&truth)?;
    for (v, e) in fit.mesh.vertices().iter().zip(expected.iter()) {
        assert!(v.abs_diff_eq(*e, 1e-5));
    }
    Ok(())
}

#[test]
fn test_fit_shape_stops_after_max_iterations() -> Result<(), Box<dyn std::error::Error>> {
    let half = DVec3::new(1.0, 1.5, 2.0);
    let mean = box_mesh(half);
    let atlas = scaling_atlas(&mean);
    let targets = face_samples(DVec3::new(1.2, 1.5, 2.0));

    let fit = fit_shape(
        &atlas,
        &mean,
        &targets,
        &ShapeFitConfig::default(),
        &TreeConfig::default(),
        f64::INFINITY,
    )?;
    assert!(fit.num_iterations >= 1 && fit.num_iterations <= 5);
    assert_eq!(fit.matches.len(), targets.len());
    Ok(())
}

#[test]
fn test_deformable_icp() -> Result<(), Box<dyn std::error::Error>> {
    let half = DVec3::new(1.0, 1.5, 2.0);
    let mean = box_mesh(half);
    let atlas = scaling_atlas(&mean);

    let truth = [0.08, 0.04];
    let true_half = DVec3::new(half.x * (1.0 + truth[0]), half.y * (1.0 + truth[1]), half.z);
    let samples = face_samples(true_half);

    let config = SurfaceIcpConfig {
        criteria: cisreg_icp::IcpConvergenceCriteria {
            max_iterations: 100,
            tolerance: 1e-10,
        },
        shape_fit: Some(ShapeFitConfig {
            max_iterations: 50,
            tolerance: 1e-12,
        }),
        ..Default::default()
    };
    let result = icp_surface(&samples, &mean, Some(&atlas), RigidFrame::IDENTITY, &config)?;

    let weights = result.mode_weights.clone().unwrap_or_default();
    assert_eq!(weights.len(), 2);
    assert_relative_eq!(weights[0], truth[0], epsilon = 1e-4);
    assert_relative_eq!(weights[1], truth[1], epsilon = 1e-4);
    assert!(result.frame.abs_diff_eq(&RigidFrame::IDENTITY, 1e-4));
    assert_eq!(
        result.deformed_vertices.as_ref().map(|v| v.len()),
        Some(mean.num_vertices())
    );
    Ok(())
}
