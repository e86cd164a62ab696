use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::frame::{FrameError, RigidFrame};
use crate::linalg;

/// Relative singular-value threshold for the stacked pivot system.
const PIVOT_RANK_TOLERANCE: f64 = 1e-9;

/// Result of a pivot calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotCalibration {
    /// Tip position in the tool frame.
    pub tip: DVec3,
    /// Pivot post position in the tracker frame.
    pub post: DVec3,
    /// Tool marker geometry in the tool frame, centred on the first-frame centroid.
    pub markers: Vec<DVec3>,
    /// Root mean square of the per-frame residual `|R_k tip + p_k - post|`.
    pub rms_residual: f64,
}

/// Solve the pivot system from already estimated tool frames.
///
/// Every frame `F_k = (R_k, p_k)` contributes the three equations
/// `R_k * tip - post = -p_k`. The stacked `3N x 6` system is solved in the
/// least-squares sense for `tip` (tool frame) and `post` (tracker frame).
///
/// Returns `(tip, post, rms_residual)`.
///
/// # Errors
///
/// * [`FrameError::InsufficientPoints`] with fewer than 2 frames.
/// * [`FrameError::DegenerateRegistration`] if the system is rank deficient,
///   for instance when every frame has the same orientation.
pub fn solve_pivot(frames: &[RigidFrame]) -> Result<(DVec3, DVec3, f64), FrameError> {
    if frames.len() < 2 {
        return Err(FrameError::InsufficientPoints {
            required: 2,
            actual: frames.len(),
        });
    }

    let n = frames.len();
    let mat_a = faer::Mat::<f64>::from_fn(3 * n, 6, |i, j| {
        let frame = &frames[i / 3];
        let row = i % 3;
        if j < 3 {
            frame.rotation().col(j)[row]
        } else if j - 3 == row {
            -1.0
        } else {
            0.0
        }
    });

    let rank = linalg::numerical_rank(mat_a.as_ref(), PIVOT_RANK_TOLERANCE);
    if rank < 6 {
        return Err(FrameError::DegenerateRegistration(format!(
            "pivot system has rank {rank}, expected 6; tool orientations do not vary enough"
        )));
    }

    let b: Vec<f64> = frames
        .iter()
        .flat_map(|f| {
            let p = f.translation();
            [-p.x, -p.y, -p.z]
        })
        .collect();

    let x = linalg::solve_lstsq(mat_a, &b);
    let tip = DVec3::new(x[0], x[1], x[2]);
    let post = DVec3::new(x[3], x[4], x[5]);

    if !tip.is_finite() || !post.is_finite() {
        return Err(FrameError::DegenerateRegistration(
            "pivot least-squares solution is not finite".to_string(),
        ));
    }

    let sum_sq: f64 = frames
        .iter()
        .map(|f| f.apply(tip).distance_squared(post))
        .sum();
    let rms = (sum_sq / n as f64).sqrt();

    log::debug!("pivot calibration over {n} frames: tip={tip}, post={post}, rms={rms:.6}");

    Ok((tip, post, rms))
}

/// Pivot-calibrate a tool from raw marker readings.
///
/// The tool-local marker geometry is defined by the first frame, centred on
/// its centroid. Each frame is registered to that geometry and the resulting
/// frames are handed to [`solve_pivot`].
///
/// # Arguments
///
/// * `frames` - Per-frame marker readings in the tracker frame. All frames must
///   hold the same markers in the same order.
pub fn pivot_calibration(frames: &[Vec<DVec3>]) -> Result<PivotCalibration, FrameError> {
    let Some(first) = frames.first() else {
        return Err(FrameError::InsufficientPoints {
            required: 2,
            actual: 0,
        });
    };
    if frames.len() < 2 {
        return Err(FrameError::InsufficientPoints {
            required: 2,
            actual: frames.len(),
        });
    }

    let center = linalg::centroid(first);
    let markers: Vec<DVec3> = first.iter().map(|&g| g - center).collect();

    let poses = frames
        .iter()
        .map(|readings| RigidFrame::from_points(&markers, readings))
        .collect::<Result<Vec<_>, _>>()?;

    let (tip, post, rms_residual) = solve_pivot(&poses)?;

    Ok(PivotCalibration {
        tip,
        post,
        markers,
        rms_residual,
    })
}

/// Pivot-calibrate an optically tracked tool in the electromagnetic tracker frame.
///
/// For every frame the pose `F_D` of the electromagnetic base is estimated from
/// `em_base_readings` (optical tracker frame), and the optical tool readings are
/// mapped through `F_D^-1` before pivot calibration.
///
/// # Arguments
///
/// * `em_base_markers` - Markers of the electromagnetic base in its own frame.
/// * `em_base_readings` - Per-frame readings of those markers by the optical tracker.
/// * `tool_readings` - Per-frame readings of the tool markers by the optical tracker.
pub fn optical_pivot_calibration(
    em_base_markers: &[DVec3],
    em_base_readings: &[Vec<DVec3>],
    tool_readings: &[Vec<DVec3>],
) -> Result<PivotCalibration, FrameError> {
    if em_base_readings.len() != tool_readings.len() {
        return Err(FrameError::MismatchedLengths(
            em_base_readings.len(),
            tool_readings.len(),
        ));
    }

    let frames = em_base_readings
        .iter()
        .zip(tool_readings.iter())
        .map(|(d, h)| {
            let f_d = RigidFrame::from_points(em_base_markers, d)?;
            Ok(h.iter().map(|&p| f_d.apply_inverse(p)).collect())
        })
        .collect::<Result<Vec<Vec<DVec3>>, FrameError>>()?;

    pivot_calibration(&frames)
}
