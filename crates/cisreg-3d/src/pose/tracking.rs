use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::frame::{FrameError, RigidFrame};

/// Marker geometry of a tracked rigid body in its own coordinate frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RigidBody {
    /// Marker positions in body coordinates.
    pub markers: Vec<DVec3>,
    /// Tip position in body coordinates. Zero for bodies without a tip.
    pub tip: DVec3,
}

impl RigidBody {
    /// Create a rigid body from its markers and tip.
    pub fn new(markers: Vec<DVec3>, tip: DVec3) -> Self {
        Self { markers, tip }
    }

    /// Number of markers.
    pub fn num_markers(&self) -> usize {
        self.markers.len()
    }

    /// Pose of the body given tracker readings of its markers, `F` with `F * markers ≈ readings`.
    pub fn pose(&self, readings: &[DVec3]) -> Result<RigidFrame, FrameError> {
        RigidFrame::from_points(&self.markers, readings)
    }

    /// Tip position in tracker coordinates given tracker readings of the markers.
    pub fn tip_in_tracker(&self, readings: &[DVec3]) -> Result<DVec3, FrameError> {
        Ok(self.pose(readings)?.apply(self.tip))
    }
}

/// Tip of the `pointer` body expressed in the frame of the `reference` body.
///
/// Computes `d = F_B^-1 * F_A * A_tip` where `F_A` and `F_B` are the poses of the
/// pointer and the reference body in the same tracker frame.
pub fn pointer_tip_in_body(
    pointer: &RigidBody,
    pointer_readings: &[DVec3],
    reference: &RigidBody,
    reference_readings: &[DVec3],
) -> Result<DVec3, FrameError> {
    let f_a = pointer.pose(pointer_readings)?;
    let f_b = reference.pose(reference_readings)?;
    Ok(f_b.apply_inverse(f_a.apply(pointer.tip)))
}

/// Expected positions of calibration object markers in the electromagnetic tracker frame.
///
/// Computes `C = F_D^-1 * F_A * c` for every calibration marker `c`, where
/// `F_D` is the pose of the electromagnetic base and `F_A` the pose of the
/// calibration object, both as seen by the optical tracker.
///
/// # Arguments
///
/// * `em_base` - Optical markers on the electromagnetic tracker base.
/// * `em_base_readings` - Optical readings of the base markers.
/// * `calibration_object` - Optical markers on the calibration object.
/// * `calibration_readings` - Optical readings of the calibration object markers.
/// * `calibration_markers` - Electromagnetic markers on the calibration object, in its frame.
pub fn expected_calibration_points(
    em_base: &[DVec3],
    em_base_readings: &[DVec3],
    calibration_object: &[DVec3],
    calibration_readings: &[DVec3],
    calibration_markers: &[DVec3],
) -> Result<Vec<DVec3>, FrameError> {
    let f_d = RigidFrame::from_points(em_base, em_base_readings)?;
    let f_a = RigidFrame::from_points(calibration_object, calibration_readings)?;
    let f = f_d.inverse().compose(&f_a);
    Ok(f.apply_points(calibration_markers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::axis_angle_to_rotation_matrix;

    fn triad() -> Vec<DVec3> {
        vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(30.0, 0.0, 0.0),
            DVec3::new(0.0, 20.0, 0.0),
            DVec3::new(0.0, 0.0, 10.0),
        ]
    }

    fn frame(axis: DVec3, angle: f64, t: DVec3) -> Result<RigidFrame, Box<dyn std::error::Error>> {
        let r = axis_angle_to_rotation_matrix(axis, angle)?;
        Ok(RigidFrame::new(r, t)?)
    }

    #[test]
    fn test_pose_and_tip() -> Result<(), Box<dyn std::error::Error>> {
        let body = RigidBody::new(triad(), DVec3::new(1.0, 2.0, 3.0));
        let f = frame(DVec3::new(1.0, 1.0, 0.0), 0.7, DVec3::new(5.0, -4.0, 2.0))?;
        let readings = f.apply_points(&body.markers);

        let pose = body.pose(&readings)?;
        assert!(pose.abs_diff_eq(&f, 1e-9));
        assert!(body.tip_in_tracker(&readings)?.abs_diff_eq(f.apply(body.tip), 1e-9));
        Ok(())
    }

    #[test]
    fn test_pointer_tip_in_body() -> Result<(), Box<dyn std::error::Error>> {
        let pointer = RigidBody::new(triad(), DVec3::new(0.0, 0.0, -50.0));
        let reference = RigidBody::new(triad(), DVec3::ZERO);

        let f_a = frame(DVec3::X, 0.3, DVec3::new(10.0, 20.0, 30.0))?;
        let f_b = frame(DVec3::Y, -0.4, DVec3::new(-5.0, 0.0, 8.0))?;

        let d = pointer_tip_in_body(
            &pointer,
            &f_a.apply_points(&pointer.markers),
            &reference,
            &f_b.apply_points(&reference.markers),
        )?;
        let expected = f_b.inverse().apply(f_a.apply(pointer.tip));
        assert!(d.abs_diff_eq(expected, 1e-9));
        Ok(())
    }

    #[test]
    fn test_expected_calibration_points() -> Result<(), Box<dyn std::error::Error>> {
        let base = triad();
        let object = vec![
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 15.0, 0.0),
            DVec3::new(0.0, 0.0, 25.0),
        ];
        let markers = vec![DVec3::new(2.0, 2.0, 2.0), DVec3::new(-3.0, 4.0, 0.5)];

        let f_d = frame(DVec3::Z, 1.1, DVec3::new(100.0, 0.0, 0.0))?;
        let f_a = frame(DVec3::new(0.0, 1.0, 1.0), 0.2, DVec3::new(0.0, 50.0, 0.0))?;

        let c = expected_calibration_points(
            &base,
            &f_d.apply_points(&base),
            &object,
            &f_a.apply_points(&object),
            &markers,
        )?;
        for (ci, m) in c.iter().zip(markers.iter()) {
            assert!(ci.abs_diff_eq(f_d.inverse().apply(f_a.apply(*m)), 1e-9));
        }
        Ok(())
    }

    #[test]
    fn test_pose_requires_three_markers() {
        let body = RigidBody::new(vec![DVec3::ZERO, DVec3::X], DVec3::ZERO);
        assert!(body.pose(&[DVec3::ZERO, DVec3::Y]).is_err());
    }
}
