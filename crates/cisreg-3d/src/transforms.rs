use glam::{DMat3, DVec3};

/// Compute the rotation matrix from an axis and angle.
///
/// # Arguments
///
/// * `axis` - The axis of rotation. It does not need to be normalized.
/// * `angle` - The angle of rotation in radians.
///
/// # Returns
///
/// The rotation matrix.
///
/// Example:
///
/// ```
/// use cisreg_3d::transforms::axis_angle_to_rotation_matrix;
/// use glam::DVec3;
///
/// let rotation = axis_angle_to_rotation_matrix(DVec3::X, std::f64::consts::FRAC_PI_2).unwrap();
/// assert!((rotation * DVec3::Y - DVec3::Z).length() < 1e-12);
/// ```
pub fn axis_angle_to_rotation_matrix(axis: DVec3, angle: f64) -> Result<DMat3, &'static str> {
    // normalize the vector
    let magnitude = axis.length();
    if magnitude < 1e-10 {
        return Err("cannot compute rotation matrix from a zero vector");
    }
    let DVec3 { x, y, z } = axis / magnitude;

    let c = angle.cos();
    let s = angle.sin();
    let t = 1.0 - c;

    let m00 = c + x * x * t;
    let m11 = c + y * y * t;
    let m22 = c + z * z * t;

    let tmp1 = x * y * t;
    let tmp2 = z * s;

    let m10 = tmp1 + tmp2;
    let m01 = tmp1 - tmp2;

    let tmp3 = x * z * t;
    let tmp4 = y * s;

    let m20 = tmp3 - tmp4;
    let m02 = tmp3 + tmp4;

    let tmp5 = y * z * t;
    let tmp6 = x * s;

    let m12 = tmp5 - tmp6;
    let m21 = tmp5 + tmp6;

    // glam matrices are column major
    Ok(DMat3::from_cols(
        DVec3::new(m00, m10, m20),
        DVec3::new(m01, m11, m21),
        DVec3::new(m02, m12, m22),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_angle_to_rotation_matrix_quarter_turn() -> Result<(), Box<dyn std::error::Error>> {
        let rotation = axis_angle_to_rotation_matrix(DVec3::X, std::f64::consts::PI / 2.0)?;
        let expected = DMat3::from_cols(
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 0.0, 1.0),
            DVec3::new(0.0, -1.0, 0.0),
        );
        assert!(rotation.abs_diff_eq(expected, 1e-12));
        Ok(())
    }

    #[test]
    fn test_axis_angle_zero_axis() {
        assert!(axis_angle_to_rotation_matrix(DVec3::ZERO, 1.0).is_err());
    }

    #[test]
    fn test_axis_angle_is_proper_rotation() -> Result<(), Box<dyn std::error::Error>> {
        let rotation = axis_angle_to_rotation_matrix(DVec3::new(1.0, 2.0, -0.5), 1.3)?;
        assert!((rotation.transpose() * rotation).abs_diff_eq(DMat3::IDENTITY, 1e-12));
        assert!((rotation.determinant() - 1.0).abs() < 1e-12);
        Ok(())
    }
}
