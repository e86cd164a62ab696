use std::fmt;
use std::ops::Mul;

use glam::{DMat3, DMat4, DVec3, DVec4};
use serde::{Deserialize, Serialize};

use crate::linalg;

/// Tolerance used to decide whether a matrix is a proper rotation.
pub const DETERMINANT_TOLERANCE: f64 = 1e-6;

/// Relative singular-value threshold below which a registration is considered rank deficient.
const RANK_TOLERANCE: f64 = 1e-10;

/// Error types for rigid frame operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Not enough (affinely independent) points to determine a rigid transform.
    #[error("Registration requires at least {required} non-collinear points, got {actual}")]
    InsufficientPoints {
        /// Minimum number of points required.
        required: usize,
        /// Number of usable points provided.
        actual: usize,
    },

    /// The two point sets do not have the same length.
    #[error("Mismatched point set lengths: {0} != {1}")]
    MismatchedLengths(usize, usize),

    /// The closed-form fit could not produce a proper rotation.
    #[error("Degenerate registration: {0}")]
    DegenerateRegistration(String),

    /// A matrix handed to [`RigidFrame::new`] is not a proper rotation.
    #[error("Matrix is not a proper rotation (det = {0})")]
    NotARotation(f64),
}

/// A rigid transform `x -> r * x + p`.
///
/// The rotation is always orthonormal with determinant `+1`. Frames are
/// immutable values: every operation returns a new frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFrame")]
pub struct RigidFrame {
    rotation: DMat3,
    translation: DVec3,
}

/// Unvalidated serialized form of a [`RigidFrame`].
#[derive(Deserialize)]
struct RawFrame {
    rotation: DMat3,
    translation: DVec3,
}

impl TryFrom<RawFrame> for RigidFrame {
    type Error = FrameError;

    fn try_from(raw: RawFrame) -> Result<Self, Self::Error> {
        RigidFrame::new(raw.rotation, raw.translation)
    }
}

impl Default for RigidFrame {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RigidFrame {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        rotation: DMat3::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Create a frame from a rotation and a translation.
    ///
    /// Fails if `rotation` is not orthonormal with determinant `+1`.
    pub fn new(rotation: DMat3, translation: DVec3) -> Result<Self, FrameError> {
        let det = rotation.determinant();
        let orthonormal =
            (rotation.transpose() * rotation).abs_diff_eq(DMat3::IDENTITY, DETERMINANT_TOLERANCE);
        if !orthonormal || (det - 1.0).abs() > DETERMINANT_TOLERANCE {
            return Err(FrameError::NotARotation(det));
        }
        Ok(Self {
            rotation,
            translation,
        })
    }

    /// Create a pure translation.
    pub fn from_translation(translation: DVec3) -> Self {
        Self {
            rotation: DMat3::IDENTITY,
            translation,
        }
    }

    /// The rotation matrix.
    #[inline]
    pub fn rotation(&self) -> DMat3 {
        self.rotation
    }

    /// The translation vector.
    #[inline]
    pub fn translation(&self) -> DVec3 {
        self.translation
    }

    /// Compose two frames, `self * other`.
    ///
    /// The result applies `other` first and then `self`.
    pub fn compose(&self, other: &RigidFrame) -> RigidFrame {
        RigidFrame {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// The algebraic inverse `(r^T, -r^T p)`.
    pub fn inverse(&self) -> RigidFrame {
        let rt = self.rotation.transpose();
        RigidFrame {
            rotation: rt,
            translation: -(rt * self.translation),
        }
    }

    /// Apply the frame to a single point.
    #[inline]
    pub fn apply(&self, point: DVec3) -> DVec3 {
        self.rotation * point + self.translation
    }

    /// Apply the inverse of the frame to a single point, `r^T (x - p)`.
    #[inline]
    pub fn apply_inverse(&self, point: DVec3) -> DVec3 {
        self.rotation.transpose() * (point - self.translation)
    }

    /// Apply the frame to every point of an ordered collection.
    pub fn apply_points(&self, points: &[DVec3]) -> Vec<DVec3> {
        points.iter().map(|&p| self.apply(p)).collect()
    }

    /// The 4x4 homogeneous matrix of the frame.
    pub fn to_homogeneous(&self) -> DMat4 {
        DMat4::from_cols(
            self.rotation.x_axis.extend(0.0),
            self.rotation.y_axis.extend(0.0),
            self.rotation.z_axis.extend(0.0),
            DVec4::new(self.translation.x, self.translation.y, self.translation.z, 1.0),
        )
    }

    /// Check whether two frames are equal within the given tolerance.
    pub fn abs_diff_eq(&self, other: &RigidFrame, eps: f64) -> bool {
        self.rotation.abs_diff_eq(other.rotation, eps)
            && self.translation.abs_diff_eq(other.translation, eps)
    }

    /// Register two point sets, returning the frame `F` such that `F * a ≈ b`.
    ///
    /// This implements the SVD-based closed form of Arun, Huang and Blostein,
    /// "Least-squares fitting of two 3-D point sets", IEEE PAMI 1987:
    ///
    /// 1. Center both sets on their centroids.
    /// 2. Form the cross-covariance `H = Σ a_i b_i^T` of the centered sets.
    /// 3. Decompose `H = U S V^T` and set `R = V U^T`.
    /// 4. If `det(R) < 0` negate the last column of `V` and recompute `R`.
    /// 5. Set `p = b_mean - R a_mean`.
    ///
    /// # Errors
    ///
    /// * [`FrameError::MismatchedLengths`] if the sets differ in length.
    /// * [`FrameError::InsufficientPoints`] with fewer than 3 points, or when the
    ///   points are collinear or coincident.
    /// * [`FrameError::DegenerateRegistration`] if the result is not a proper rotation.
    pub fn from_points(a: &[DVec3], b: &[DVec3]) -> Result<RigidFrame, FrameError> {
        if a.len() != b.len() {
            return Err(FrameError::MismatchedLengths(a.len(), b.len()));
        }
        if a.len() < 3 {
            return Err(FrameError::InsufficientPoints {
                required: 3,
                actual: a.len(),
            });
        }

        let a_mean = linalg::centroid(a);
        let b_mean = linalg::centroid(b);
        let h = linalg::cross_covariance(a, b, a_mean, b_mean);

        let svd = linalg::svd3(&h);

        // a rank one covariance means the points are collinear (or coincident)
        let largest = svd.s.x;
        let rank = if largest <= f64::MIN_POSITIVE {
            0
        } else {
            [svd.s.x, svd.s.y, svd.s.z]
                .iter()
                .filter(|&&s| s > RANK_TOLERANCE * largest)
                .count()
        };
        if rank < 2 {
            return Err(FrameError::InsufficientPoints {
                required: 3,
                actual: rank + 1,
            });
        }

        let mut v = svd.v;
        let mut r = v * svd.u.transpose();
        let mut det = r.determinant();
        if det < 0.0 {
            v.z_axis = -v.z_axis;
            r = v * svd.u.transpose();
            det = r.determinant();
        }

        if !det.is_finite() || (det - 1.0).abs() > DETERMINANT_TOLERANCE {
            return Err(FrameError::DegenerateRegistration(format!(
                "det(R) = {det}, should be +1 for rotation matrices"
            )));
        }

        Ok(RigidFrame {
            rotation: r,
            translation: b_mean - r * a_mean,
        })
    }
}

impl Mul<RigidFrame> for RigidFrame {
    type Output = RigidFrame;

    fn mul(self, rhs: RigidFrame) -> Self::Output {
        self.compose(&rhs)
    }
}

impl Mul<DVec3> for RigidFrame {
    type Output = DVec3;

    fn mul(self, rhs: DVec3) -> Self::Output {
        self.apply(rhs)
    }
}

impl fmt::Display for RigidFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.to_homogeneous();
        for i in 0..4 {
            let row = m.row(i);
            writeln!(
                f,
                "[{:>10.4} {:>10.4} {:>10.4} {:>10.4}]",
                row.x, row.y, row.z, row.w
            )?;
        }
        Ok(())
    }
}
