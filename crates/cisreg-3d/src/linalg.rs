use faer::prelude::SpSolverLstsq;
use glam::{DMat3, DVec3};

/// Singular value decomposition `m = u * diag(s) * v^T` of a 3x3 matrix.
///
/// Singular values are sorted in non-increasing order.
#[derive(Debug, Clone, Copy)]
pub struct Svd3 {
    /// Left singular vectors as columns.
    pub u: DMat3,
    /// Singular values.
    pub s: DVec3,
    /// Right singular vectors as columns.
    pub v: DMat3,
}

/// Convert a glam 3x3 matrix to an owned faer matrix.
pub fn dmat3_to_faer(m: &DMat3) -> faer::Mat<f64> {
    faer::Mat::<f64>::from_fn(3, 3, |i, j| m.col(j)[i])
}

/// Convert the top-left 3x3 block of a faer matrix to a glam matrix.
pub fn faer_to_dmat3(m: faer::MatRef<'_, f64>) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(m.read(0, 0), m.read(1, 0), m.read(2, 0)),
        DVec3::new(m.read(0, 1), m.read(1, 1), m.read(2, 1)),
        DVec3::new(m.read(0, 2), m.read(1, 2), m.read(2, 2)),
    )
}

/// Outer product `a * b^T`.
#[inline]
pub fn outer(a: DVec3, b: DVec3) -> DMat3 {
    DMat3::from_cols(a * b.x, a * b.y, a * b.z)
}

/// Arithmetic mean of a set of points. Returns the origin for an empty set.
pub fn centroid(points: &[DVec3]) -> DVec3 {
    if points.is_empty() {
        return DVec3::ZERO;
    }
    points.iter().fold(DVec3::ZERO, |acc, &p| acc + p) / points.len() as f64
}

/// Scatter matrix `Σ (p - center)(p - center)^T`.
pub fn scatter_matrix(points: &[DVec3], center: DVec3) -> DMat3 {
    points.iter().fold(DMat3::ZERO, |acc, &p| {
        let q = p - center;
        acc + outer(q, q)
    })
}

/// Cross-covariance `H = Σ (a_i - a_center)(b_i - b_center)^T`.
///
/// PRECONDITION: `a` and `b` have the same length.
pub fn cross_covariance(a: &[DVec3], b: &[DVec3], a_center: DVec3, b_center: DVec3) -> DMat3 {
    a.iter().zip(b.iter()).fold(DMat3::ZERO, |acc, (&pa, &pb)| {
        acc + outer(pa - a_center, pb - b_center)
    })
}

/// Compute the SVD of a 3x3 matrix in f64 precision.
pub fn svd3(m: &DMat3) -> Svd3 {
    let svd = dmat3_to_faer(m).svd();
    let u = faer_to_dmat3(svd.u());
    let v = faer_to_dmat3(svd.v());

    // sigma_i = u_i^T * m * v_i
    let s = DVec3::new(
        u.x_axis.dot(*m * v.x_axis),
        u.y_axis.dot(*m * v.y_axis),
        u.z_axis.dot(*m * v.z_axis),
    );

    Svd3 { u, s, v }
}

/// Principal axes of a symmetric positive semi-definite matrix.
///
/// Returns a proper rotation whose columns are the eigenvectors ordered by
/// descending eigenvalue, together with the eigenvalues.
pub fn principal_axes(scatter: &DMat3) -> (DMat3, DVec3) {
    // for a symmetric PSD matrix the SVD coincides with the eigendecomposition
    let Svd3 { u, s, .. } = svd3(scatter);
    let axes = if u.determinant() < 0.0 {
        DMat3::from_cols(u.x_axis, u.y_axis, -u.z_axis)
    } else {
        u
    };
    (axes, s)
}

/// Singular values of a general matrix, in non-increasing order.
pub fn singular_values(mat: faer::MatRef<'_, f64>) -> Vec<f64> {
    let svd = mat.svd();
    let sigma = svd.u().transpose() * mat * svd.v();
    let n = mat.nrows().min(mat.ncols());
    (0..n).map(|i| sigma.read(i, i).abs()).collect()
}

/// Numerical rank of a matrix given a relative tolerance on its singular values.
pub fn numerical_rank(mat: faer::MatRef<'_, f64>, rel_tol: f64) -> usize {
    let sv = singular_values(mat);
    let largest = sv.iter().cloned().fold(0.0f64, f64::max);
    if largest <= f64::MIN_POSITIVE {
        return 0;
    }
    sv.iter().filter(|&&s| s > rel_tol * largest).count()
}

/// Solve the over-determined system `a * x ≈ b` in the least-squares sense using QR.
///
/// PRECONDITION: `a.nrows() >= a.ncols()` and `b.len() == a.nrows()`.
pub fn solve_lstsq(a: faer::Mat<f64>, b: &[f64]) -> Vec<f64> {
    let ncols = a.ncols();
    let mat_b = faer::Mat::<f64>::from_fn(b.len(), 1, |i, _| b[i]);
    let params = a.qr().solve_lstsq(mat_b);
    (0..ncols).map(|i| params.read(i, 0)).collect()
}
