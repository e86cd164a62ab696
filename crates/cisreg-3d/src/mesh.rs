use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::frame::RigidFrame;

/// Relative threshold on the Gram determinant below which a triangle is treated as degenerate.
const DEGENERATE_TOLERANCE: f64 = 1e-14;

/// Error types for mesh construction.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// A triangle references a vertex that does not exist.
    #[error("Triangle {triangle} references vertex {index}, but the mesh has {num_vertices} vertices")]
    IndexOutOfRange {
        /// Index of the offending triangle.
        triangle: usize,
        /// The out of range vertex index.
        index: usize,
        /// Number of vertices in the mesh.
        num_vertices: usize,
    },

    /// A vertex has a NaN or infinite coordinate.
    #[error("Vertex {0} has a non-finite coordinate")]
    NonFiniteVertex(usize),

    /// Replacement vertices do not match the mesh vertex count.
    #[error("Expected {expected} vertices, got {actual}")]
    VertexCountMismatch {
        /// Number of vertices in the mesh.
        expected: usize,
        /// Number of vertices provided.
        actual: usize,
    },
}

/// A single triangle surface element owning its three corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Triangle {
    corners: [DVec3; 3],
}

impl Triangle {
    /// Create a triangle from its corners `p`, `q`, `r`.
    pub fn new(p: DVec3, q: DVec3, r: DVec3) -> Self {
        Self { corners: [p, q, r] }
    }

    /// The three corners.
    #[inline]
    pub fn corners(&self) -> &[DVec3; 3] {
        &self.corners
    }

    /// Arithmetic mean of the corners, used to sort the triangle in a search tree.
    #[inline]
    pub fn centroid(&self) -> DVec3 {
        (self.corners[0] + self.corners[1] + self.corners[2]) / 3.0
    }

    /// Unnormalized normal `(q - p) x (r - p)`.
    pub fn normal(&self) -> DVec3 {
        let [p, q, r] = self.corners;
        (q - p).cross(r - p)
    }

    /// Expand the running bounds `(lower, upper)` with the corners expressed in `frame`'s local coordinates.
    pub fn bounding_extent(&self, frame: &RigidFrame, lower: DVec3, upper: DVec3) -> (DVec3, DVec3) {
        self.corners.iter().fold((lower, upper), |(lo, up), &c| {
            let local = frame.apply_inverse(c);
            (lo.min(local), up.max(local))
        })
    }

    /// Closest point of the closed triangle to `query`.
    ///
    /// The query is projected onto the plane spanned by `q - p` and `r - p` by
    /// solving the 2x2 least-squares system `[q - p, r - p] [u, v]^T ≈ query - p`.
    /// If the projection falls outside the triangle, every violated edge
    /// (`u < 0` → edge `r p`, `v < 0` → edge `p q`, `u + v > 1` → edge `q r`) is
    /// clamped and the nearest candidate is returned.
    pub fn closest_point(&self, query: DVec3) -> DVec3 {
        let [p, q, r] = self.corners;
        let e1 = q - p;
        let e2 = r - p;
        let w = query - p;

        // normal equations of the least-squares projection
        let a = e1.dot(e1);
        let b = e1.dot(e2);
        let c = e2.dot(e2);
        let d1 = e1.dot(w);
        let d2 = e2.dot(w);
        let det = a * c - b * b;

        if det <= DEGENERATE_TOLERANCE * a * c || det <= 0.0 {
            return nearest_of([
                project_onto_segment(query, p, q),
                project_onto_segment(query, q, r),
                project_onto_segment(query, r, p),
            ], query);
        }

        let u = (c * d1 - b * d2) / det;
        let v = (a * d2 - b * d1) / det;
        let projected = p + u * e1 + v * e2;

        if u >= 0.0 && v >= 0.0 && u + v <= 1.0 {
            return projected;
        }

        let mut best = None;
        let mut best_dist = f64::INFINITY;
        let violated = [(u < 0.0, r, p), (v < 0.0, p, q), (u + v > 1.0, q, r)];
        for (is_violated, start, end) in violated {
            if !is_violated {
                continue;
            }
            let candidate = project_onto_segment(projected, start, end);
            let dist = candidate.distance_squared(query);
            if dist < best_dist {
                best_dist = dist;
                best = Some(candidate);
            }
        }

        best.unwrap_or(projected)
    }

    /// Barycentric weights of `point` with respect to the corners `(s, t, u)`.
    ///
    /// The weights are ratios of signed sub-triangle areas measured along the
    /// triangle normal: `area(c, t, u) / A` for `s`, `area(c, s, t) / A` for `u`
    /// and the remainder for `t`. Returns `None` for a zero-area triangle.
    pub fn barycentric(&self, point: DVec3) -> Option<[f64; 3]> {
        let [s, t, u] = self.corners;
        let normal = self.normal();
        let twice_area = normal.length_squared();
        if twice_area <= f64::MIN_POSITIVE {
            return None;
        }

        // signed doubled areas projected on the normal, normalized by |n|^2
        let signed = |a: DVec3, b: DVec3, c: DVec3| (b - a).cross(c - a).dot(normal) / twice_area;
        let zeta = signed(point, t, u);
        let psi = signed(point, s, t);
        let xi = 1.0 - zeta - psi;
        Some([zeta, xi, psi])
    }
}

/// Closest point to `point` on the segment `[start, end]`.
pub fn project_onto_segment(point: DVec3, start: DVec3, end: DVec3) -> DVec3 {
    let edge = end - start;
    let len2 = edge.length_squared();
    if len2 <= f64::MIN_POSITIVE {
        return start;
    }
    let l = ((point - start).dot(edge) / len2).clamp(0.0, 1.0);
    start + l * edge
}

fn nearest_of<const N: usize>(candidates: [DVec3; N], query: DVec3) -> DVec3 {
    candidates
        .into_iter()
        .min_by(|a, b| a.distance_squared(query).total_cmp(&b.distance_squared(query)))
        .unwrap_or(query)
}

/// An indexed triangle mesh.
///
/// Every triangle index is guaranteed to be in range of the vertex array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMesh")]
pub struct Mesh {
    vertices: Vec<DVec3>,
    triangles: Vec<[usize; 3]>,
}

#[derive(Deserialize)]
struct RawMesh {
    vertices: Vec<DVec3>,
    triangles: Vec<[usize; 3]>,
}

impl TryFrom<RawMesh> for Mesh {
    type Error = MeshError;

    fn try_from(raw: RawMesh) -> Result<Self, Self::Error> {
        Mesh::new(raw.vertices, raw.triangles)
    }
}

impl Mesh {
    /// Create a mesh, validating the triangle indices and vertex coordinates.
    pub fn new(vertices: Vec<DVec3>, triangles: Vec<[usize; 3]>) -> Result<Self, MeshError> {
        if let Some(i) = vertices.iter().position(|v| !v.is_finite()) {
            return Err(MeshError::NonFiniteVertex(i));
        }
        for (t, tri) in triangles.iter().enumerate() {
            if let Some(&index) = tri.iter().find(|&&i| i >= vertices.len()) {
                return Err(MeshError::IndexOutOfRange {
                    triangle: t,
                    index,
                    num_vertices: vertices.len(),
                });
            }
        }
        Ok(Self {
            vertices,
            triangles,
        })
    }

    /// The vertex positions.
    #[inline]
    pub fn vertices(&self) -> &[DVec3] {
        &self.vertices
    }

    /// The triangle vertex indices.
    #[inline]
    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    /// Number of vertices.
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Number of triangles.
    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }

    /// Check whether the mesh has no triangles.
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// The surface element of the triangle with the given index.
    pub fn triangle(&self, index: usize) -> Option<Triangle> {
        self.triangles.get(index).map(|&[i, j, k]| {
            Triangle::new(self.vertices[i], self.vertices[j], self.vertices[k])
        })
    }

    /// All surface elements in triangle order.
    pub fn elements(&self) -> Vec<Triangle> {
        self.triangles
            .iter()
            .map(|&[i, j, k]| Triangle::new(self.vertices[i], self.vertices[j], self.vertices[k]))
            .collect()
    }

    /// A mesh with the same connectivity and new vertex positions.
    pub fn with_vertices(&self, vertices: Vec<DVec3>) -> Result<Mesh, MeshError> {
        if vertices.len() != self.vertices.len() {
            return Err(MeshError::VertexCountMismatch {
                expected: self.vertices.len(),
                actual: vertices.len(),
            });
        }
        if let Some(i) = vertices.iter().position(|v| !v.is_finite()) {
            return Err(MeshError::NonFiniteVertex(i));
        }
        Ok(Mesh {
            vertices,
            triangles: self.triangles.clone(),
        })
    }
}
