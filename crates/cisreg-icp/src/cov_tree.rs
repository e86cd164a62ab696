use cisreg_3d::{linalg, FrameError, Mesh, RigidFrame, Triangle};
use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Error types for the covariance tree.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// The tree was built from an empty element set.
    #[error("Cannot build a search tree without elements")]
    EmptyTree,

    /// No element lies within the search radius of the query.
    #[error("No surface element within search radius {radius}")]
    QueryOutOfBound {
        /// The search radius that was used.
        radius: f64,
    },

    /// A node frame could not be built.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Parameters controlling when a tree node becomes a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// A node with at most this many elements is a leaf. Values below 1 are treated as 1.
    pub min_count: usize,
    /// A node whose local bounding box diagonal is at most this length is a leaf.
    pub min_diagonal: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            min_count: 8,
            min_diagonal: 0.0,
        }
    }
}

/// Closest point found on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClosestPoint {
    /// Closest point on the surface.
    pub point: DVec3,
    /// Euclidean distance from the query to `point`.
    pub distance: f64,
    /// Index of the triangle owning `point`.
    pub element: usize,
}

#[derive(Debug, Clone, Copy)]
struct TreeElement {
    id: usize,
    triangle: Triangle,
}

/// A tree node owning the element range `start..end` of the tree's element array.
#[derive(Debug)]
struct Node {
    frame: RigidFrame,
    lower: DVec3,
    upper: DVec3,
    start: usize,
    end: usize,
    left: Option<Box<Node>>,
    right: Option<Box<Node>>,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    /// Euclidean distance from a world point to the node's oriented bounding box.
    fn box_distance(&self, query: DVec3) -> f64 {
        let local = self.frame.apply_inverse(query);
        let below = (self.lower - local).max(DVec3::ZERO);
        let above = (local - self.upper).max(DVec3::ZERO);
        (below + above).length()
    }

    fn num_nodes(&self) -> usize {
        1 + self.children().map(Node::num_nodes).sum::<usize>()
    }

    fn num_leaves(&self) -> usize {
        if self.is_leaf() {
            1
        } else {
            self.children().map(Node::num_leaves).sum()
        }
    }

    fn depth(&self) -> usize {
        1 + self.children().map(Node::depth).max().unwrap_or(0)
    }

    fn children(&self) -> impl Iterator<Item = &Node> {
        self.left.iter().chain(self.right.iter()).map(|n| n.as_ref())
    }

    fn collect_leaves(&self, out: &mut Vec<(usize, usize)>) {
        if self.is_leaf() {
            out.push((self.start, self.end));
        }
        for child in self.children() {
            child.collect_leaves(out);
        }
    }
}

/// A binary space partitioning tree over triangles with covariance oriented nodes.
///
/// Every node carries a local frame aligned with the principal axes of its
/// vertices and the bounding box of its triangles in that frame. Internal
/// nodes split their triangles by the sign of the centroid along the primary
/// axis. The tree is immutable once built; a deformed mesh needs a new tree.
#[derive(Debug)]
pub struct CovarianceTree {
    elements: Vec<TreeElement>,
    root: Node,
}

impl CovarianceTree {
    /// Build a tree over the given triangles. Triangle `i` is reported as element `i`.
    ///
    /// # Errors
    ///
    /// * [`TreeError::EmptyTree`] if `triangles` is empty.
    pub fn build(triangles: Vec<Triangle>, config: &TreeConfig) -> Result<Self, TreeError> {
        if triangles.is_empty() {
            return Err(TreeError::EmptyTree);
        }

        let now = std::time::Instant::now();

        let mut elements: Vec<TreeElement> = triangles
            .into_iter()
            .enumerate()
            .map(|(id, triangle)| TreeElement { id, triangle })
            .collect();

        let n = elements.len();
        let root = build_node(&mut elements, 0, n, config)?;

        let tree = Self { elements, root };

        log::debug!(
            "built covariance tree: {} elements, {} nodes, {} leaves, depth {} in {:?}",
            tree.num_elements(),
            tree.num_nodes(),
            tree.num_leaves(),
            tree.depth(),
            now.elapsed()
        );

        Ok(tree)
    }

    /// Build a tree over the triangles of a mesh.
    pub fn from_mesh(mesh: &Mesh, config: &TreeConfig) -> Result<Self, TreeError> {
        Self::build(mesh.elements(), config)
    }

    /// Number of triangles in the tree.
    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Number of nodes, internal and leaves.
    pub fn num_nodes(&self) -> usize {
        self.root.num_nodes()
    }

    /// Number of leaf nodes.
    pub fn num_leaves(&self) -> usize {
        self.root.num_leaves()
    }

    /// Number of levels; a tree made of a single leaf has depth 1.
    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    /// The element ids owned by each leaf, in depth-first order.
    pub fn leaf_elements(&self) -> Vec<Vec<usize>> {
        let mut ranges = Vec::new();
        self.root.collect_leaves(&mut ranges);
        ranges
            .into_iter()
            .map(|(start, end)| self.elements[start..end].iter().map(|e| e.id).collect())
            .collect()
    }

    /// Find the closest surface point to `query` within `radius`.
    ///
    /// The search descends both children of every internal node, nearer box
    /// first, and prunes any node whose oriented bounding box is farther than
    /// the best distance found so far or than `radius`. The result is the exact
    /// nearest point over all triangles.
    ///
    /// # Errors
    ///
    /// * [`TreeError::QueryOutOfBound`] if no triangle lies within `radius`.
    pub fn find_closest(&self, query: DVec3, radius: f64) -> Result<ClosestPoint, TreeError> {
        let mut best = None;
        self.search(&self.root, query, radius, &mut best);
        best.ok_or(TreeError::QueryOutOfBound { radius })
    }

    /// Exhaustive closest point search over every triangle, with the same contract as
    /// [`CovarianceTree::find_closest`].
    pub fn find_closest_brute_force(
        &self,
        query: DVec3,
        radius: f64,
    ) -> Result<ClosestPoint, TreeError> {
        let mut best = None;
        self.scan(&self.elements, query, radius, &mut best);
        best.ok_or(TreeError::QueryOutOfBound { radius })
    }

    fn search(&self, node: &Node, query: DVec3, radius: f64, best: &mut Option<ClosestPoint>) {
        let bound = best.map_or(radius, |b| b.distance.min(radius));
        if node.box_distance(query) > bound {
            return;
        }

        if node.is_leaf() {
            self.scan(&self.elements[node.start..node.end], query, radius, best);
            return;
        }

        let (Some(left), Some(right)) = (node.left.as_deref(), node.right.as_deref()) else {
            return;
        };
        let dl = left.box_distance(query);
        let dr = right.box_distance(query);
        let (first, second) = if dr < dl { (right, left) } else { (left, right) };
        self.search(first, query, radius, best);
        self.search(second, query, radius, best);
    }

    fn scan(
        &self,
        elements: &[TreeElement],
        query: DVec3,
        radius: f64,
        best: &mut Option<ClosestPoint>,
    ) {
        for element in elements {
            let point = element.triangle.closest_point(query);
            let distance = point.distance(query);
            if distance > radius {
                continue;
            }
            let is_better = match best {
                Some(b) => distance < b.distance,
                None => true,
            };
            if is_better {
                *best = Some(ClosestPoint {
                    point,
                    distance,
                    element: element.id,
                });
            }
        }
    }
}

/// Local frame of a set of triangles: principal axes and centroid of their unique vertices.
fn node_frame(elements: &[TreeElement]) -> Result<RigidFrame, FrameError> {
    let mut vertices: Vec<DVec3> = elements
        .iter()
        .flat_map(|e| e.triangle.corners().iter().copied())
        .collect();
    vertices.sort_by(|a, b| {
        a.x.total_cmp(&b.x)
            .then(a.y.total_cmp(&b.y))
            .then(a.z.total_cmp(&b.z))
    });
    vertices.dedup();

    let center = linalg::centroid(&vertices);
    let (axes, _) = linalg::principal_axes(&linalg::scatter_matrix(&vertices, center));
    RigidFrame::new(axes, center)
}

fn build_node(
    elements: &mut [TreeElement],
    start: usize,
    end: usize,
    config: &TreeConfig,
) -> Result<Node, TreeError> {
    let slice = &mut elements[start..end];
    let frame = node_frame(slice)?;
    let (lower, upper) = slice.iter().fold(
        (DVec3::INFINITY, DVec3::NEG_INFINITY),
        |(lo, up), e| e.triangle.bounding_extent(&frame, lo, up),
    );

    let mut node = Node {
        frame,
        lower,
        upper,
        start,
        end,
        left: None,
        right: None,
    };

    let count = end - start;
    if count <= config.min_count.max(1) || (upper - lower).length() <= config.min_diagonal {
        return Ok(node);
    }

    let split = partition(slice, &frame);
    node.left = Some(Box::new(build_node(elements, start, start + split, config)?));
    node.right = Some(Box::new(build_node(elements, start + split, end, config)?));

    Ok(node)
}

/// Reorder `slice` so that elements with a negative local centroid x come first.
///
/// Returns the size of the first group. When every centroid lies on one side,
/// the elements are sorted along the local x axis and split at the median so
/// both groups are non-empty.
fn partition(slice: &mut [TreeElement], frame: &RigidFrame) -> usize {
    let key = |e: &TreeElement| frame.apply_inverse(e.triangle.centroid()).x;

    let (left, right): (Vec<TreeElement>, Vec<TreeElement>) =
        slice.iter().copied().partition(|e| key(e) < 0.0);

    if left.is_empty() || right.is_empty() {
        slice.sort_by(|a, b| key(a).total_cmp(&key(b)));
        return slice.len() / 2;
    }

    let split = left.len();
    for (dst, src) in slice.iter_mut().zip(left.into_iter().chain(right)) {
        *dst = src;
    }
    split
}
