use cisreg_3d::metrics::{summarize_distances, ErrorSummary};
use glam::DVec3;

use crate::cov_tree::{ClosestPoint, CovarianceTree};

/// Find the closest surface point of every query point.
///
/// Queries without a surface point within `radius` are reported as `None`.
pub fn find_correspondences(
    tree: &CovarianceTree,
    points: &[DVec3],
    radius: f64,
) -> Vec<Option<ClosestPoint>> {
    points
        .iter()
        .enumerate()
        .map(|(k, &p)| match tree.find_closest(p, radius) {
            Ok(cp) => Some(cp),
            Err(e) => {
                log::trace!("sample {k}: {e}");
                None
            }
        })
        .collect()
}

/// Mean distance over the matched queries, `None` if nothing matched.
pub fn mean_distance(matches: &[Option<ClosestPoint>]) -> Option<f64> {
    let summary = residual_summary(matches);
    (summary.count > 0).then_some(summary.mean)
}

/// Mean and maximum distance over the matched queries.
pub fn residual_summary(matches: &[Option<ClosestPoint>]) -> ErrorSummary {
    summarize_distances(matches.iter().flatten().map(|m| m.distance))
}

/// The source points with a correspondence, paired with their closest surface points.
pub(crate) fn matched_pairs(
    source: &[DVec3],
    matches: &[Option<ClosestPoint>],
) -> (Vec<DVec3>, Vec<DVec3>) {
    source
        .iter()
        .zip(matches)
        .filter_map(|(&s, m)| m.as_ref().map(|m| (s, m.point)))
        .unzip()
}
