use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Summary statistics of the point-wise distances between two point sets.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Mean Euclidean distance.
    pub mean: f64,
    /// Maximum Euclidean distance.
    pub max: f64,
    /// Number of compared pairs.
    pub count: usize,
}

/// Compare two point sets pairwise.
///
/// Extra points in the longer set are ignored. Returns a zeroed summary for empty input.
pub fn error_summary(estimated: &[DVec3], expected: &[DVec3]) -> ErrorSummary {
    let distances = estimated
        .iter()
        .zip(expected.iter())
        .map(|(a, b)| a.distance(*b));
    summarize_distances(distances)
}

/// Summarize a sequence of non-negative distances.
pub fn summarize_distances(distances: impl IntoIterator<Item = f64>) -> ErrorSummary {
    let (sum, max, count) = distances
        .into_iter()
        .fold((0.0, 0.0f64, 0usize), |(sum, max, n), d| {
            (sum + d, max.max(d), n + 1)
        });
    if count == 0 {
        return ErrorSummary::default();
    }
    ErrorSummary {
        mean: sum / count as f64,
        max,
        count,
    }
}

/// Percentage of pairs whose every coordinate differs by at most `threshold`.
pub fn threshold_accuracy(estimated: &[DVec3], expected: &[DVec3], threshold: f64) -> f64 {
    let n = estimated.len().min(expected.len());
    if n == 0 {
        return 0.0;
    }
    let within = estimated
        .iter()
        .zip(expected.iter())
        .filter(|(a, b)| (**a - **b).abs().max_element() <= threshold)
        .count();
    100.0 * within as f64 / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_error_summary() {
        let a = vec![DVec3::ZERO, DVec3::X, DVec3::new(0.0, 3.0, 4.0)];
        let b = vec![DVec3::ZERO, DVec3::ZERO, DVec3::ZERO];
        let summary = error_summary(&a, &b);
        assert_eq!(summary.count, 3);
        assert_relative_eq!(summary.mean, 2.0);
        assert_relative_eq!(summary.max, 5.0);
    }

    #[test]
    fn test_error_summary_empty() {
        assert_eq!(error_summary(&[], &[]), ErrorSummary::default());
    }

    #[test]
    fn test_threshold_accuracy() {
        let a = vec![
            DVec3::ZERO,
            DVec3::new(0.9, -0.9, 0.9),
            DVec3::X * 3.0,
            DVec3::new(0.1, 0.0, 1.5),
        ];
        let b = vec![DVec3::ZERO; 4];
        assert_relative_eq!(threshold_accuracy(&a, &b, 1.0), 50.0);
        assert_relative_eq!(threshold_accuracy(&a, &b, 0.0), 25.0);
        assert_relative_eq!(threshold_accuracy(&a, &b, 2.0), 75.0);
        assert_eq!(threshold_accuracy(&[], &[], 1.0), 0.0);
    }
}
