use glam::DVec3;

use crate::search::PointIndex;

/// Mean squared distance from every aligned point to its nearest target point.
///
/// Only pairs closer than `max_range` contribute. Returns `f64::MAX` when no
/// pair qualifies.
pub(crate) fn fitness_score(target: &PointIndex, aligned: &[[f64; 3]], max_range: f64) -> f64 {
    let max_range_sq = max_range * max_range;
    let (sum, count) = aligned
        .iter()
        .filter_map(|p| target.nearest(DVec3::from_array(*p)))
        .filter(|nn| nn.distance_sq <= max_range_sq)
        .fold((0.0, 0usize), |(sum, n), nn| (sum + nn.distance_sq, n + 1));

    if count == 0 {
        f64::MAX
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fitness_score() {
        let target = PointIndex::new(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let aligned = [[0.0, 0.1, 0.0], [1.0, 0.0, 0.3]];
        assert_relative_eq!(
            fitness_score(&target, &aligned, f64::MAX),
            (0.01 + 0.09) / 2.0,
            epsilon = 1e-12
        );
        // the far point is ignored
        assert_relative_eq!(fitness_score(&target, &aligned, 0.2), 0.01, epsilon = 1e-12);
    }

    #[test]
    fn test_fitness_without_pairs() {
        let target = PointIndex::new(&[[0.0, 0.0, 0.0]]);
        assert_eq!(fitness_score(&target, &[], f64::MAX), f64::MAX);
        assert_eq!(fitness_score(&target, &[[5.0, 0.0, 0.0]], 1.0), f64::MAX);
    }
}
