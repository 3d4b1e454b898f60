use std::num::NonZero;

use glam::DVec3;
use kiddo::{immutable::float::kdtree::ImmutableKdTree, SquaredEuclidean};

/// A neighbour returned by [`PointIndex`] queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Neighbor {
    /// Index of the point in the indexed slice.
    pub index: usize,
    /// Squared euclidean distance to the query.
    pub distance_sq: f64,
}

/// K-d tree over a slice of points, answering queries with point indices.
///
/// The tree is balanced once at construction, so any number of points may
/// share a coordinate (flat floors, walls, voxel grid output).
pub(crate) struct PointIndex {
    tree: ImmutableKdTree<f64, u32, 3, 32>,
    len: usize,
}

impl std::fmt::Debug for PointIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointIndex").field("len", &self.len).finish()
    }
}

impl PointIndex {
    pub fn new(points: &[[f64; 3]]) -> Self {
        Self {
            tree: ImmutableKdTree::new_from_slice(points),
            len: points.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The closest indexed point, `None` when the index is empty.
    pub fn nearest(&self, query: DVec3) -> Option<Neighbor> {
        if self.is_empty() {
            return None;
        }
        let nn = self
            .tree
            .nearest_one::<SquaredEuclidean>(&query.to_array());
        Some(Neighbor {
            index: nn.item as usize,
            distance_sq: nn.distance,
        })
    }

    /// The `k` closest points sorted by distance.
    pub fn nearest_k(&self, query: DVec3, k: usize) -> Vec<Neighbor> {
        let Some(k) = NonZero::new(k.min(self.len)) else {
            return Vec::new();
        };
        self.tree
            .nearest_n::<SquaredEuclidean>(&query.to_array(), k)
            .into_iter()
            .map(|nn| Neighbor {
                index: nn.item as usize,
                distance_sq: nn.distance,
            })
            .collect()
    }

    /// Every point within `radius` of the query, in no particular order.
    pub fn within(&self, query: DVec3, radius: f64) -> Vec<Neighbor> {
        if self.is_empty() {
            return Vec::new();
        }
        self.tree
            .within_unsorted::<SquaredEuclidean>(&query.to_array(), radius * radius)
            .into_iter()
            .map(|nn| Neighbor {
                index: nn.item as usize,
                distance_sq: nn.distance,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // unit grid with a tiny per-point jitter so no two points share a coordinate
    fn grid() -> Vec<[f64; 3]> {
        let mut points = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                for k in 0..5 {
                    let n = points.len() as f64;
                    points.push([
                        i as f64 + 1e-6 * n,
                        j as f64 + 2e-6 * n,
                        k as f64 + 3e-6 * n,
                    ]);
                }
            }
        }
        points
    }

    #[test]
    fn test_nearest() {
        let points = grid();
        let index = PointIndex::new(&points);
        assert_eq!(index.len(), 125);

        let nn = index.nearest(DVec3::new(2.1, 2.9, 0.2)).unwrap();
        assert_eq!(nn.index, 2 * 25 + 3 * 5);
        assert!((nn.distance_sq - 0.06).abs() < 1e-3);
    }

    #[test]
    fn test_nearest_k_sorted() {
        let index = PointIndex::new(&grid());
        let neighbors = index.nearest_k(DVec3::new(2.0, 2.0, 2.0), 7);
        assert_eq!(neighbors.len(), 7);
        assert!(neighbors[0].distance_sq < 1e-6);
        assert!(neighbors[1..].iter().all(|n| (n.distance_sq - 1.0).abs() < 1e-2));
    }

    #[test]
    fn test_within_radius() {
        let index = PointIndex::new(&grid());
        let neighbors = index.within(DVec3::new(0.0, 0.0, 0.0), 1.01);
        assert_eq!(neighbors.len(), 4);
    }

    #[test]
    fn test_planar_grid() {
        // 400 points sharing z = 0 and 20 points per x and y value
        let points = (0..400)
            .map(|i| [(i % 20) as f64 * 0.1, (i / 20) as f64 * 0.1, 0.0])
            .collect::<Vec<_>>();
        let index = PointIndex::new(&points);
        assert_eq!(index.len(), 400);

        let nn = index.nearest(DVec3::new(0.51, 0.69, 0.05)).unwrap();
        assert_eq!(nn.index, 7 * 20 + 5);
        assert_eq!(index.nearest_k(DVec3::new(1.0, 1.0, 0.0), 5).len(), 5);
        assert_eq!(index.within(DVec3::new(1.0, 1.0, 0.0), 0.101).len(), 5);
    }

    #[test]
    fn test_duplicate_points() {
        let index = PointIndex::new(&vec![[1.0, 2.0, 3.0]; 100]);
        let neighbors = index.nearest_k(DVec3::new(1.0, 2.0, 3.0), 20);
        assert_eq!(neighbors.len(), 20);
        assert!(neighbors.iter().all(|n| n.distance_sq == 0.0));
    }

    #[test]
    fn test_empty_index() {
        let index = PointIndex::new(&[]);
        assert!(index.nearest(DVec3::ZERO).is_none());
        assert!(index.nearest_k(DVec3::ZERO, 3).is_empty());
        assert!(index.within(DVec3::ZERO, 1.0).is_empty());
    }
}
