use std::collections::BTreeMap;

use glam::DVec3;

use crate::pointcloud::PointCloud;

/// Error types for the voxel grid.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VoxelGridError {
    /// The leaf size must be finite and strictly positive on every axis.
    #[error("Leaf size must be positive in all dimensions. Got: {0:?}")]
    InvalidLeafSize([f64; 3]),
}

/// Running sums of the points falling into one voxel.
#[derive(Debug, Default)]
struct VoxelAccumulator {
    point_sum: DVec3,
    color_sum: [u64; 3],
    normal_sum: DVec3,
    count: usize,
}

/// A 3D voxel grid for downsampling point clouds.
///
/// Every occupied voxel is replaced by the centroid of its points. The output
/// is ordered by voxel index, so the same input always yields the same cloud.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    /// The size of the voxel (leaf) in x, y, z dimensions.
    leaf_size: DVec3,
    /// Minimum number of points required per voxel.
    min_points_per_voxel: usize,
}

impl VoxelGrid {
    /// Creates a new `VoxelGrid` with the specified leaf size.
    ///
    /// # Arguments
    /// * `leaf_size` - The size of the voxel in x, y, z dimensions.
    ///
    /// # Errors
    /// Returns [`VoxelGridError::InvalidLeafSize`] if any dimension is non-positive or not finite.
    pub fn new(leaf_size: DVec3) -> Result<Self, VoxelGridError> {
        Self::check_leaf_size(leaf_size)?;
        Ok(VoxelGrid {
            leaf_size,
            min_points_per_voxel: 1,
        })
    }

    /// Drop voxels holding fewer than `min_points` points.
    pub fn with_min_points_per_voxel(mut self, min_points: usize) -> Self {
        self.min_points_per_voxel = min_points;
        self
    }

    fn check_leaf_size(leaf_size: DVec3) -> Result<(), VoxelGridError> {
        if !leaf_size.is_finite() || leaf_size.min_element() <= 0.0 {
            return Err(VoxelGridError::InvalidLeafSize(leaf_size.to_array()));
        }
        Ok(())
    }

    /// Downsamples the input point cloud by grouping points into voxels and computing centroids.
    ///
    /// Points with non-finite coordinates are dropped, so a cloud holding only
    /// such points yields an empty output. The input is not modified.
    ///
    /// # Arguments
    /// * `point_cloud` - The input point cloud to downsample.
    ///
    /// # Returns
    /// A new `PointCloud` containing the downsampled points, and optionally colors and normals.
    pub fn downsample(&self, point_cloud: &PointCloud) -> PointCloud {
        let colors_in = point_cloud.colors();
        let normals_in = point_cloud.normals();

        let mut grid: BTreeMap<(i64, i64, i64), VoxelAccumulator> = BTreeMap::new();

        // Group points into voxels
        for (i, point) in point_cloud.points().iter().enumerate() {
            let point_vec = DVec3::from_array(*point);
            if !point_vec.is_finite() {
                continue;
            }

            let entry = grid.entry(self.get_voxel_index(point)).or_default();
            entry.point_sum += point_vec;
            entry.count += 1;

            if let Some(color) = colors_in.and_then(|colors| colors.get(i)) {
                for (sum, c) in entry.color_sum.iter_mut().zip(color) {
                    *sum += *c as u64;
                }
            }
            if let Some(normal) = normals_in.and_then(|normals| normals.get(i)) {
                entry.normal_sum += DVec3::from_array(*normal);
            }
        }

        // Compute centroids for each voxel
        let mut points = Vec::with_capacity(grid.len());
        let mut colors = colors_in.map(|_| Vec::with_capacity(grid.len()));
        let mut normals = normals_in.map(|_| Vec::with_capacity(grid.len()));

        for voxel in grid.values() {
            if voxel.count < self.min_points_per_voxel {
                continue;
            }
            let inv_count = 1.0 / voxel.count as f64;
            points.push((voxel.point_sum * inv_count).to_array());

            if let Some(colors_vec) = colors.as_mut() {
                colors_vec.push(
                    voxel
                        .color_sum
                        .map(|sum| (sum as f64 * inv_count).round() as u8),
                );
            }
            if let Some(normals_vec) = normals.as_mut() {
                let normal = voxel.normal_sum * inv_count;
                normals_vec.push(normal.try_normalize().unwrap_or(normal).to_array());
            }
        }

        log::debug!(
            "voxel grid reduced {} points to {} voxels",
            point_cloud.len(),
            points.len()
        );

        PointCloud::new(points, colors, normals)
    }

    /// Computes the voxel index for a given point.
    ///
    /// # Arguments
    /// * `point` - The input point as `[x, y, z]`.
    ///
    /// # Returns
    /// The voxel index as `(i64, i64, i64)`.
    pub fn get_voxel_index(&self, point: &[f64; 3]) -> (i64, i64, i64) {
        let index = (DVec3::from_array(*point) / self.leaf_size).floor();
        (index.x as i64, index.y as i64, index.z as i64)
    }
}
