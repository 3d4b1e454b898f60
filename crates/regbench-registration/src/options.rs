use std::fmt;

use crate::RegistrationError;

/// How NDT finds the target distributions close to a source point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NeighborSearchMethod {
    /// Radius search over the voxel centroids with a k-d tree.
    #[default]
    KdTree,
    /// The voxel containing the point plus its six face neighbours.
    Direct7,
    /// Only the voxel containing the point.
    Direct1,
}

impl NeighborSearchMethod {
    /// Every search method, in sweep order.
    pub const ALL: [NeighborSearchMethod; 3] = [
        NeighborSearchMethod::KdTree,
        NeighborSearchMethod::Direct7,
        NeighborSearchMethod::Direct1,
    ];

    /// Upper-case name used in reports and artifact names.
    pub fn as_str(&self) -> &'static str {
        match self {
            NeighborSearchMethod::KdTree => "KDTREE",
            NeighborSearchMethod::Direct7 => "DIRECT7",
            NeighborSearchMethod::Direct1 => "DIRECT1",
        }
    }
}

impl fmt::Display for NeighborSearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The registration algorithms available to the benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationVariant {
    /// Single threaded GICP.
    Gicp,
    /// GICP on a dedicated thread pool.
    ParallelGicp,
    /// Single threaded NDT with k-d tree neighbour search.
    Ndt,
    /// NDT on a dedicated thread pool with a selectable neighbour search.
    ParallelNdt,
}

impl RegistrationVariant {
    /// Human readable label printed in benchmark headers.
    pub fn label(&self) -> &'static str {
        match self {
            RegistrationVariant::Gicp => "pcl::GICP",
            RegistrationVariant::ParallelGicp => "pclomp::GICP",
            RegistrationVariant::Ndt => "pcl::NDT",
            RegistrationVariant::ParallelNdt => "pclomp::NDT",
        }
    }

    /// Prefix of the artifact files written for this variant.
    pub fn artifact_prefix(&self) -> &'static str {
        match self {
            RegistrationVariant::Gicp => "pcl_gicp",
            RegistrationVariant::ParallelGicp => "pclomp_gicp",
            RegistrationVariant::Ndt => "pcl_ndt",
            RegistrationVariant::ParallelNdt => "pclomp_ndt",
        }
    }
}

impl fmt::Display for RegistrationVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Options applied to a registration algorithm with
/// [`crate::Registration::reconfigure`].
///
/// Fields left as `None` keep the current value. Options a variant does not
/// support are ignored by it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RegistrationOptions {
    /// NDT voxel resolution.
    pub resolution: Option<f64>,
    /// Number of worker threads.
    pub thread_count: Option<usize>,
    /// NDT neighbour search strategy.
    pub neighbor_search: Option<NeighborSearchMethod>,
}

impl RegistrationOptions {
    /// Set the NDT voxel resolution.
    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Set the number of worker threads.
    pub fn with_thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = Some(thread_count);
        self
    }

    /// Set the NDT neighbour search strategy.
    pub fn with_neighbor_search(mut self, neighbor_search: NeighborSearchMethod) -> Self {
        self.neighbor_search = Some(neighbor_search);
        self
    }

    /// Check the values independently of the variant they are applied to.
    pub fn validate(&self) -> Result<(), RegistrationError> {
        if let Some(resolution) = self.resolution {
            if !resolution.is_finite() || resolution <= 0.0 {
                return Err(RegistrationError::InvalidOption(format!(
                    "resolution must be > 0, got {resolution}"
                )));
            }
        }
        if self.thread_count == Some(0) {
            return Err(RegistrationError::InvalidOption(
                "thread count must be > 0, got 0".to_string(),
            ));
        }
        Ok(())
    }
}
