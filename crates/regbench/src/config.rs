use std::path::{Path, PathBuf};

use glam::DVec3;
use regbench_3d::voxel_grid::{VoxelGrid, VoxelGridError};
use regbench_registration::available_threads;
use serde::{Deserialize, Serialize};

/// Errors raised while loading or validating [`BenchmarkSettings`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("Failed to read settings file. {0}")]
    Io(#[from] std::io::Error),

    /// The settings file is not valid JSON for the settings schema.
    #[error("Failed to parse settings. {0}")]
    Parse(#[from] serde_json::Error),

    /// A setting has an unusable value.
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Knobs of a benchmark session.
///
/// Every field has a default, so a settings file only needs the fields it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkSettings {
    /// Directory receiving the `<name>_{source,target,aligned}.pcd` artifacts.
    pub output_dir: PathBuf,
    /// Voxel size used to downsample both input clouds.
    pub leaf_size: [f64; 3],
    /// Voxels with fewer input points are dropped by the downsampler.
    pub min_points_per_voxel: usize,
    /// NDT voxel resolution.
    pub ndt_resolution: f64,
    /// Number of alignments in the repeated timing pass.
    pub repetitions: usize,
    /// Thread counts swept by the parallel NDT runs. `None` sweeps
    /// `[1, available_threads()]`.
    pub thread_counts: Option<Vec<usize>>,
    /// Whether aligned clouds are written to `output_dir`.
    pub save_artifacts: bool,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("/tmp/pcd"),
            leaf_size: [0.1, 0.1, 0.1],
            min_points_per_voxel: 1,
            ndt_resolution: 1.0,
            repetitions: 10,
            thread_counts: None,
            save_artifacts: true,
        }
    }
}

impl BenchmarkSettings {
    /// Load settings from a JSON file and validate them.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path.as_ref())?;
        let settings: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check every field for usable values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repetitions == 0 {
            return Err(ConfigError::Invalid("repetitions must be > 0".to_string()));
        }
        if self.leaf_size.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "leaf size must be positive, got {:?}",
                self.leaf_size
            )));
        }
        if self.min_points_per_voxel == 0 {
            return Err(ConfigError::Invalid(
                "min points per voxel must be > 0".to_string(),
            ));
        }
        if !self.ndt_resolution.is_finite() || self.ndt_resolution <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "ndt resolution must be positive, got {}",
                self.ndt_resolution
            )));
        }
        if let Some(thread_counts) = &self.thread_counts {
            if thread_counts.is_empty() || thread_counts.contains(&0) {
                return Err(ConfigError::Invalid(format!(
                    "thread counts must be a non-empty list of positive numbers, got {thread_counts:?}"
                )));
            }
        }
        Ok(())
    }

    /// The thread counts to sweep, duplicates removed while keeping order.
    pub fn resolved_thread_counts(&self) -> Vec<usize> {
        let requested = self
            .thread_counts
            .clone()
            .unwrap_or_else(|| vec![1, available_threads()]);

        let mut counts = Vec::with_capacity(requested.len());
        for n in requested {
            if !counts.contains(&n) {
                counts.push(n);
            }
        }
        counts
    }

    /// The downsampling filter described by `leaf_size` and `min_points_per_voxel`.
    pub fn voxel_grid(&self) -> Result<VoxelGrid, VoxelGridError> {
        Ok(VoxelGrid::new(DVec3::from_array(self.leaf_size))?
            .with_min_points_per_voxel(self.min_points_per_voxel))
    }
}
