use std::collections::{BTreeMap, HashMap};

use glam::{DMat3, DVec3};
use regbench_3d::{pointcloud::PointCloud, voxel_grid::VoxelGrid};

use crate::{
    executor::Executor,
    fitness::fitness_score,
    linalg::{mean_and_covariance, point_jacobian, regularized_inverse},
    normal_equations::NormalEquations,
    search::PointIndex,
    NeighborSearchMethod, Registration, RegistrationError, RegistrationOptions,
    RegistrationVariant, RigidTransform,
};

// Face neighbours of a voxel, the voxel itself first.
const DIRECT7_OFFSETS: [(i64, i64, i64); 7] = [
    (0, 0, 0),
    (1, 0, 0),
    (-1, 0, 0),
    (0, 1, 0),
    (0, -1, 0),
    (0, 0, 1),
    (0, 0, -1),
];

/// Parameters of the NDT optimisation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NdtParams {
    /// Side length of the target voxels.
    pub resolution: f64,
    /// Maximum norm of a single pose increment.
    pub step_size: f64,
    /// Expected ratio of outliers, shapes the score function.
    pub outlier_ratio: f64,
    /// Maximum number of Gauss-Newton iterations.
    pub max_iterations: usize,
    /// The alignment has converged when the increment norm is below this value.
    pub transformation_epsilon: f64,
    /// Voxels with fewer points do not get a distribution.
    pub min_points_per_voxel: usize,
    /// Covariance eigenvalues are lifted to this fraction of the largest one.
    pub min_eigen_ratio: f64,
}

impl Default for NdtParams {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            step_size: 0.1,
            outlier_ratio: 0.55,
            max_iterations: 35,
            transformation_epsilon: 0.01,
            min_points_per_voxel: 6,
            min_eigen_ratio: 0.01,
        }
    }
}

impl NdtParams {
    // Gaussian fitting constants of the mixed normal/uniform score.
    fn gauss_constants(&self) -> (f64, f64) {
        let c1 = 10.0 * (1.0 - self.outlier_ratio);
        let c2 = self.outlier_ratio / self.resolution.powi(3);
        let d3 = -c2.ln();
        let d1 = -(c1 + c2).ln() - d3;
        let d2 = -2.0 * ((-(c1 * (-0.5f64).exp() + c2).ln() - d3) / d1).ln();
        (d1, d2)
    }
}

#[derive(Debug, Clone, Copy)]
struct Distribution {
    mean: DVec3,
    inv_cov: DMat3,
}

// The target cloud turned into per-voxel normal distributions.
#[derive(Debug)]
struct VoxelTarget {
    grid: VoxelGrid,
    distributions: Vec<Distribution>,
    by_voxel: HashMap<(i64, i64, i64), usize>,
    mean_index: PointIndex,
    point_index: PointIndex,
    points: Vec<[f64; 3]>,
}

impl VoxelTarget {
    fn new(points: Vec<[f64; 3]>, params: &NdtParams) -> Result<Self, RegistrationError> {
        let grid = VoxelGrid::new(DVec3::splat(params.resolution))
            .map_err(|e| RegistrationError::InvalidOption(e.to_string()))?;

        let mut voxels: BTreeMap<(i64, i64, i64), Vec<DVec3>> = BTreeMap::new();
        for p in points.iter().filter(|p| p.iter().all(|v| v.is_finite())) {
            voxels
                .entry(grid.get_voxel_index(p))
                .or_default()
                .push(DVec3::from_array(*p));
        }

        let mut distributions = Vec::new();
        let mut by_voxel = HashMap::new();
        for (key, voxel_points) in voxels {
            if voxel_points.len() < params.min_points_per_voxel {
                continue;
            }
            let Some((mean, cov)) = mean_and_covariance(voxel_points.iter().copied()) else {
                continue;
            };
            let Some(inv_cov) = regularized_inverse(&cov, params.min_eigen_ratio) else {
                continue;
            };
            by_voxel.insert(key, distributions.len());
            distributions.push(Distribution { mean, inv_cov });
        }
        log::debug!(
            "ndt target: {} points in {} distributions at resolution {}",
            points.len(),
            distributions.len(),
            params.resolution
        );

        let means = distributions
            .iter()
            .map(|d| d.mean.to_array())
            .collect::<Vec<_>>();

        Ok(Self {
            grid,
            distributions,
            by_voxel,
            mean_index: PointIndex::new(&means),
            point_index: PointIndex::new(&points),
            points,
        })
    }

    // Distributions considered for a transformed source point.
    fn neighbors(&self, q: DVec3, method: NeighborSearchMethod, radius: f64) -> Vec<usize> {
        match method {
            NeighborSearchMethod::KdTree => self
                .mean_index
                .within(q, radius)
                .into_iter()
                .map(|nn| nn.index)
                .collect(),
            NeighborSearchMethod::Direct7 => self.lookup(q, &DIRECT7_OFFSETS),
            NeighborSearchMethod::Direct1 => self.lookup(q, &DIRECT7_OFFSETS[..1]),
        }
    }

    fn lookup(&self, q: DVec3, offsets: &[(i64, i64, i64)]) -> Vec<usize> {
        let (x, y, z) = self.grid.get_voxel_index(&q.to_array());
        offsets
            .iter()
            .filter_map(|(dx, dy, dz)| self.by_voxel.get(&(x + dx, y + dy, z + dz)).copied())
            .collect()
    }
}

/// Normal Distributions Transform registration.
///
/// The target is summarised by one normal distribution per voxel and the
/// source is moved to maximise the likelihood of its points.
///
/// [`Ndt::new`] is single threaded and always finds distributions with a k-d
/// tree. [`Ndt::with_threads`] runs on a dedicated pool and honours every
/// [`RegistrationOptions`] field.
#[derive(Debug)]
pub struct Ndt {
    params: NdtParams,
    neighbor_search: NeighborSearchMethod,
    executor: Executor,
    target: Option<VoxelTarget>,
    source: Option<Vec<[f64; 3]>>,
    transformation: RigidTransform,
    fitness: f64,
    converged: bool,
    num_iterations: usize,
}

impl Default for Ndt {
    fn default() -> Self {
        Self::new()
    }
}

impl Ndt {
    /// Single threaded NDT.
    pub fn new() -> Self {
        Self::with_executor(Executor::Serial)
    }

    /// NDT running on a dedicated pool of `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> Result<Self, RegistrationError> {
        Ok(Self::with_executor(Executor::with_threads(num_threads)?))
    }

    fn with_executor(executor: Executor) -> Self {
        Self {
            params: NdtParams::default(),
            neighbor_search: NeighborSearchMethod::default(),
            executor,
            target: None,
            source: None,
            transformation: RigidTransform::IDENTITY,
            fitness: f64::MAX,
            converged: false,
            num_iterations: 0,
        }
    }

    /// Replace the optimisation parameters.
    ///
    /// Use [`Registration::reconfigure`] to change the resolution of a bound
    /// target.
    pub fn with_params(mut self, params: NdtParams) -> Self {
        self.params = params;
        self
    }

    /// The optimisation parameters.
    pub fn params(&self) -> &NdtParams {
        &self.params
    }

    /// The neighbour search used by the next alignment.
    pub fn neighbor_search(&self) -> NeighborSearchMethod {
        match self.executor {
            Executor::Serial => NeighborSearchMethod::KdTree,
            Executor::Pool(_) => self.neighbor_search,
        }
    }

    /// Number of threads used by the inner loops.
    pub fn num_threads(&self) -> usize {
        self.executor.num_threads()
    }

    /// Number of voxels of the bound target holding a distribution.
    pub fn num_distributions(&self) -> usize {
        self.target.as_ref().map_or(0, |t| t.distributions.len())
    }

    /// Iterations performed by the last alignment.
    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    fn linearize(
        &self,
        target: &VoxelTarget,
        source: &[[f64; 3]],
        transform: &RigidTransform,
    ) -> NormalEquations {
        let (d1, d2) = self.params.gauss_constants();
        let method = self.neighbor_search();
        let radius = self.params.resolution;

        self.executor.fold_reduce(
            source.len(),
            NormalEquations::default,
            |mut acc, i| {
                let q = transform.transform_point(DVec3::from_array(source[i]));
                let jacobian = point_jacobian(q);
                for cell in target.neighbors(q, method, radius) {
                    let distribution = &target.distributions[cell];
                    let residual = q - distribution.mean;
                    let mahalanobis = residual.dot(distribution.inv_cov * residual);
                    let likelihood = (-d2 * mahalanobis / 2.0).exp();
                    if !likelihood.is_finite() {
                        continue;
                    }
                    // -d1 * d2 > 0, so the weight stays positive definite
                    let weight = distribution.inv_cov * (-d1 * d2 * likelihood);
                    acc.add(&jacobian, &weight, residual, d1 * likelihood);
                }
                acc
            },
            NormalEquations::merge,
        )
    }
}

impl Registration for Ndt {
    fn variant(&self) -> RegistrationVariant {
        match self.executor {
            Executor::Serial => RegistrationVariant::Ndt,
            Executor::Pool(_) => RegistrationVariant::ParallelNdt,
        }
    }

    fn set_input_target(&mut self, target: &PointCloud) -> Result<(), RegistrationError> {
        if target.is_empty() {
            return Err(RegistrationError::EmptyPointCloud("target"));
        }
        if target.len() < self.params.min_points_per_voxel {
            return Err(RegistrationError::InsufficientPoints {
                which: "target",
                required: self.params.min_points_per_voxel,
                actual: target.len(),
            });
        }
        self.target = Some(VoxelTarget::new(target.points().to_vec(), &self.params)?);
        Ok(())
    }

    fn set_input_source(&mut self, source: &PointCloud) -> Result<(), RegistrationError> {
        if source.is_empty() {
            return Err(RegistrationError::EmptyPointCloud("source"));
        }
        self.source = Some(source.points().to_vec());
        Ok(())
    }

    fn align(&mut self) -> Result<PointCloud, RegistrationError> {
        let target = self
            .target
            .as_ref()
            .ok_or(RegistrationError::MissingInput("target"))?;
        let source = self
            .source
            .as_deref()
            .ok_or(RegistrationError::MissingInput("source"))?;

        let mut transform = RigidTransform::IDENTITY;
        let mut converged = false;
        let mut num_iterations = 0;

        for iteration in 0..self.params.max_iterations {
            num_iterations = iteration + 1;

            let equations = self.linearize(target, source, &transform);
            log::debug!(
                "{} iteration {iteration}: {} correspondences, score {:.6}",
                self.variant(),
                equations.num_correspondences,
                -equations.cost
            );
            if equations.num_correspondences == 0 {
                log::debug!("{}: no distributions near the source, stopping", self.variant());
                break;
            }
            let Some(mut delta) = equations.solve() else {
                log::debug!("{}: degenerate system, stopping", self.variant());
                break;
            };

            let norm = delta.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > self.params.step_size {
                delta.iter_mut().for_each(|v| *v *= self.params.step_size / norm);
            }
            transform = RigidTransform::from_twist(&delta).compose(&transform);

            if norm < self.params.transformation_epsilon {
                converged = true;
                break;
            }
        }

        let aligned = transform.transform_points(source);
        let fitness = fitness_score(&target.point_index, &aligned, f64::MAX);
        log::debug!(
            "{} ({}) finished after {num_iterations} iterations, converged: {converged}, fitness: {fitness}",
            self.variant(),
            self.neighbor_search()
        );

        self.transformation = transform;
        self.fitness = fitness;
        self.converged = converged;
        self.num_iterations = num_iterations;

        Ok(PointCloud::from_points(aligned))
    }

    fn fitness_score(&self) -> f64 {
        self.fitness
    }

    fn final_transformation(&self) -> RigidTransform {
        self.transformation
    }

    fn has_converged(&self) -> bool {
        self.converged
    }

    fn reconfigure(&mut self, options: &RegistrationOptions) -> Result<(), RegistrationError> {
        options.validate()?;

        if let Some(resolution) = options.resolution {
            if resolution != self.params.resolution {
                self.params.resolution = resolution;
                if let Some(target) = self.target.take() {
                    self.target = Some(VoxelTarget::new(target.points, &self.params)?);
                }
            }
        }

        let is_parallel = matches!(self.executor, Executor::Pool(_));
        if !is_parallel {
            return Ok(());
        }
        if let Some(neighbor_search) = options.neighbor_search {
            self.neighbor_search = neighbor_search;
        }
        if let Some(num_threads) = options.thread_count {
            if num_threads != self.executor.num_threads() {
                log::debug!("{}: rebuilding pool with {num_threads} threads", self.variant());
                self.executor = Executor::with_threads(num_threads)?;
            }
        }
        Ok(())
    }
}
