use glam::{DMat3, DVec3};
use regbench_3d::pointcloud::PointCloud;

use crate::{
    executor::Executor,
    fitness::fitness_score,
    linalg::{mean_and_covariance, plane_regularized, point_jacobian},
    normal_equations::NormalEquations,
    search::PointIndex,
    Registration, RegistrationError, RegistrationOptions, RegistrationVariant, RigidTransform,
};

/// Parameters of the GICP optimisation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GicpParams {
    /// Number of neighbours used to estimate each point covariance.
    pub k_correspondences: usize,
    /// Maximum number of Gauss-Newton iterations.
    pub max_iterations: usize,
    /// The alignment has converged when both the rotation angle and the
    /// translation norm of an increment are below this value.
    pub transformation_epsilon: f64,
    /// Correspondences farther apart than this are rejected.
    pub max_correspondence_distance: f64,
    /// Smallest eigenvalue of the plane-regularized covariances.
    pub covariance_epsilon: f64,
}

impl Default for GicpParams {
    fn default() -> Self {
        Self {
            k_correspondences: 20,
            max_iterations: 64,
            transformation_epsilon: 1e-4,
            max_correspondence_distance: 5.0,
            covariance_epsilon: 1e-3,
        }
    }
}

// A cloud with one plane-regularized covariance per point.
#[derive(Debug)]
struct CovarianceCloud {
    points: Vec<[f64; 3]>,
    covariances: Vec<DMat3>,
    index: PointIndex,
}

impl CovarianceCloud {
    fn new(
        which: &'static str,
        cloud: &PointCloud,
        params: &GicpParams,
        executor: &Executor,
    ) -> Result<Self, RegistrationError> {
        if cloud.is_empty() {
            return Err(RegistrationError::EmptyPointCloud(which));
        }
        if cloud.len() < params.k_correspondences {
            return Err(RegistrationError::InsufficientPoints {
                which,
                required: params.k_correspondences,
                actual: cloud.len(),
            });
        }

        let points = cloud.points().to_vec();
        let index = PointIndex::new(&points);
        let covariances = executor.map_collect(points.len(), |i| {
            let neighbors = index.nearest_k(DVec3::from_array(points[i]), params.k_correspondences);
            let neighborhood = neighbors
                .iter()
                .map(|nn| DVec3::from_array(points[nn.index]));
            match mean_and_covariance(neighborhood) {
                Some((_, cov)) => plane_regularized(&cov, params.covariance_epsilon),
                None => DMat3::IDENTITY,
            }
        });

        Ok(Self {
            points,
            covariances,
            index,
        })
    }
}

/// Generalized ICP: plane-to-plane registration with per-point covariances.
///
/// [`Gicp::new`] runs every pass on the calling thread. [`Gicp::with_threads`]
/// builds a dedicated thread pool for the covariance estimation and the
/// linearization, and honours thread count changes in
/// [`Registration::reconfigure`].
#[derive(Debug)]
pub struct Gicp {
    params: GicpParams,
    executor: Executor,
    target: Option<CovarianceCloud>,
    source: Option<CovarianceCloud>,
    transformation: RigidTransform,
    fitness: f64,
    converged: bool,
    num_iterations: usize,
}

impl Default for Gicp {
    fn default() -> Self {
        Self::new()
    }
}

impl Gicp {
    /// Single threaded GICP.
    pub fn new() -> Self {
        Self::with_executor(Executor::Serial)
    }

    /// GICP running on a dedicated pool of `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> Result<Self, RegistrationError> {
        Ok(Self::with_executor(Executor::with_threads(num_threads)?))
    }

    fn with_executor(executor: Executor) -> Self {
        Self {
            params: GicpParams::default(),
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
    /// Inputs bound before the call keep the covariances they were built with.
    pub fn with_params(mut self, params: GicpParams) -> Self {
        self.params = params;
        self
    }

    /// The optimisation parameters.
    pub fn params(&self) -> &GicpParams {
        &self.params
    }

    /// Number of threads used by the inner loops.
    pub fn num_threads(&self) -> usize {
        self.executor.num_threads()
    }

    /// Iterations performed by the last alignment.
    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    fn linearize(
        &self,
        target: &CovarianceCloud,
        source: &CovarianceCloud,
        transform: &RigidTransform,
    ) -> NormalEquations {
        let max_dist_sq = self.params.max_correspondence_distance.powi(2);
        self.executor.fold_reduce(
            source.points.len(),
            NormalEquations::default,
            |mut acc, i| {
                let q = transform.transform_point(DVec3::from_array(source.points[i]));
                let Some(nn) = target.index.nearest(q) else {
                    return acc;
                };
                if nn.distance_sq > max_dist_sq {
                    return acc;
                }

                let rotation = transform.rotation;
                let combined = target.covariances[nn.index]
                    + rotation * source.covariances[i] * rotation.transpose();
                if combined.determinant().abs() < f64::EPSILON {
                    return acc;
                }
                let weight = combined.inverse();

                let residual = q - DVec3::from_array(target.points[nn.index]);
                let cost = residual.dot(weight * residual);
                acc.add(&point_jacobian(q), &weight, residual, cost);
                acc
            },
            NormalEquations::merge,
        )
    }
}

impl Registration for Gicp {
    fn variant(&self) -> RegistrationVariant {
        match self.executor {
            Executor::Serial => RegistrationVariant::Gicp,
            Executor::Pool(_) => RegistrationVariant::ParallelGicp,
        }
    }

    fn set_input_target(&mut self, target: &PointCloud) -> Result<(), RegistrationError> {
        self.target = Some(CovarianceCloud::new(
            "target",
            target,
            &self.params,
            &self.executor,
        )?);
        Ok(())
    }

    fn set_input_source(&mut self, source: &PointCloud) -> Result<(), RegistrationError> {
        self.source = Some(CovarianceCloud::new(
            "source",
            source,
            &self.params,
            &self.executor,
        )?);
        Ok(())
    }

    fn align(&mut self) -> Result<PointCloud, RegistrationError> {
        let target = self
            .target
            .as_ref()
            .ok_or(RegistrationError::MissingInput("target"))?;
        let source = self
            .source
            .as_ref()
            .ok_or(RegistrationError::MissingInput("source"))?;

        let mut transform = RigidTransform::IDENTITY;
        let mut converged = false;
        let mut num_iterations = 0;

        for iteration in 0..self.params.max_iterations {
            num_iterations = iteration + 1;

            let equations = self.linearize(target, source, &transform);
            log::debug!(
                "{} iteration {iteration}: {} correspondences, cost {:.6}",
                self.variant(),
                equations.num_correspondences,
                equations.cost
            );
            if equations.num_correspondences == 0 {
                log::debug!("{}: no correspondences, stopping", self.variant());
                break;
            }
            let Some(delta) = equations.solve() else {
                log::debug!("{}: degenerate system, stopping", self.variant());
                break;
            };

            let increment = RigidTransform::from_twist(&delta);
            transform = increment.compose(&transform);

            if increment.rotation_angle() < self.params.transformation_epsilon
                && increment.translation.length() < self.params.transformation_epsilon
            {
                converged = true;
                break;
            }
        }

        let aligned = transform.transform_points(&source.points);
        let fitness = fitness_score(&target.index, &aligned, f64::MAX);
        log::debug!(
            "{} finished after {num_iterations} iterations, converged: {converged}, fitness: {fitness}",
            self.variant()
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
        let is_parallel = matches!(self.executor, Executor::Pool(_));
        if let (true, Some(num_threads)) = (is_parallel, options.thread_count) {
            if num_threads != self.executor.num_threads() {
                log::debug!("{}: rebuilding pool with {num_threads} threads", self.variant());
                self.executor = Executor::with_threads(num_threads)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_transform_near, displaced_pair, grid_corner, ground_truth};

    #[test]
    fn test_align_recovers_transform() -> Result<(), RegistrationError> {
        let (target, source) = displaced_pair(300, 7);
        let mut gicp = Gicp::new();
        gicp.set_input_target(&PointCloud::from_points(target))?;
        gicp.set_input_source(&PointCloud::from_points(source.clone()))?;

        let aligned = gicp.align()?;
        assert_eq!(aligned.len(), source.len());
        assert_transform_near(&gicp.final_transformation(), &ground_truth(), 1e-3, 1e-3);
        assert!(gicp.fitness_score() < 1e-6);
        assert!(gicp.has_converged());
        Ok(())
    }

    #[test]
    fn test_parallel_matches_serial() -> Result<(), RegistrationError> {
        let (target, source) = displaced_pair(200, 3);
        let target = PointCloud::from_points(target);
        let source = PointCloud::from_points(source);

        let mut serial = Gicp::new();
        let mut parallel = Gicp::with_threads(2)?;
        assert_eq!(serial.variant(), RegistrationVariant::Gicp);
        assert_eq!(parallel.variant(), RegistrationVariant::ParallelGicp);

        for gicp in [&mut serial, &mut parallel] {
            gicp.set_input_target(&target)?;
            gicp.set_input_source(&source)?;
            gicp.align()?;
        }
        assert_transform_near(
            &serial.final_transformation(),
            &parallel.final_transformation(),
            1e-6,
            1e-6,
        );
        Ok(())
    }

    #[test]
    fn test_align_exact_planes() -> Result<(), RegistrationError> {
        let target = grid_corner(15, 0.1);
        let source = target
            .iter()
            .map(|p| [p[0] + 0.03, p[1] - 0.02, p[2] + 0.01])
            .collect::<Vec<_>>();

        for mut gicp in [Gicp::new(), Gicp::with_threads(2)?] {
            gicp.set_input_target(&PointCloud::from_points(target.clone()))?;
            gicp.set_input_source(&PointCloud::from_points(source.clone()))?;
            let aligned = gicp.align()?;
            assert_eq!(aligned.len(), source.len());
            assert!(gicp.fitness_score().is_finite());
        }
        Ok(())
    }

    #[test]
    fn test_repeated_align_is_stable() -> Result<(), RegistrationError> {
        let (target, source) = displaced_pair(200, 11);
        let mut gicp = Gicp::new();
        gicp.set_input_target(&PointCloud::from_points(target))?;
        gicp.set_input_source(&PointCloud::from_points(source))?;

        let first = gicp.align()?;
        let first_fitness = gicp.fitness_score();
        let second = gicp.align()?;
        assert_eq!(first, second);
        assert_eq!(first_fitness, gicp.fitness_score());
        Ok(())
    }

    #[test]
    fn test_missing_and_small_inputs() {
        let mut gicp = Gicp::new();
        assert!(matches!(
            gicp.align(),
            Err(RegistrationError::MissingInput("target"))
        ));
        assert!(matches!(
            gicp.set_input_target(&PointCloud::default()),
            Err(RegistrationError::EmptyPointCloud("target"))
        ));
        let few = PointCloud::from_points(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        assert!(matches!(
            gicp.set_input_source(&few),
            Err(RegistrationError::InsufficientPoints { required: 20, actual: 2, .. })
        ));
        assert_eq!(gicp.fitness_score(), f64::MAX);
    }

    #[test]
    fn test_reconfigure_threads() -> Result<(), RegistrationError> {
        let mut parallel = Gicp::with_threads(1)?;
        parallel.reconfigure(&RegistrationOptions::default().with_thread_count(3))?;
        assert_eq!(parallel.num_threads(), 3);

        let mut serial = Gicp::new();
        serial.reconfigure(&RegistrationOptions::default().with_thread_count(3))?;
        assert_eq!(serial.num_threads(), 1);

        assert!(serial
            .reconfigure(&RegistrationOptions::default().with_thread_count(0))
            .is_err());
        Ok(())
    }
}
