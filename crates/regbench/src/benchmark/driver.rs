use std::time::{Duration, Instant};

use regbench_3d::pointcloud::PointCloud;
use regbench_registration::{Registration, RegistrationError, RigidTransform};

/// Number of alignments timed by the repeated pass of [`run`].
pub const DEFAULT_REPETITIONS: usize = 10;

/// Outcome of timing one registration configuration.
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    /// The source cloud moved by the final transformation.
    pub aligned: PointCloud,
    /// Fitness score of the last alignment, lower is better.
    pub fitness: f64,
    /// Transformation estimated by the last alignment.
    pub transformation: RigidTransform,
    /// Whether the last alignment converged.
    pub converged: bool,
    /// Wall clock time of the first alignment.
    pub single_run_time: Duration,
    /// Aggregate wall clock time of the repeated alignments.
    pub repeated_run_time: Duration,
    /// Number of alignments in the repeated pass.
    pub repetitions: usize,
}

/// Bind the inputs, time one alignment, then time [`DEFAULT_REPETITIONS`]
/// more on the same bound state.
pub fn run(
    registration: &mut dyn Registration,
    target: &PointCloud,
    source: &PointCloud,
) -> Result<RegistrationResult, RegistrationError> {
    run_with_repetitions(registration, target, source, DEFAULT_REPETITIONS)
}

/// Same as [`run`] with a custom number of repeated alignments.
pub fn run_with_repetitions(
    registration: &mut dyn Registration,
    target: &PointCloud,
    source: &PointCloud,
    repetitions: usize,
) -> Result<RegistrationResult, RegistrationError> {
    registration.set_input_target(target)?;
    registration.set_input_source(source)?;

    let start = Instant::now();
    let mut aligned = registration.align()?;
    let single_run_time = start.elapsed();

    let start = Instant::now();
    for _ in 0..repetitions {
        aligned = registration.align()?;
    }
    let repeated_run_time = start.elapsed();

    log::debug!(
        "{}: single {single_run_time:?}, {repetitions} times {repeated_run_time:?}",
        registration.variant()
    );

    Ok(RegistrationResult {
        aligned,
        fitness: registration.fitness_score(),
        transformation: registration.final_transformation(),
        converged: registration.has_converged(),
        single_run_time,
        repeated_run_time,
        repetitions,
    })
}
