use std::{
    fmt,
    path::{Path, PathBuf},
};

use regbench_3d::{io::pcd::write_pcd_ascii, pointcloud::PointCloud};
use regbench_registration::{
    available_threads, Gicp, NeighborSearchMethod, Ndt, Registration, RegistrationError,
    RegistrationOptions, RegistrationVariant,
};

use super::driver::{run_with_repetitions, RegistrationResult};
use crate::config::BenchmarkSettings;

/// One entry of the benchmark sweep: an algorithm and the options it runs with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchmarkConfiguration {
    /// The algorithm.
    pub variant: RegistrationVariant,
    /// Options applied before the run.
    pub options: RegistrationOptions,
}

impl BenchmarkConfiguration {
    /// Create a configuration.
    pub fn new(variant: RegistrationVariant, options: RegistrationOptions) -> Self {
        Self { variant, options }
    }

    /// Artifact name, unique within a sweep.
    ///
    /// Parallel NDT runs are named `pclomp_ndt_<SEARCH>_<N>_threads`, the other
    /// variants use their artifact prefix.
    pub fn name(&self) -> String {
        let prefix = self.variant.artifact_prefix();
        match self.variant {
            RegistrationVariant::ParallelNdt => format!(
                "{prefix}_{}_{}_threads",
                self.options.neighbor_search.unwrap_or_default(),
                self.thread_count()
            ),
            _ => prefix.to_string(),
        }
    }

    /// Human readable label, e.g. `pclomp::NDT (KDTREE, 8 threads)`.
    pub fn label(&self) -> String {
        match self.variant {
            RegistrationVariant::ParallelNdt => format!(
                "{} ({}, {} threads)",
                self.variant,
                self.options.neighbor_search.unwrap_or_default(),
                self.thread_count()
            ),
            _ => self.variant.to_string(),
        }
    }

    fn thread_count(&self) -> usize {
        self.options.thread_count.unwrap_or_else(available_threads)
    }

    /// Build a fresh registration handle with the options applied.
    pub fn instantiate(&self) -> Result<Box<dyn Registration>, RegistrationError> {
        let mut registration: Box<dyn Registration> = match self.variant {
            RegistrationVariant::Gicp => Box::new(Gicp::new()),
            RegistrationVariant::ParallelGicp => Box::new(Gicp::with_threads(self.thread_count())?),
            RegistrationVariant::Ndt => Box::new(Ndt::new()),
            RegistrationVariant::ParallelNdt => Box::new(Ndt::with_threads(self.thread_count())?),
        };
        registration.reconfigure(&self.options)?;
        Ok(registration)
    }
}

impl fmt::Display for BenchmarkConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// The configurations swept by a benchmark session, in run order.
///
/// Serial GICP, parallel GICP on the largest thread count, serial NDT, then
/// parallel NDT for every thread count and every neighbour search method.
pub fn benchmark_configurations(settings: &BenchmarkSettings) -> Vec<BenchmarkConfiguration> {
    let thread_counts = settings.resolved_thread_counts();
    let max_threads = thread_counts
        .iter()
        .copied()
        .max()
        .unwrap_or_else(available_threads);
    let ndt_options = RegistrationOptions::default().with_resolution(settings.ndt_resolution);

    let mut configurations = vec![
        BenchmarkConfiguration::new(RegistrationVariant::Gicp, RegistrationOptions::default()),
        BenchmarkConfiguration::new(
            RegistrationVariant::ParallelGicp,
            RegistrationOptions::default().with_thread_count(max_threads),
        ),
        BenchmarkConfiguration::new(RegistrationVariant::Ndt, ndt_options),
    ];
    for num_threads in thread_counts {
        for method in NeighborSearchMethod::ALL {
            configurations.push(BenchmarkConfiguration::new(
                RegistrationVariant::ParallelNdt,
                ndt_options
                    .with_thread_count(num_threads)
                    .with_neighbor_search(method),
            ));
        }
    }
    configurations
}

/// One executed configuration.
#[derive(Debug)]
pub struct BenchmarkRun {
    /// What was run.
    pub configuration: BenchmarkConfiguration,
    /// Timings and fitness, or the error that stopped the run.
    pub result: Result<RegistrationResult, RegistrationError>,
    /// Artifacts actually written.
    pub artifacts: Vec<PathBuf>,
}

impl fmt::Display for BenchmarkRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- {} ---", self.configuration)?;
        match &self.result {
            Ok(result) => {
                writeln!(
                    f,
                    "single: {:.3} [msec]",
                    result.single_run_time.as_secs_f64() * 1e3
                )?;
                writeln!(
                    f,
                    "{} times: {:.3} [msec]",
                    result.repetitions,
                    result.repeated_run_time.as_secs_f64() * 1e3
                )?;
                writeln!(f, "fitness: {}", result.fitness)
            }
            Err(e) => writeln!(f, "failed: {e}"),
        }
    }
}

/// Lazily runs every configuration of [`benchmark_configurations`].
///
/// All parallel NDT runs share one handle that is reconfigured before each
/// run, so the sequence can only be consumed once.
pub struct BenchmarkSuite<'a> {
    target: &'a PointCloud,
    source: &'a PointCloud,
    settings: BenchmarkSettings,
    configurations: std::vec::IntoIter<BenchmarkConfiguration>,
    parallel_ndt: Option<Ndt>,
    output_dir_ready: bool,
}

impl<'a> BenchmarkSuite<'a> {
    /// Prepare a sweep over the given (already downsampled) clouds.
    pub fn new(target: &'a PointCloud, source: &'a PointCloud, settings: &BenchmarkSettings) -> Self {
        Self {
            target,
            source,
            configurations: benchmark_configurations(settings).into_iter(),
            settings: settings.clone(),
            parallel_ndt: None,
            output_dir_ready: false,
        }
    }

    fn execute(
        &mut self,
        configuration: &BenchmarkConfiguration,
    ) -> Result<RegistrationResult, RegistrationError> {
        let repetitions = self.settings.repetitions;
        match configuration.variant {
            RegistrationVariant::ParallelNdt => {
                let ndt = match self.parallel_ndt.take() {
                    Some(ndt) => ndt,
                    None => Ndt::with_threads(configuration.thread_count())?,
                };
                let ndt = self.parallel_ndt.insert(ndt);
                ndt.reconfigure(&configuration.options)?;
                run_with_repetitions(ndt, self.target, self.source, repetitions)
            }
            _ => {
                let mut registration = configuration.instantiate()?;
                run_with_repetitions(registration.as_mut(), self.target, self.source, repetitions)
            }
        }
    }

    fn save_artifacts(&mut self, name: &str, result: &RegistrationResult) -> Vec<PathBuf> {
        if !self.output_dir_ready {
            if let Err(e) = std::fs::create_dir_all(&self.settings.output_dir) {
                log::error!(
                    "failed to create {}: {e}",
                    self.settings.output_dir.display()
                );
            }
            self.output_dir_ready = true;
        }

        let clouds = [
            ("source", self.source),
            ("target", self.target),
            ("aligned", &result.aligned),
        ];
        clouds
            .into_iter()
            .filter_map(|(kind, cloud)| {
                let path = artifact_path(&self.settings.output_dir, name, kind);
                match write_pcd_ascii(&path, cloud) {
                    Ok(()) => Some(path),
                    Err(e) => {
                        log::error!("failed to save {}: {e}", path.display());
                        None
                    }
                }
            })
            .collect()
    }
}

/// `<dir>/<name>_<kind>.pcd`
pub fn artifact_path(dir: &Path, name: &str, kind: &str) -> PathBuf {
    dir.join(format!("{name}_{kind}.pcd"))
}

impl Iterator for BenchmarkSuite<'_> {
    type Item = BenchmarkRun;

    fn next(&mut self) -> Option<BenchmarkRun> {
        let configuration = self.configurations.next()?;
        log::info!("running {}", configuration.label());

        let result = self.execute(&configuration);
        let artifacts = match &result {
            Ok(result) if self.settings.save_artifacts => {
                self.save_artifacts(&configuration.name(), result)
            }
            Ok(_) => Vec::new(),
            Err(e) => {
                log::error!("{} failed: {e}", configuration.label());
                Vec::new()
            }
        };

        Some(BenchmarkRun {
            configuration,
            result,
            artifacts,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.configurations.size_hint()
    }
}

/// Run the whole sweep and collect the runs.
pub fn run_benchmark_suite(
    target: &PointCloud,
    source: &PointCloud,
    settings: &BenchmarkSettings,
) -> Vec<BenchmarkRun> {
    BenchmarkSuite::new(target, source, settings).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(thread_counts: Vec<usize>) -> BenchmarkSettings {
        BenchmarkSettings {
            thread_counts: Some(thread_counts),
            ..Default::default()
        }
    }

    #[test]
    fn test_configuration_names() {
        let names = benchmark_configurations(&settings(vec![1, 8]))
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            [
                "pcl_gicp",
                "pclomp_gicp",
                "pcl_ndt",
                "pclomp_ndt_KDTREE_1_threads",
                "pclomp_ndt_DIRECT7_1_threads",
                "pclomp_ndt_DIRECT1_1_threads",
                "pclomp_ndt_KDTREE_8_threads",
                "pclomp_ndt_DIRECT7_8_threads",
                "pclomp_ndt_DIRECT1_8_threads",
            ]
        );
    }

    #[test]
    fn test_single_core_sweep_has_unique_names() {
        let configurations = benchmark_configurations(&settings(vec![1, 1]));
        assert_eq!(configurations.len(), 6);
        let names = configurations
            .iter()
            .map(|c| c.name())
            .collect::<std::collections::HashSet<_>>();
        assert_eq!(names.len(), configurations.len());
    }

    #[test]
    fn test_labels() {
        let configurations = benchmark_configurations(&settings(vec![1, 8]));
        assert_eq!(configurations[0].label(), "pcl::GICP");
        assert_eq!(configurations[1].label(), "pclomp::GICP");
        assert_eq!(configurations[1].options.thread_count, Some(8));
        assert_eq!(configurations[2].label(), "pcl::NDT");
        assert_eq!(configurations[6].label(), "pclomp::NDT (KDTREE, 8 threads)");
    }

    #[test]
    fn test_instantiate_applies_options() -> Result<(), RegistrationError> {
        let configuration = BenchmarkConfiguration::new(
            RegistrationVariant::ParallelNdt,
            RegistrationOptions::default()
                .with_thread_count(2)
                .with_neighbor_search(NeighborSearchMethod::Direct7),
        );
        let registration = configuration.instantiate()?;
        assert_eq!(registration.variant(), RegistrationVariant::ParallelNdt);
        Ok(())
    }

    #[test]
    fn test_artifact_path() {
        assert_eq!(
            artifact_path(Path::new("/tmp/pcd"), "pcl_ndt", "aligned"),
            PathBuf::from("/tmp/pcd/pcl_ndt_aligned.pcd")
        );
    }
}
