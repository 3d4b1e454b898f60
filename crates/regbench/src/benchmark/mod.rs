/// Times a single registration configuration.
pub mod driver;
pub use driver::{run, run_with_repetitions, RegistrationResult, DEFAULT_REPETITIONS};

/// The configuration sweep and its artifacts.
pub mod suite;
pub use suite::{
    artifact_path, benchmark_configurations, run_benchmark_suite, BenchmarkConfiguration,
    BenchmarkRun, BenchmarkSuite,
};
