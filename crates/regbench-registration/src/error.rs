/// Errors raised by the registration algorithms.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RegistrationError {
    /// `align` was called before the named input cloud was set.
    #[error("The {0} point cloud has not been set")]
    MissingInput(&'static str),

    /// The named input cloud has no points.
    #[error("The {0} point cloud is empty")]
    EmptyPointCloud(&'static str),

    /// The named input cloud is too small for the algorithm.
    #[error("The {which} point cloud needs at least {required} points, got {actual}")]
    InsufficientPoints {
        /// Which input cloud.
        which: &'static str,
        /// Minimum number of points.
        required: usize,
        /// Number of points provided.
        actual: usize,
    },

    /// A configuration option has an invalid value.
    #[error("Invalid registration option: {0}")]
    InvalidOption(String),

    /// The worker thread pool could not be created.
    #[error("Failed to build thread pool. {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
