use regbench_3d::pointcloud::PointCloud;

use crate::{RegistrationError, RegistrationOptions, RegistrationVariant, RigidTransform};

/// A stateful point cloud registration algorithm.
///
/// Inputs are bound once and `align` may be called any number of times on the
/// bound state. Every call starts from the identity transformation, so repeated
/// calls produce the same result.
pub trait Registration {
    /// Which algorithm this is.
    fn variant(&self) -> RegistrationVariant;

    /// Bind the cloud the source is aligned to.
    ///
    /// Any per-target preprocessing (search structures, covariances, voxels)
    /// happens here, not in [`Registration::align`].
    fn set_input_target(&mut self, target: &PointCloud) -> Result<(), RegistrationError>;

    /// Bind the cloud to move onto the target.
    fn set_input_source(&mut self, source: &PointCloud) -> Result<(), RegistrationError>;

    /// Estimate the transformation and return the source moved by it.
    ///
    /// The returned cloud has exactly as many points as the source.
    fn align(&mut self) -> Result<PointCloud, RegistrationError>;

    /// Mean squared nearest-neighbour distance between the last aligned
    /// source and the target. `f64::MAX` before any alignment.
    fn fitness_score(&self) -> f64;

    /// Transformation estimated by the last alignment.
    fn final_transformation(&self) -> RigidTransform;

    /// Whether the last alignment met its convergence criterion before
    /// running out of iterations.
    fn has_converged(&self) -> bool;

    /// Apply new options. Options the variant does not support are ignored.
    fn reconfigure(&mut self, options: &RegistrationOptions) -> Result<(), RegistrationError>;
}
