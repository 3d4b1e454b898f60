#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod error;
pub use error::RegistrationError;

mod executor;
pub use executor::available_threads;

mod fitness;
mod linalg;
mod normal_equations;
mod search;

#[cfg(test)]
mod testing;

/// Generalized ICP.
pub mod gicp;
pub use gicp::{Gicp, GicpParams};

/// Normal Distributions Transform.
pub mod ndt;
pub use ndt::{Ndt, NdtParams};

mod options;
pub use options::{NeighborSearchMethod, RegistrationOptions, RegistrationVariant};

mod registration;
pub use registration::Registration;

mod transform;
pub use transform::RigidTransform;
