#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

#[doc(inline)]
pub use regbench_3d as k3d;

#[doc(inline)]
pub use regbench_registration as registration;

/// Registration driver and benchmark suite.
pub mod benchmark;

/// Benchmark settings.
pub mod config;

/// Process memory reporting.
pub mod diagnostics;
