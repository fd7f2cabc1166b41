//! Tiled dense matrix multiplication on an emulated data-parallel device.
//!
//! The device runs kernels as grids of thread groups; each group stages
//! square tiles of both operands in its shared scratch and accumulates one
//! output tile. Results are verified against a single-threaded reference
//! multiplier.
//!
//! ```no_run
//! use tiled_matmul::{device::DeviceRegistry, harness, RunConfig};
//!
//! let registry = DeviceRegistry::discover(None);
//! let device = registry.select(None, false)?;
//! let report = harness::run(&device, &RunConfig::default())?;
//! println!("{}", report.throughput);
//! # Ok::<(), tiled_matmul::MatmulError>(())
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod harness;
pub mod kernels;
pub mod matrix;
pub mod reference;
pub mod verify;

pub use config::{ProblemSize, RunConfig};
pub use error::{DeviceStatus, MatmulError, Result};
pub use kernels::{BlockSize, GemmShape};
pub use matrix::Matrix;
