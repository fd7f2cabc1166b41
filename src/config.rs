//! Run configuration and problem sizing.
//!
//! Matrix dimensions are derived from the tile edge and a size multiple.
//! Devices with more compute units get a larger default multiple; the
//! multiple only affects how much work a run does, never correctness.

use crate::device::DeviceProperties;
use crate::error::{validation_error, Result};
use crate::kernels::{BlockSize, GemmShape};
use crate::verify::VerifyOptions;

/// Seed for the input generator.
pub const DEFAULT_SEED: u64 = 2006;

/// Timed launches per run.
pub const DEFAULT_ITERATIONS: usize = 30;

/// Devices with at most this many compute units use the small multiple.
pub const SMALL_DEVICE_UNITS: usize = 4;

pub const SMALL_DEVICE_SIZE_MULTIPLE: usize = 2;
pub const LARGE_DEVICE_SIZE_MULTIPLE: usize = 5;
pub const MAX_SIZE_MULTIPLE: usize = 10;

/// Width of A, in tiles, before scaling.
pub const BASE_WIDTH_A: usize = 3;
/// Height of A, in tiles, before scaling.
pub const BASE_HEIGHT_A: usize = 5;
/// Width of B, in tiles, before scaling.
pub const BASE_WIDTH_B: usize = 8;

/// How the problem dimensions are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemSize {
    /// Base shape scaled by a multiple; `None` picks it from the device.
    Scaled(Option<usize>),
    /// Square `n × n` matrices.
    Square(usize),
}

/// Default size multiple for a device.
pub fn default_size_multiple(props: &DeviceProperties) -> usize {
    if props.compute_units > SMALL_DEVICE_UNITS {
        LARGE_DEVICE_SIZE_MULTIPLE
    } else {
        SMALL_DEVICE_SIZE_MULTIPLE
    }
}

/// Everything a benchmark run needs besides the device.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Explicit device index; the best device is used when `None`.
    pub device: Option<usize>,
    /// Suppresses device-selection logging.
    pub quiet: bool,
    pub iterations: usize,
    pub problem: ProblemSize,
    /// Forces a tile edge instead of choosing one from the device.
    pub block_size: Option<BlockSize>,
    pub seed: u64,
    pub verify: VerifyOptions,
    /// Compute units of the full-width device.
    pub threads: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            device: None,
            quiet: false,
            iterations: DEFAULT_ITERATIONS,
            problem: ProblemSize::Scaled(None),
            block_size: None,
            seed: DEFAULT_SEED,
            verify: VerifyOptions::default(),
            threads: None,
        }
    }
}

impl RunConfig {
    /// Checks values that do not depend on the device.
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(validation_error("iteration count must be at least 1"));
        }
        if let ProblemSize::Square(0) = self.problem {
            return Err(validation_error("matrix size must be at least 1"));
        }
        if !(self.verify.tolerance >= 0.0) {
            return Err(validation_error(format!(
                "tolerance {} must be a non-negative number",
                self.verify.tolerance
            )));
        }
        Ok(())
    }

    /// Tile edge for `props`: the forced one, else by device generation.
    pub fn block_size_for(&self, props: &DeviceProperties) -> BlockSize {
        self.block_size
            .unwrap_or_else(|| BlockSize::for_capability(props.compute_capability.0))
    }

    /// Problem shape for `props` with tile edge `block`.
    ///
    /// Square sizes are not rounded; a size that is not a multiple of the
    /// tile edge is rejected later by the launch.
    pub fn shape_for(&self, props: &DeviceProperties, block: BlockSize) -> GemmShape {
        let edge = block.edge();
        match self.problem {
            ProblemSize::Square(n) => GemmShape::new(n, n, n),
            ProblemSize::Scaled(multiple) => {
                let m = multiple
                    .unwrap_or_else(|| default_size_multiple(props))
                    .clamp(1, MAX_SIZE_MULTIPLE);
                GemmShape::new(
                    BASE_HEIGHT_A * edge * m,
                    BASE_WIDTH_A * edge * m,
                    BASE_WIDTH_B * edge * m,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(units: usize, major: u32) -> DeviceProperties {
        DeviceProperties::host("test".to_string(), units, (major, 0))
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.seed, 2006);
        assert_eq!(config.iterations, 30);
        assert_eq!(config.verify.tolerance, 1.0e-6);
        assert_eq!(config.verify.max_listed, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_block_size_by_generation() {
        let config = RunConfig::default();
        assert_eq!(config.block_size_for(&props(8, 1)), BlockSize::B16);
        assert_eq!(config.block_size_for(&props(8, 3)), BlockSize::B32);

        let forced = RunConfig {
            block_size: Some(BlockSize::B16),
            ..RunConfig::default()
        };
        assert_eq!(forced.block_size_for(&props(8, 3)), BlockSize::B16);
    }

    #[test]
    fn test_size_multiple_by_device_tier() {
        let config = RunConfig::default();
        let small = config.shape_for(&props(4, 3), BlockSize::B32);
        assert_eq!(small, GemmShape::new(5 * 32 * 2, 3 * 32 * 2, 8 * 32 * 2));

        let large = config.shape_for(&props(16, 3), BlockSize::B32);
        assert_eq!(large, GemmShape::new(5 * 32 * 5, 3 * 32 * 5, 8 * 32 * 5));
    }

    #[test]
    fn test_explicit_multiple_is_clamped() {
        let config = RunConfig {
            problem: ProblemSize::Scaled(Some(50)),
            ..RunConfig::default()
        };
        let shape = config.shape_for(&props(16, 3), BlockSize::B16);
        assert_eq!(shape, GemmShape::new(5 * 16 * 10, 3 * 16 * 10, 8 * 16 * 10));

        let config = RunConfig {
            problem: ProblemSize::Scaled(Some(0)),
            ..RunConfig::default()
        };
        let shape = config.shape_for(&props(16, 3), BlockSize::B16);
        assert_eq!(shape, GemmShape::new(5 * 16, 3 * 16, 8 * 16));
    }

    #[test]
    fn test_scaled_shapes_are_tile_multiples() {
        let config = RunConfig::default();
        for block in [BlockSize::B16, BlockSize::B32] {
            let shape = config.shape_for(&props(2, 3), block);
            assert!(shape.check_tiles(block.edge()).is_ok());
        }
    }

    #[test]
    fn test_square_problem() {
        let config = RunConfig {
            problem: ProblemSize::Square(96),
            ..RunConfig::default()
        };
        assert_eq!(
            config.shape_for(&props(16, 3), BlockSize::B32),
            GemmShape::new(96, 96, 96)
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_iters = RunConfig {
            iterations: 0,
            ..RunConfig::default()
        };
        assert!(zero_iters.validate().is_err());

        let zero_size = RunConfig {
            problem: ProblemSize::Square(0),
            ..RunConfig::default()
        };
        assert!(zero_size.validate().is_err());

        let mut bad_tol = RunConfig::default();
        bad_tol.verify.tolerance = f32::NAN;
        assert!(bad_tol.validate().is_err());
    }
}
