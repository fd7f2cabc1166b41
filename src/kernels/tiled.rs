//! # Tiled matrix multiplication kernel
//!
//! Computes `C = A × B` for row-major single-precision matrices on a
//! [`Device`]. The output is partitioned into `T × T` tiles, one execution
//! group per tile and one worker per output element. Worker `(tx, ty)` of
//! group `(bx, by)` produces `C[by*T + ty][bx*T + tx]`.
//!
//! Each group walks the shared dimension in steps of `T`:
//!
//! 1. every worker copies one element of the current A tile and one element
//!    of the current B tile into the group's shared scratch;
//! 2. barrier, so no worker reads a tile before it is fully loaded;
//! 3. every worker accumulates `Σ_k As[ty][k] * Bs[k][tx]` into its private
//!    `f32` accumulator;
//! 4. barrier, so the scratch is not overwritten while still being read.
//!
//! After the last step each worker stores its accumulator once.
//!
//! **Preconditions**: the height of A and the widths of A and B must be
//! exact multiples of `T`. There is no boundary handling; launches that
//! break this are rejected with [`crate::error::MatmulError::InvalidLaunch`].

use crate::device::{Device, DeviceBuffer, Dim2, Kernel, LaunchConfig, LaunchStats, ThreadGroup};
use crate::error::{invalid_launch, validation_error, Result};
use crate::matrix::Matrix;

/// Tile edge length used on legacy devices.
pub const BLOCK_SIZE_LEGACY: usize = 16;

/// Tile edge length used on newer devices.
pub const BLOCK_SIZE_MODERN: usize = 32;

/// Supported tile edge lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSize {
    B16,
    B32,
}

impl BlockSize {
    /// 16 for legacy devices (major < 2), 32 otherwise.
    pub fn for_capability(major: u32) -> Self {
        if major < 2 {
            BlockSize::B16
        } else {
            BlockSize::B32
        }
    }

    pub fn from_edge(edge: usize) -> Option<Self> {
        match edge {
            BLOCK_SIZE_LEGACY => Some(BlockSize::B16),
            BLOCK_SIZE_MODERN => Some(BlockSize::B32),
            _ => None,
        }
    }

    pub fn edge(self) -> usize {
        match self {
            BlockSize::B16 => BLOCK_SIZE_LEGACY,
            BlockSize::B32 => BLOCK_SIZE_MODERN,
        }
    }
}

/// Shape of a product `C(height × width_b) = A(height × width_a) × B(width_a × width_b)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmShape {
    pub height: usize,
    pub width_a: usize,
    pub width_b: usize,
}

impl GemmShape {
    pub fn new(height: usize, width_a: usize, width_b: usize) -> Self {
        GemmShape {
            height,
            width_a,
            width_b,
        }
    }

    /// Shape of `a × b`, checking that A's columns match B's rows.
    pub fn of(a: &Matrix, b: &Matrix) -> Result<Self> {
        let (height, width_b) = Matrix::check_multiply(a, b)?;
        Ok(GemmShape::new(height, a.width(), width_b))
    }

    /// Floating-point operations of one multiply: `2 * H * WA * WB`.
    pub fn flops(&self) -> f64 {
        2.0 * self.height as f64 * self.width_a as f64 * self.width_b as f64
    }

    /// Elements of A.
    pub fn len_a(&self) -> Result<usize> {
        checked_len("A", self.height, self.width_a)
    }

    /// Elements of B.
    pub fn len_b(&self) -> Result<usize> {
        checked_len("B", self.width_a, self.width_b)
    }

    /// Elements of C.
    pub fn len_c(&self) -> Result<usize> {
        checked_len("C", self.height, self.width_b)
    }

    /// Bytes of device memory needed to hold A, B and C together.
    pub fn device_bytes(&self) -> Result<usize> {
        let elements = [self.len_a()?, self.len_b()?, self.len_c()?]
            .into_iter()
            .try_fold(0usize, |acc, n| acc.checked_add(n));
        elements
            .and_then(|n| n.checked_mul(std::mem::size_of::<f32>()))
            .ok_or_else(|| {
                validation_error(format!(
                    "a {}x{} by {}x{} product does not fit in memory",
                    self.height, self.width_a, self.width_a, self.width_b
                ))
            })
    }

    /// Fails unless every dimension is a positive multiple of `edge`.
    pub fn check_tiles(&self, edge: usize) -> Result<()> {
        for (name, dim) in [
            ("height", self.height),
            ("width of A", self.width_a),
            ("width of B", self.width_b),
        ] {
            if dim == 0 || dim % edge != 0 {
                return Err(invalid_launch(format!(
                    "{name} {dim} is not a positive multiple of the block size {edge}"
                )));
            }
        }
        Ok(())
    }

    /// One group per `edge × edge` tile of C.
    pub fn launch_config(&self, edge: usize) -> LaunchConfig {
        LaunchConfig::new(
            Dim2::new(self.width_b / edge, self.height / edge),
            Dim2::square(edge),
        )
    }
}

fn checked_len(name: &str, rows: usize, cols: usize) -> Result<usize> {
    rows.checked_mul(cols).ok_or_else(|| {
        validation_error(format!("{name} of {rows}x{cols} elements overflows usize"))
    })
}

/// One group's shared scratch: the current A tile and B tile.
pub struct TileScratch<const T: usize> {
    pub a: [[f32; T]; T],
    pub b: [[f32; T]; T],
}

/// The tiled multiply kernel for tile edge `T`.
pub struct TiledMatMul<'a, const T: usize> {
    a: &'a [f32],
    b: &'a [f32],
    shape: GemmShape,
}

impl<'a, const T: usize> TiledMatMul<'a, T> {
    /// Binds the kernel to device-resident A and B.
    pub fn new(a: &'a DeviceBuffer, b: &'a DeviceBuffer, shape: GemmShape) -> Result<Self> {
        if a.len() != shape.len_a()? || b.len() != shape.len_b()? {
            return Err(validation_error(format!(
                "buffers of {} and {} elements do not match a {}x{} by {}x{} product",
                a.len(),
                b.len(),
                shape.height,
                shape.width_a,
                shape.width_a,
                shape.width_b
            )));
        }
        Ok(TiledMatMul {
            a: a.as_slice(),
            b: b.as_slice(),
            shape,
        })
    }
}

impl<const T: usize> Kernel for TiledMatMul<'_, T> {
    type Shared = Box<TileScratch<T>>;

    fn name(&self) -> &'static str {
        "tiled_matmul"
    }

    fn shared_bytes(&self, _block: Dim2) -> usize {
        std::mem::size_of::<TileScratch<T>>()
    }

    fn shared_memory(&self, _block: Dim2) -> Self::Shared {
        Box::new(TileScratch {
            a: [[0.0; T]; T],
            b: [[0.0; T]; T],
        })
    }

    fn validate(&self, config: &LaunchConfig) -> Result<()> {
        self.shape.check_tiles(T)?;
        let expected = self.shape.launch_config(T);
        if *config != expected {
            return Err(invalid_launch(format!(
                "grid {}x{} of {}x{} groups does not tile a {}x{} output with {}x{} tiles",
                config.grid.x,
                config.grid.y,
                config.block.x,
                config.block.y,
                self.shape.height,
                self.shape.width_b,
                T,
                T
            )));
        }
        Ok(())
    }

    fn run_group(&self, group: &mut ThreadGroup<Self::Shared>) {
        let (a, b) = (self.a, self.b);
        let wa = self.shape.width_a;
        let wb = self.shape.width_b;
        let Dim2 { x: bx, y: by } = group.block_idx();

        // First A tile of this group's row band and first B tile of its
        // column band, and the strides between consecutive tiles.
        let a_begin = wa * T * by;
        let a_step = T;
        let b_begin = T * bx;
        let b_step = T * wb;

        let mut csub = [[0.0f32; T]; T];

        for step in 0..wa / T {
            let a_off = a_begin + step * a_step;
            let b_off = b_begin + step * b_step;

            group.for_each_thread(|idx, mem| {
                let (tx, ty) = (idx.thread.x, idx.thread.y);
                mem.shared.a[ty][tx] = a[a_off + wa * ty + tx];
                mem.shared.b[ty][tx] = b[b_off + wb * ty + tx];
            });
            group.sync_threads();

            group.for_each_thread(|idx, mem| {
                let (tx, ty) = (idx.thread.x, idx.thread.y);
                let mut sum = csub[ty][tx];
                for k in 0..T {
                    sum += mem.shared.a[ty][k] * mem.shared.b[k][tx];
                }
                csub[ty][tx] = sum;
            });
            group.sync_threads();
        }

        let c = wb * T * by + T * bx;
        group.for_each_thread(|idx, mem| {
            let (tx, ty) = (idx.thread.x, idx.thread.y);
            mem.store(c + wb * ty + tx, csub[ty][tx]);
        });
    }
}

/// Launches the tiled kernel for `shape` on device buffers.
///
/// `c` is fully overwritten.
pub fn launch(
    device: &Device,
    a: &DeviceBuffer,
    b: &DeviceBuffer,
    c: &mut DeviceBuffer,
    shape: GemmShape,
    block: BlockSize,
) -> Result<LaunchStats> {
    match block {
        BlockSize::B16 => launch_with::<BLOCK_SIZE_LEGACY>(device, a, b, c, shape),
        BlockSize::B32 => launch_with::<BLOCK_SIZE_MODERN>(device, a, b, c, shape),
    }
}

fn launch_with<const T: usize>(
    device: &Device,
    a: &DeviceBuffer,
    b: &DeviceBuffer,
    c: &mut DeviceBuffer,
    shape: GemmShape,
) -> Result<LaunchStats> {
    shape.check_tiles(T)?;
    let kernel = TiledMatMul::<T>::new(a, b, shape)?;
    device.launch(&kernel, shape.launch_config(T), c)
}

/// Uploads `a` and `b`, runs one launch and downloads the product.
pub fn multiply(device: &Device, a: &Matrix, b: &Matrix, block: BlockSize) -> Result<Matrix> {
    let shape = GemmShape::of(a, b)?;
    let d_a = device.upload(a.as_slice())?;
    let d_b = device.upload(b.as_slice())?;
    let mut d_c = device.alloc(shape.len_c()?)?;

    launch(device, &d_a, &d_b, &mut d_c, shape, block)?;
    device.synchronize()?;

    let mut c = Matrix::new(shape.height, shape.width_b);
    d_c.copy_to_host(c.as_mut_slice())?;
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceProperties;
    use crate::error::MatmulError;

    fn device() -> Device {
        Device::open(0, DeviceProperties::host("test".to_string(), 4, (3, 5))).unwrap()
    }

    fn naive(a: &Matrix, b: &Matrix) -> Matrix {
        let mut c = Matrix::new(a.height(), b.width());
        for i in 0..a.height() {
            for j in 0..b.width() {
                let mut sum = 0.0f32;
                for k in 0..a.width() {
                    sum += a.get(i, k) * b.get(k, j);
                }
                c.set(i, j, sum);
            }
        }
        c
    }

    fn small_ints(height: usize, width: usize, seed: usize) -> Matrix {
        Matrix::from_fn(height, width, |i, j| ((i * 7 + j * 3 + seed) % 5) as f32)
    }

    #[test]
    fn test_block_size_selection() {
        assert_eq!(BlockSize::for_capability(1), BlockSize::B16);
        assert_eq!(BlockSize::for_capability(2), BlockSize::B32);
        assert_eq!(BlockSize::for_capability(8), BlockSize::B32);
        assert_eq!(BlockSize::from_edge(16), Some(BlockSize::B16));
        assert_eq!(BlockSize::from_edge(24), None);
        assert_eq!(BlockSize::B32.edge(), 32);
    }

    #[test]
    fn test_gemm_shape() {
        let shape = GemmShape::new(160, 96, 256);
        assert_eq!(shape.flops(), 2.0 * 160.0 * 96.0 * 256.0);
        assert!(shape.check_tiles(32).is_ok());
        assert!(shape.check_tiles(16).is_ok());
        assert!(GemmShape::new(40, 32, 32).check_tiles(16).is_err());
        assert!(GemmShape::new(0, 32, 32).check_tiles(16).is_err());

        let config = shape.launch_config(32);
        assert_eq!(config.grid, Dim2::new(8, 5));
        assert_eq!(config.block, Dim2::square(32));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_lengths_overflow_is_validation_error() {
        let shape = GemmShape::new(16, 32, 48);
        assert_eq!(shape.len_a().unwrap(), 16 * 32);
        assert_eq!(shape.len_c().unwrap(), 16 * 48);
        assert_eq!(shape.device_bytes().unwrap(), (16 * 32 + 32 * 48 + 16 * 48) * 4);

        // 2^33 squared wraps to 0 without a checked multiply.
        let huge = GemmShape::new(1 << 33, 1 << 33, 1 << 33);
        assert!(huge.check_tiles(32).is_ok());
        for result in [huge.len_a(), huge.len_b(), huge.len_c(), huge.device_bytes()] {
            assert!(matches!(result, Err(MatmulError::Validation { .. })));
        }
        // Each matrix fits, their byte total does not.
        let wide = GemmShape::new(1, 1 << 62, 1);
        assert!(wide.len_a().is_ok());
        assert!(wide.device_bytes().is_err());
    }

    #[test]
    fn test_matches_naive_exactly_on_small_integers() {
        let device = device();
        for (block, (h, wa, wb)) in [
            (BlockSize::B16, (16, 16, 16)),
            (BlockSize::B16, (48, 32, 64)),
            (BlockSize::B32, (32, 32, 32)),
            (BlockSize::B32, (64, 96, 32)),
        ] {
            let a = small_ints(h, wa, 1);
            let b = small_ints(wa, wb, 2);
            let c = multiply(&device, &a, &b, block).unwrap();
            assert_eq!(c, naive(&a, &b), "{h}x{wa}x{wb} with {:?}", block);
        }
    }

    #[test]
    fn test_one_tile_runs_one_step() {
        let device = device();
        let a = small_ints(16, 16, 0);
        let b = small_ints(16, 16, 4);
        let shape = GemmShape::of(&a, &b).unwrap();
        let d_a = device.upload(a.as_slice()).unwrap();
        let d_b = device.upload(b.as_slice()).unwrap();
        let mut d_c = device.alloc(shape.len_c().unwrap()).unwrap();

        let stats = launch(&device, &d_a, &d_b, &mut d_c, shape, BlockSize::B16).unwrap();
        assert_eq!(stats.groups, 1);
        assert_eq!(stats.threads_per_group, 256);
        // load barrier + compute barrier
        assert_eq!(stats.total_barriers, 2);
    }

    #[test]
    fn test_barriers_per_group_follow_shared_dimension() {
        let device = device();
        let a = small_ints(32, 64, 0);
        let b = small_ints(64, 48, 0);
        let shape = GemmShape::of(&a, &b).unwrap();
        let d_a = device.upload(a.as_slice()).unwrap();
        let d_b = device.upload(b.as_slice()).unwrap();
        let mut d_c = device.alloc(shape.len_c().unwrap()).unwrap();

        let stats = launch(&device, &d_a, &d_b, &mut d_c, shape, BlockSize::B16).unwrap();
        assert_eq!(stats.groups, 2 * 3);
        assert_eq!(stats.min_group_barriers, 2 * 4);
        assert_eq!(stats.max_group_barriers, 2 * 4);
    }

    #[test]
    fn test_non_multiple_dimensions_are_rejected() {
        let device = device();
        let a = Matrix::new(20, 16);
        let b = Matrix::new(16, 16);
        let err = multiply(&device, &a, &b, BlockSize::B16).unwrap_err();
        assert!(matches!(err, MatmulError::InvalidLaunch { .. }));
    }

    #[test]
    fn test_shape_mismatch_is_validation_error() {
        let device = device();
        let a = Matrix::new(16, 32);
        let b = Matrix::new(16, 16);
        let err = multiply(&device, &a, &b, BlockSize::B16).unwrap_err();
        assert!(matches!(err, MatmulError::Validation { .. }));
    }

    #[test]
    fn test_mismatched_launch_config_is_rejected() {
        let device = device();
        let shape = GemmShape::new(32, 32, 32);
        let d_a = device.alloc(shape.len_a().unwrap()).unwrap();
        let d_b = device.alloc(shape.len_b().unwrap()).unwrap();
        let mut d_c = device.alloc(shape.len_c().unwrap()).unwrap();
        let kernel = TiledMatMul::<16>::new(&d_a, &d_b, shape).unwrap();

        // Covers the output but with the wrong block shape.
        let config = LaunchConfig::new(Dim2::new(4, 1), Dim2::new(8, 32));
        let err = device.launch(&kernel, config, &mut d_c).unwrap_err();
        assert!(matches!(err, MatmulError::InvalidLaunch { .. }));
    }

    #[test]
    fn test_buffers_released_after_multiply() {
        let device = device();
        let a = small_ints(32, 32, 0);
        let b = small_ints(32, 32, 1);
        multiply(&device, &a, &b, BlockSize::B32).unwrap();
        assert_eq!(device.allocated_bytes(), 0);
    }
}
