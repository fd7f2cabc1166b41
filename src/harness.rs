//! Host-side orchestration of a benchmark run.
//!
//! A run allocates and fills the inputs, copies them to the device, launches
//! the tiled kernel once untimed and then `iterations` times under a timer,
//! copies the result back and verifies it against the reference multiplier.
//! Host and device buffers are owned by [`run`] and released on every exit
//! path, including a failed verification.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::device::{Device, LaunchStats};
use crate::error::{validation_error, Result};
use crate::kernels::{tiled, BlockSize, GemmShape};
use crate::matrix::Matrix;
use crate::reference;
use crate::verify::{self, Comparison};

/// Throughput of the timed launches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub gflops: f64,
    pub msec_per_launch: f64,
    /// Floating-point operations of one launch.
    pub ops: f64,
    pub devices_used: usize,
    /// Workers per group.
    pub workgroup: usize,
}

impl Throughput {
    /// `2 * H * WA * WB` operations over `elapsed / iterations` seconds.
    pub fn measure(shape: GemmShape, elapsed: Duration, iterations: usize, workgroup: usize) -> Self {
        let ops = shape.flops();
        let secs_per_launch = elapsed.as_secs_f64() / iterations.max(1) as f64;
        let gflops = if secs_per_launch > 0.0 {
            ops * 1.0e-9 / secs_per_launch
        } else {
            f64::INFINITY
        };
        Throughput {
            gflops,
            msec_per_launch: secs_per_launch * 1000.0,
            ops,
            devices_used: 1,
            workgroup,
        }
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Performance= {:.2} GFlop/s, Time= {:.3} msec, Size= {:.0} Ops, NumDevsUsed= {}, Workgroup= {}",
            self.gflops, self.msec_per_launch, self.ops, self.devices_used, self.workgroup
        )
    }
}

/// Everything a run measured and verified.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub device_ordinal: usize,
    pub device_name: String,
    pub block: BlockSize,
    pub shape: GemmShape,
    pub iterations: usize,
    pub elapsed: Duration,
    pub throughput: Throughput,
    pub launch_stats: LaunchStats,
    pub comparison: Comparison,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.comparison.passed()
    }
}

/// Fills A then B from one generator seeded with `seed`.
pub fn generate_inputs(shape: GemmShape, seed: u64) -> (Matrix, Matrix) {
    let mut rng = StdRng::seed_from_u64(seed);
    let a = Matrix::random(shape.height, shape.width_a, &mut rng);
    let b = Matrix::random(shape.width_a, shape.width_b, &mut rng);
    (a, b)
}

/// Runs the benchmark on `device` with freshly generated inputs.
pub fn run(device: &Device, config: &RunConfig) -> Result<RunReport> {
    config.validate()?;
    let props = device.properties();
    let block = config.block_size_for(props);
    let shape = config.shape_for(props, block);
    shape.check_tiles(block.edge())?;

    // Host copies of A, B and C mirror the device ones, so check the
    // footprint before generating anything.
    let bytes = shape.device_bytes()?;
    if bytes > props.global_memory {
        return Err(validation_error(format!(
            "a {}x{} by {}x{} product needs {} bytes, device {} has {}",
            shape.height,
            shape.width_a,
            shape.width_a,
            shape.width_b,
            bytes,
            device.ordinal(),
            props.global_memory
        )));
    }

    info!(
        "MatrixA({}x{}), MatrixB({}x{})",
        shape.width_a, shape.height, shape.width_b, shape.width_a
    );

    let (a, b) = generate_inputs(shape, config.seed);
    run_with_inputs(device, config, &a, &b, block)
}

/// Runs the benchmark on caller-provided inputs.
pub fn run_with_inputs(
    device: &Device,
    config: &RunConfig,
    a: &Matrix,
    b: &Matrix,
    block: BlockSize,
) -> Result<RunReport> {
    config.validate()?;
    let started_at = Local::now();
    let shape = GemmShape::of(a, b)?;
    shape.check_tiles(block.edge())?;

    let d_a = device.upload(a.as_slice())?;
    let d_b = device.upload(b.as_slice())?;
    let mut d_c = device.alloc(shape.len_c()?)?;
    debug!(bytes = device.allocated_bytes(), "inputs resident on device");

    // Warm-up, not timed.
    tiled::launch(device, &d_a, &d_b, &mut d_c, shape, block)?;
    device.synchronize()?;

    let start = Instant::now();
    let mut launch_stats = None;
    for _ in 0..config.iterations {
        launch_stats = Some(tiled::launch(device, &d_a, &d_b, &mut d_c, shape, block)?);
    }
    device.synchronize()?;
    let elapsed = start.elapsed();

    let edge = block.edge();
    let throughput = Throughput::measure(shape, elapsed, config.iterations, edge * edge);
    info!("{}", throughput);

    let mut c = Matrix::new(shape.height, shape.width_b);
    d_c.copy_to_host(c.as_mut_slice())?;
    device.free(d_a);
    device.free(d_b);
    device.free(d_c);

    let expected = reference::matmul(a, b)?;
    let comparison = verify::compare_matrices(&expected, &c, &config.verify)?;
    if comparison.passed() {
        debug!(
            max_abs_diff = comparison.max_abs_diff,
            l2_relative_error = comparison.l2_relative_error,
            "result matches reference"
        );
    } else {
        warn!(
            mismatches = comparison.total_mismatches,
            max_abs_diff = comparison.max_abs_diff,
            l2_relative_error = comparison.l2_relative_error,
            "result differs from reference"
        );
    }

    Ok(RunReport {
        started_at,
        device_ordinal: device.ordinal(),
        device_name: device.properties().name.clone(),
        block,
        shape,
        iterations: config.iterations,
        elapsed,
        throughput,
        launch_stats: launch_stats.unwrap_or(LaunchStats {
            groups: 0,
            threads_per_group: edge * edge,
            total_barriers: 0,
            min_group_barriers: 0,
            max_group_barriers: 0,
        }),
        comparison,
    })
}
