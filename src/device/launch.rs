//! Kernel launch topology and group execution.
//!
//! A launch is a 2-D grid of execution groups, each a 2-D block of workers.
//! Groups are independent and are scheduled as rayon tasks in any order.
//! The workers of one group run in lockstep: [`ThreadGroup::for_each_thread`]
//! executes one phase for every worker, and [`ThreadGroup::sync_threads`]
//! marks the barrier between phases. Shared scratch is created per group by
//! [`Kernel::shared_memory`] and dropped when the group retires.
//!
//! Groups never touch the output buffer directly. Each group writes into its
//! own output tile, addressed with global indices, and the launcher copies
//! finished tiles into their row band. Every output element therefore has
//! exactly one writer.

use rayon::prelude::*;

use crate::error::{invalid_launch, Result};

/// A 2-D extent or index, `x` being the column axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dim2 {
    pub x: usize,
    pub y: usize,
}

impl Dim2 {
    pub const fn new(x: usize, y: usize) -> Self {
        Dim2 { x, y }
    }

    pub const fn square(n: usize) -> Self {
        Dim2 { x: n, y: n }
    }

    /// Number of points covered by this extent.
    pub const fn count(&self) -> usize {
        self.x * self.y
    }
}

/// Grid and block extents of one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Number of groups along each axis.
    pub grid: Dim2,
    /// Number of workers per group along each axis.
    pub block: Dim2,
}

impl LaunchConfig {
    pub fn new(grid: Dim2, block: Dim2) -> Self {
        LaunchConfig { grid, block }
    }

    /// Width of the output covered by the whole grid.
    pub fn output_width(&self) -> usize {
        self.grid.x * self.block.x
    }

    /// Height of the output covered by the whole grid.
    pub fn output_height(&self) -> usize {
        self.grid.y * self.block.y
    }
}

/// Position of one worker: its group and its place inside the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadIdx {
    /// Group coordinates (`bx`, `by`).
    pub block: Dim2,
    /// Worker coordinates inside the group (`tx`, `ty`).
    pub thread: Dim2,
}

/// A compute kernel launched over a grid of cooperative groups.
pub trait Kernel: Sync {
    /// Scratch memory shared by the workers of one group.
    type Shared: Send;

    fn name(&self) -> &'static str;

    /// Bytes of shared scratch a group of `block` workers allocates.
    fn shared_bytes(&self, block: Dim2) -> usize;

    /// Allocates the shared scratch for one group.
    fn shared_memory(&self, block: Dim2) -> Self::Shared;

    /// Rejects configurations the kernel cannot execute.
    fn validate(&self, _config: &LaunchConfig) -> Result<()> {
        Ok(())
    }

    /// Runs every phase of one group.
    fn run_group(&self, group: &mut ThreadGroup<Self::Shared>);
}

/// Memory visible to a worker during a phase.
pub struct GroupMemory<S> {
    /// The group's shared scratch.
    pub shared: S,
    output: OutputTile,
}

impl<S> GroupMemory<S> {
    /// Stores `value` at flat index `index` of the row-major output.
    ///
    /// # Panics
    /// Panics if the index falls outside the group's output tile.
    #[inline]
    pub fn store(&mut self, index: usize, value: f32) {
        self.output.store(index, value);
    }
}

/// The slice of the output owned by one group.
struct OutputTile {
    origin: Dim2,
    block: Dim2,
    output_width: usize,
    data: Vec<f32>,
    #[cfg(debug_assertions)]
    written: Vec<bool>,
}

impl OutputTile {
    fn new(block_idx: Dim2, block: Dim2, output_width: usize) -> Self {
        OutputTile {
            origin: Dim2::new(block_idx.x * block.x, block_idx.y * block.y),
            block,
            output_width,
            data: vec![0.0; block.count()],
            #[cfg(debug_assertions)]
            written: vec![false; block.count()],
        }
    }

    #[inline]
    fn store(&mut self, index: usize, value: f32) {
        let row = index / self.output_width;
        let col = index % self.output_width;
        assert!(
            row >= self.origin.y
                && row < self.origin.y + self.block.y
                && col >= self.origin.x
                && col < self.origin.x + self.block.x,
            "store to ({row}, {col}) outside group tile at ({}, {})",
            self.origin.y,
            self.origin.x
        );
        let local = (row - self.origin.y) * self.block.x + (col - self.origin.x);
        #[cfg(debug_assertions)]
        {
            debug_assert!(!self.written[local], "output ({row}, {col}) written twice");
            self.written[local] = true;
        }
        self.data[local] = value;
    }
}

/// One execution group: a block of workers sharing scratch memory.
pub struct ThreadGroup<S> {
    block_idx: Dim2,
    block_dim: Dim2,
    grid_dim: Dim2,
    memory: GroupMemory<S>,
    barriers: usize,
}

impl<S> ThreadGroup<S> {
    fn new(block_idx: Dim2, config: &LaunchConfig, shared: S) -> Self {
        ThreadGroup {
            block_idx,
            block_dim: config.block,
            grid_dim: config.grid,
            memory: GroupMemory {
                shared,
                output: OutputTile::new(block_idx, config.block, config.output_width()),
            },
            barriers: 0,
        }
    }

    /// Coordinates of this group in the grid.
    pub fn block_idx(&self) -> Dim2 {
        self.block_idx
    }

    pub fn block_dim(&self) -> Dim2 {
        self.block_dim
    }

    pub fn grid_dim(&self) -> Dim2 {
        self.grid_dim
    }

    /// Runs one phase: `f` once per worker, rows (`ty`) outermost.
    pub fn for_each_thread<F>(&mut self, mut f: F)
    where
        F: FnMut(ThreadIdx, &mut GroupMemory<S>),
    {
        for ty in 0..self.block_dim.y {
            for tx in 0..self.block_dim.x {
                let idx = ThreadIdx {
                    block: self.block_idx,
                    thread: Dim2::new(tx, ty),
                };
                f(idx, &mut self.memory);
            }
        }
    }

    /// Group-wide barrier. Every worker has finished the previous phase when
    /// this returns.
    pub fn sync_threads(&mut self) {
        self.barriers += 1;
    }

    /// Barriers this group has passed so far.
    pub fn barriers(&self) -> usize {
        self.barriers
    }
}

/// Counters collected from one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchStats {
    pub groups: usize,
    pub threads_per_group: usize,
    pub total_barriers: usize,
    /// Fewest barriers any single group passed.
    pub min_group_barriers: usize,
    /// Most barriers any single group passed.
    pub max_group_barriers: usize,
}

/// Checks the config against the kernel and the output buffer.
pub(crate) fn check_config<K: Kernel>(
    kernel: &K,
    config: &LaunchConfig,
    output_len: usize,
) -> Result<()> {
    if [config.grid.x, config.grid.y, config.block.x, config.block.y].contains(&0) {
        return Err(invalid_launch(format!(
            "empty launch: grid {}x{}, block {}x{}",
            config.grid.x, config.grid.y, config.block.x, config.block.y
        )));
    }
    let covered = config
        .grid
        .x
        .checked_mul(config.block.x)
        .zip(config.grid.y.checked_mul(config.block.y))
        .and_then(|(width, height)| width.checked_mul(height));
    if covered != Some(output_len) {
        return Err(invalid_launch(format!(
            "output buffer holds {} elements but the grid covers {}x{} groups of {}x{}",
            output_len, config.grid.y, config.grid.x, config.block.y, config.block.x
        )));
    }
    kernel.validate(config)
}

/// Executes every group of the launch and scatters the tiles into `output`.
///
/// Must run inside the device's thread pool.
pub(crate) fn execute<K: Kernel>(
    kernel: &K,
    config: &LaunchConfig,
    output: &mut [f32],
) -> LaunchStats {
    let width = config.output_width();
    let band_len = config.block.y * width;

    let barrier_counts: Vec<usize> = output
        .par_chunks_mut(band_len)
        .enumerate()
        .flat_map_iter(|(by, band)| {
            let tiles: Vec<(OutputTile, usize)> = (0..config.grid.x)
                .into_par_iter()
                .map(|bx| {
                    let block_idx = Dim2::new(bx, by);
                    let shared = kernel.shared_memory(config.block);
                    let mut group = ThreadGroup::new(block_idx, config, shared);
                    kernel.run_group(&mut group);
                    (group.memory.output, group.barriers)
                })
                .collect();

            let mut counts = Vec::with_capacity(tiles.len());
            for (tile, barriers) in tiles {
                for ty in 0..tile.block.y {
                    let dst = ty * width + tile.origin.x;
                    let src = ty * tile.block.x;
                    band[dst..dst + tile.block.x]
                        .copy_from_slice(&tile.data[src..src + tile.block.x]);
                }
                counts.push(barriers);
            }
            counts
        })
        .collect();

    LaunchStats {
        groups: barrier_counts.len(),
        threads_per_group: config.block.count(),
        total_barriers: barrier_counts.iter().sum(),
        min_group_barriers: barrier_counts.iter().copied().min().unwrap_or(0),
        max_group_barriers: barrier_counts.iter().copied().max().unwrap_or(0),
    }
}
