//! The emulated data-parallel device.
//!
//! A [`Device`] owns a rayon thread pool with one thread per compute unit.
//! Kernels run on that pool through [`Device::launch`]; device memory is a
//! [`DeviceBuffer`] that is only reachable through explicit, size-checked
//! host/device copies.

pub mod launch;
pub mod registry;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, trace};

use crate::error::{device_call_error, invalid_launch, DeviceStatus, Result};

pub use launch::{Dim2, GroupMemory, Kernel, LaunchConfig, LaunchStats, ThreadGroup, ThreadIdx};
pub use registry::{cores_per_unit, DeviceRegistry};

/// Most workers a single group may have.
pub const MAX_THREADS_PER_GROUP: usize = 1024;

/// Shared scratch available to one group, in bytes.
pub const SHARED_MEMORY_PER_GROUP: usize = 48 * 1024;

/// Static description of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    pub name: String,
    /// `(major, minor)` architecture version.
    pub compute_capability: (u32, u32),
    /// Groups that can execute at the same time.
    pub compute_units: usize,
    pub clock_rate_khz: u32,
    pub max_threads_per_group: usize,
    pub shared_memory_per_group: usize,
    /// Largest total allocation the device accepts, in bytes.
    pub global_memory: usize,
}

impl DeviceProperties {
    /// Properties of a host-backed device with `compute_units` threads.
    pub fn host(name: String, compute_units: usize, compute_capability: (u32, u32)) -> Self {
        DeviceProperties {
            name,
            compute_capability,
            compute_units: compute_units.max(1),
            clock_rate_khz: 1_000_000,
            max_threads_per_group: MAX_THREADS_PER_GROUP,
            shared_memory_per_group: SHARED_MEMORY_PER_GROUP,
            global_memory: 4 << 30,
        }
    }

    /// Architectures before 2.x are the legacy generation.
    pub fn is_legacy(&self) -> bool {
        self.compute_capability.0 < 2
    }
}

/// A buffer resident in device memory.
///
/// The memory returns to the device when the buffer is dropped.
#[derive(Debug)]
pub struct DeviceBuffer {
    device: usize,
    data: Vec<f32>,
    allocated: Arc<AtomicUsize>,
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        let bytes = self.data.len() * std::mem::size_of::<f32>();
        self.allocated.fetch_sub(bytes, Ordering::Relaxed);
        trace!(ordinal = self.device, bytes, "device free");
    }
}

impl DeviceBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Ordinal of the device that owns this buffer.
    pub fn device(&self) -> usize {
        self.device
    }

    /// Synchronous host-to-device copy of the whole buffer.
    pub fn copy_from_host(&mut self, src: &[f32]) -> Result<()> {
        if src.len() != self.data.len() {
            return Err(device_call_error(DeviceStatus::SizeMismatch));
        }
        self.data.copy_from_slice(src);
        Ok(())
    }

    /// Synchronous device-to-host copy of the whole buffer.
    pub fn copy_to_host(&self, dst: &mut [f32]) -> Result<()> {
        if dst.len() != self.data.len() {
            return Err(device_call_error(DeviceStatus::SizeMismatch));
        }
        dst.copy_from_slice(&self.data);
        Ok(())
    }

    pub(crate) fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// An opened device.
#[derive(Debug)]
pub struct Device {
    ordinal: usize,
    props: DeviceProperties,
    pool: ThreadPool,
    allocated: Arc<AtomicUsize>,
    pending: AtomicUsize,
}

impl Device {
    /// Starts the device's thread pool.
    pub fn open(ordinal: usize, props: DeviceProperties) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(props.compute_units)
            .thread_name(move |unit| format!("device{ordinal}-unit{unit}"))
            .build()
            .map_err(|_| device_call_error(DeviceStatus::InvalidDevice))?;

        debug!(
            ordinal,
            units = props.compute_units,
            major = props.compute_capability.0,
            minor = props.compute_capability.1,
            "device opened"
        );

        Ok(Device {
            ordinal,
            props,
            pool,
            allocated: Arc::new(AtomicUsize::new(0)),
            pending: AtomicUsize::new(0),
        })
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn properties(&self) -> &DeviceProperties {
        &self.props
    }

    /// Allocates a zeroed buffer of `len` elements in device memory.
    pub fn alloc(&self, len: usize) -> Result<DeviceBuffer> {
        let bytes = len
            .checked_mul(std::mem::size_of::<f32>())
            .ok_or_else(|| device_call_error(DeviceStatus::InvalidValue))?;
        let in_use = self.allocated.load(Ordering::Relaxed);
        if in_use.saturating_add(bytes) > self.props.global_memory {
            return Err(device_call_error(DeviceStatus::OutOfMemory));
        }

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| device_call_error(DeviceStatus::OutOfMemory))?;
        data.resize(len, 0.0);

        self.allocated.fetch_add(bytes, Ordering::Relaxed);
        trace!(ordinal = self.ordinal, bytes, "device alloc");
        Ok(DeviceBuffer {
            device: self.ordinal,
            data,
            allocated: Arc::clone(&self.allocated),
        })
    }

    /// Allocates a buffer and fills it from `src`.
    pub fn upload(&self, src: &[f32]) -> Result<DeviceBuffer> {
        let mut buffer = self.alloc(src.len())?;
        buffer.copy_from_host(src)?;
        Ok(buffer)
    }

    /// Returns a buffer's memory to the device.
    pub fn free(&self, buffer: DeviceBuffer) {
        drop(buffer);
    }

    /// Bytes currently allocated on this device.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Launches `kernel` over `config`, writing every element of `output`.
    ///
    /// Fails without touching `output` when the configuration exceeds the
    /// device limits or is rejected by the kernel.
    pub fn launch<K: Kernel>(
        &self,
        kernel: &K,
        config: LaunchConfig,
        output: &mut DeviceBuffer,
    ) -> Result<LaunchStats> {
        if output.device != self.ordinal {
            return Err(device_call_error(DeviceStatus::InvalidDevice));
        }
        let workers = config.block.x.checked_mul(config.block.y);
        if workers.map_or(true, |n| n > self.props.max_threads_per_group) {
            return Err(invalid_launch(format!(
                "a {}x{} group exceeds the device limit of {} workers",
                config.block.x, config.block.y, self.props.max_threads_per_group
            )));
        }
        let shared = kernel.shared_bytes(config.block);
        if shared > self.props.shared_memory_per_group {
            return Err(invalid_launch(format!(
                "kernel `{}` needs {} bytes of shared memory, device offers {}",
                kernel.name(),
                shared,
                self.props.shared_memory_per_group
            )));
        }
        launch::check_config(kernel, &config, output.len())?;

        trace!(
            kernel = kernel.name(),
            grid_x = config.grid.x,
            grid_y = config.grid.y,
            block_x = config.block.x,
            block_y = config.block.y,
            "launch"
        );
        self.pending.fetch_add(1, Ordering::AcqRel);
        let stats = self
            .pool
            .install(|| launch::execute(kernel, &config, &mut output.data));
        Ok(stats)
    }

    /// Blocks until all submitted launches have completed.
    pub fn synchronize(&self) -> Result<()> {
        let completed = self.pending.swap(0, Ordering::AcqRel);
        trace!(ordinal = self.ordinal, completed, "synchronize");
        Ok(())
    }
}
