//! Device enumeration and selection.
//!
//! Devices are described by [`DeviceProperties`]. When no index is given the
//! device with the highest estimated throughput is chosen: among devices of
//! the newest architecture (when that architecture is newer than 2.x),
//! the one maximising `compute_units * cores_per_unit * clock_rate`.

use std::num::NonZeroUsize;

use tracing::{info, warn};

use crate::device::{Device, DeviceProperties};
use crate::error::{MatmulError, Result};

/// Scalar cores per compute unit for a given compute capability.
///
/// Unknown architectures count as a single core per unit.
pub fn cores_per_unit(major: u32, minor: u32) -> u32 {
    match (major, minor) {
        (1, _) => 8,
        (2, 0) => 32,
        (2, _) => 48,
        (3, _) => 192,
        (5, _) => 128,
        (6, 0) => 64,
        (6, _) => 128,
        (7, _) => 64,
        (8, 0) => 64,
        (8, _) => 128,
        (9, 0) => 128,
        _ => 1,
    }
}

/// Estimated throughput score used to rank devices.
pub fn compute_score(props: &DeviceProperties) -> u64 {
    let (major, minor) = props.compute_capability;
    props.compute_units as u64 * cores_per_unit(major, minor) as u64 * props.clock_rate_khz as u64
}

/// The set of devices available to this process.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Vec<DeviceProperties>,
}

impl DeviceRegistry {
    /// Enumerates the host-backed devices.
    ///
    /// Device 0 spans `threads` compute units (all hardware threads when
    /// `None`); device 1 is a single-unit device of the legacy generation.
    pub fn discover(threads: Option<usize>) -> Self {
        let units = threads
            .filter(|&n| n > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(NonZeroUsize::get))
            .unwrap_or(1);

        DeviceRegistry {
            devices: vec![
                DeviceProperties::host(format!("Host emulated device ({units} units)"), units, (3, 5)),
                DeviceProperties::host("Host emulated device (single lane)".to_string(), 1, (1, 3)),
            ],
        }
    }

    /// Builds a registry from explicit device descriptions.
    pub fn from_properties(devices: Vec<DeviceProperties>) -> Self {
        DeviceRegistry { devices }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn properties(&self, index: usize) -> Option<&DeviceProperties> {
        self.devices.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceProperties> {
        self.devices.iter()
    }

    /// Index of the device with the best estimated throughput.
    pub fn best_index(&self) -> Result<usize> {
        if self.devices.is_empty() {
            return Err(MatmulError::NoDevice);
        }

        let best_major = self
            .devices
            .iter()
            .map(|p| p.compute_capability.0)
            .filter(|&major| major > 0 && major < 9999)
            .max()
            .unwrap_or(0);

        let mut best = 0;
        let mut best_score = 0;
        for (index, props) in self.devices.iter().enumerate() {
            let score = compute_score(props);
            if score > best_score && (best_major <= 2 || props.compute_capability.0 == best_major) {
                best_score = score;
                best = index;
            }
        }
        Ok(best)
    }

    /// Opens the device at `index`.
    ///
    /// An index past the end is reported with the device count so the
    /// caller can print a useful diagnostic.
    pub fn select_by_index(&self, index: usize, quiet: bool) -> Result<Device> {
        if self.devices.is_empty() {
            return Err(MatmulError::NoDevice);
        }
        let Some(props) = self.devices.get(index) else {
            warn!(
                device_count = self.devices.len(),
                requested = index,
                "requested device is not valid"
            );
            return Err(MatmulError::DeviceUnavailable {
                device_count: self.devices.len(),
                requested: index,
            });
        };
        if !quiet {
            info!("Using device [{}]: {}", index, props.name);
        }
        Device::open(index, props.clone())
    }

    /// Opens the device with the best estimated throughput.
    pub fn select_best(&self, quiet: bool) -> Result<Device> {
        let index = self.best_index()?;
        let props = &self.devices[index];
        if !quiet {
            info!(
                score = compute_score(props),
                "Using device [{}]: {}", index, props.name
            );
        }
        Device::open(index, props.clone())
    }

    /// Opens `index` when given, otherwise the best device.
    pub fn select(&self, index: Option<usize>, quiet: bool) -> Result<Device> {
        match index {
            Some(index) => self.select_by_index(index, quiet),
            None => self.select_best(quiet),
        }
    }
}
