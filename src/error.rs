//! Error types for device and host-side matmul operations.
//!
//! Device failures are fatal to a benchmark run: the binary prints the
//! diagnostic and exits. Numeric mismatches are not errors at all; they are
//! reported through [`crate::verify::Comparison`].

use std::fmt;
use std::panic::Location;

use thiserror::Error;

/// Status returned by a failing device call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// An argument was outside the range the call accepts.
    InvalidValue,
    /// The device could not provide the requested memory.
    OutOfMemory,
    /// The device handle does not refer to a usable device.
    InvalidDevice,
    /// A kernel launch could not be executed.
    LaunchFailure,
    /// A host/device copy was attempted between buffers of different sizes.
    SizeMismatch,
}

impl DeviceStatus {
    /// Numeric code printed in fatal diagnostics.
    pub fn code(self) -> i32 {
        match self {
            DeviceStatus::InvalidValue => 1,
            DeviceStatus::OutOfMemory => 2,
            DeviceStatus::InvalidDevice => 101,
            DeviceStatus::LaunchFailure => 719,
            DeviceStatus::SizeMismatch => 11,
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceStatus::InvalidValue => "invalid value",
            DeviceStatus::OutOfMemory => "out of memory",
            DeviceStatus::InvalidDevice => "invalid device",
            DeviceStatus::LaunchFailure => "launch failure",
            DeviceStatus::SizeMismatch => "size mismatch",
        };
        write!(f, "{:04} \"{}\"", self.code(), name)
    }
}

/// Errors that can occur while selecting a device or running the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatmulError {
    /// No compatible device exists at all.
    #[error("no devices supporting the tiled kernel were found")]
    NoDevice,
    /// The requested device index does not exist.
    #[error("{device_count} device(s) detected, device={requested} is not a valid device")]
    DeviceUnavailable {
        /// Number of devices that were enumerated.
        device_count: usize,
        /// The index the caller asked for.
        requested: usize,
    },
    /// A device API call reported a failure.
    #[error("device API error = {status} from file <{file}>, line {line}")]
    DeviceCall {
        /// Status reported by the call.
        status: DeviceStatus,
        /// Source file of the failing call.
        file: &'static str,
        /// Source line of the failing call.
        line: u32,
    },
    /// The launch configuration does not fit the kernel or the device.
    #[error("invalid kernel launch: {message}")]
    InvalidLaunch {
        /// Human-readable error message.
        message: String,
    },
    /// Host-side input validation error.
    #[error("validation error: {message}")]
    Validation {
        /// Human-readable error message.
        message: String,
    },
}

/// Result type alias for matmul operations.
pub type Result<T> = std::result::Result<T, MatmulError>;

/// Creates a device call error recording the caller's file and line.
#[track_caller]
pub fn device_call_error(status: DeviceStatus) -> MatmulError {
    let location = Location::caller();
    MatmulError::DeviceCall {
        status,
        file: location.file(),
        line: location.line(),
    }
}

/// Creates an invalid launch error.
pub fn invalid_launch(message: impl Into<String>) -> MatmulError {
    MatmulError::InvalidLaunch {
        message: message.into(),
    }
}

/// Creates a validation error.
pub fn validation_error(message: impl Into<String>) -> MatmulError {
    MatmulError::Validation {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_unavailable_display() {
        let error = MatmulError::DeviceUnavailable {
            device_count: 2,
            requested: 7,
        };
        let display = format!("{}", error);
        assert!(display.contains("2 device(s) detected"));
        assert!(display.contains("device=7"));
    }

    #[test]
    fn test_device_call_error_captures_location() {
        let error = device_call_error(DeviceStatus::OutOfMemory);
        match &error {
            MatmulError::DeviceCall { status, file, line } => {
                assert_eq!(*status, DeviceStatus::OutOfMemory);
                assert!(file.ends_with("error.rs"));
                assert!(*line > 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let display = format!("{}", error);
        assert!(display.contains("0002 \"out of memory\""));
        assert!(display.contains("error.rs"));
    }

    #[test]
    fn test_invalid_launch_display() {
        let error = invalid_launch("height 40 is not a multiple of 16");
        let display = format!("{}", error);
        assert!(display.contains("invalid kernel launch"));
        assert!(display.contains("not a multiple of 16"));
    }

    #[test]
    fn test_validation_error_display() {
        let error = validation_error("A has 3 columns but B has 4 rows");
        let display = format!("{}", error);
        assert!(display.contains("validation error"));
        assert!(display.contains("3 columns"));
    }

    #[test]
    fn test_error_equality() {
        let error1 = validation_error("test");
        let error2 = validation_error("test");
        let error3 = invalid_launch("test");

        assert_eq!(error1, error2);
        assert_ne!(error1, error3);
    }

    #[test]
    fn test_error_trait_implementation() {
        let error = MatmulError::NoDevice;

        let _: &dyn std::error::Error = &error;

        assert!(std::error::Error::source(&error).is_none());
    }
}
