//! Error types for the orchestration layer.
//!
//! This module defines the primary error type, `DaqError`, shared by the
//! sequencer, the pulse-train dispatcher and the station procedures. Using the
//! `thiserror` crate, it gives every failure a category that decides how it
//! propagates.
//!
//! ## Error Hierarchy
//!
//! - **`DeviceCommand`**: a device rejected or timed out a command. Fatal to the
//!   current run and always propagated to the caller.
//! - **`Feedback`**: the exposure-feedback computation could not produce a
//!   usable value (bad peak reading). The sequencer absorbs it and holds the
//!   previous exposure; the standalone controller surfaces it.
//! - **`SequenceAbort`**: operator cancellation. Propagated, never retried.
//! - **`PulseTrainTimeout`**: the pulse generator stayed RUNNING past the
//!   configured bound. Propagated after a forced disarm attempt.
//! - **`InvalidTransition`** and **`Configuration`**: programming or
//!   configuration errors caught before any hardware is touched.
//!
//! No variant is retried automatically. Retrying motion or acquisition is the
//! caller's decision at the procedure level.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Initialization,
    Configuration,
    Communication,
    Hardware,
    Timeout,
    InvalidParameter,
    Unsupported,
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unsupported => "unsupported",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Structured error raised by a device driver (real or simulated).
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    pub driver_type: String,
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

// =============================================================================
// Feedback Errors
// =============================================================================

/// Failure of the exposure-feedback computation.
///
/// Both variants describe a bad *sample*, not a bad device: the scan keeps
/// going with the previous exposure when one of these is raised mid-run.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum FeedbackError {
    /// The measured peak was zero, negative or NaN.
    #[error("cannot correct exposure from measured peak {measured_peak}")]
    Division { measured_peak: f64 },

    /// The corrected exposure is non-finite, non-positive or above the device ceiling.
    #[error("corrected exposure {value} s outside (0, {max}] s")]
    Range { value: f64, max: f64 },
}

// =============================================================================
// Application Errors
// =============================================================================

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the orchestration layer.
///
/// # Propagation Policy
///
/// 1. **Device errors** - `DeviceCommand`, `Driver`
///    - Always surface to the caller and end the current run
///    - Devices stay in their last commanded state (no rollback)
///
/// 2. **Sample errors** - `Feedback`
///    - Absorbed inside a scan and logged as a degraded sample
///
/// 3. **Control errors** - `SequenceAbort`, `PulseTrainTimeout`, `InvalidTransition`
///    - Propagated unchanged, never retried
///
/// # Example
///
/// ```rust
/// use daq_core::error::{DaqError, FeedbackError};
///
/// let err: DaqError = FeedbackError::Division { measured_peak: 0.0 }.into();
/// assert!(err.is_recoverable());
/// ```
#[derive(Error, Debug)]
pub enum DaqError {
    /// A device rejected or timed out a command.
    ///
    /// **Error Type**: Fatal to the current run.
    ///
    /// **Recovery Strategy**: Abort the remaining trajectory. Retrying is left
    /// to the caller, who knows whether the hardware is safe to re-command.
    #[error("Device '{device}' failed during {operation}: {source}")]
    DeviceCommand {
        device: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The exposure-feedback computation failed.
    ///
    /// **Error Type**: Transient - a single bad frame.
    ///
    /// **Recovery Strategy**: Hold the previous exposure and continue.
    #[error("Exposure feedback error: {0}")]
    Feedback(#[from] FeedbackError),

    /// The run was cancelled by the operator.
    #[error("Sequence aborted: {reason}")]
    SequenceAbort { reason: String },

    /// The pulse generator did not leave RUNNING within the configured bound.
    ///
    /// The dispatcher has already attempted a disarm when this is returned.
    #[error("Pulse train still running after {waited:?}")]
    PulseTrainTimeout { waited: Duration },

    /// A state-machine operation was called from the wrong state.
    #[error("Cannot {operation} while {from}")]
    InvalidTransition {
        from: &'static str,
        operation: &'static str,
    },

    /// Configuration or parameter validation failed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use daq_core::error::DaqError;
    ///
    /// fn validate_period(period: usize) -> Result<(), DaqError> {
    ///     if period == 0 {
    ///         return Err(DaqError::Configuration("bracket_period must be > 0".into()));
    ///     }
    ///     Ok(())
    /// }
    /// assert!(validate_period(0).is_err());
    /// ```
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Structured driver error with category
    #[error("{0}")]
    Driver(DriverError),
}

impl DaqError {
    /// Wrap a device-level failure with the device and operation it came from.
    pub fn device(
        device: impl Into<String>,
        operation: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        DaqError::DeviceCommand {
            device: device.into(),
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Build the cancellation error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        DaqError::SequenceAbort {
            reason: reason.into(),
        }
    }

    /// True for errors a running scan absorbs instead of propagating.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DaqError::Feedback(_))
    }

    /// True when the run ended because of operator cancellation.
    pub fn is_abort(&self) -> bool {
        matches!(self, DaqError::SequenceAbort { .. })
    }
}

impl From<DriverError> for DaqError {
    fn from(err: DriverError) -> Self {
        DaqError::Driver(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_command_display() {
        let err = DaqError::device("magnet", "move_to", anyhow::anyhow!("power supply tripped"));
        assert_eq!(
            err.to_string(),
            "Device 'magnet' failed during move_to: power supply tripped"
        );
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_device_command_keeps_source() {
        let driver = DriverError::new("mock_magnet", DriverErrorKind::Hardware, "fault 7");
        let err = DaqError::device("magnet", "move_to", driver.into());
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(
            source.as_deref(),
            Some("Driver 'mock_magnet' hardware error: fault 7")
        );
    }

    #[test]
    fn test_feedback_is_recoverable() {
        let err: DaqError = FeedbackError::Range {
            value: -1.0,
            max: 10.0,
        }
        .into();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("outside (0, 10] s"));
    }

    #[test]
    fn test_abort_and_timeout_display() {
        let err = DaqError::aborted("operator stop");
        assert!(err.is_abort());
        assert_eq!(err.to_string(), "Sequence aborted: operator stop");

        let err = DaqError::PulseTrainTimeout {
            waited: Duration::from_secs(3),
        };
        assert_eq!(err.to_string(), "Pulse train still running after 3s");
    }

    #[test]
    fn test_driver_error_display() {
        let err = DaqError::Driver(DriverError::new(
            "mock_detector",
            DriverErrorKind::Initialization,
            "failed to connect",
        ));
        assert!(err
            .to_string()
            .contains("Driver 'mock_detector' initialization error"));
    }
}
