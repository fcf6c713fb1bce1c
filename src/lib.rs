//! # XMCD DAQ
//!
//! Facade crate for the magneto-optical XMCD imaging station. It ties the
//! workspace crates to a configuration file and a logging setup:
//!
//! - **`config`**: Figment-based [`StationConfig`](config::StationConfig), TOML plus
//!   `XMCD_DAQ_` environment overrides
//! - **`tracing_init`**: `tracing-subscriber` setup in pretty, compact or JSON format
//! - **`station`**: [`StationDevices`](station::StationDevices), one device handle per
//!   station role, wired into the sequencer and the pulse-train dispatcher
//!
//! The experiment logic itself lives in `daq-experiment`; device capabilities,
//! errors and the clock live in `daq-core`.

pub mod config;
pub mod station;
pub mod tracing_init;

pub use daq_core;
pub use daq_driver_mock;
pub use daq_experiment;

/// Commonly used types for station scripts and binaries
pub mod prelude {
    pub use crate::config::StationConfig;
    pub use crate::station::StationDevices;
    pub use daq_core::capabilities::{DeviceHandle, DeviceRole, DeviceRunState};
    pub use daq_core::clock::{CancellationToken, Clock, ManualClock, TokioClock};
    pub use daq_core::error::{AppResult, DaqError, FeedbackError};
    pub use daq_experiment::procedures::{
        acquire_dark_series, demagnetize, prepare_shot, scheduled_repeat, DarkStep,
        SATURATION_CURRENT,
    };
    pub use daq_experiment::{
        degauss_ramp, hysteresis_sweep, linspace, DetectorSession, ExposureFeedbackController,
        HysteresisSweep, PulseTrainDispatcher, PulseTrainRequest, RunContext, ScanReport,
        ScanSequencer, ShutterMode, Trajectory,
    };
}
